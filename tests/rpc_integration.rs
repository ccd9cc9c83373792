//! Integration tests for the RPC client against an in-process TCP server.
//!
//! Each test binds a listener on a loopback port and scripts the server end
//! of the JSON-RPC conversation by hand, so correlation, clamping, fault
//! handling and notification routing are exercised over a real socket.
//!
//! # Running
//!
//! ```bash
//! cargo test --test rpc_integration
//! ```

use std::time::Duration;

use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::time::timeout;

use snapmix::control::Mixer;
use snapmix::rpc::{ConnectionState, Endpoint, RpcClient, RpcError};

const TEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Bind a loopback listener and build the endpoint pointing at it.
async fn bind() -> (TcpListener, Endpoint) {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind loopback listener");
    let port = listener.local_addr().expect("listener addr").port();
    (listener, Endpoint::new("127.0.0.1", port))
}

/// Accept one connection and split it for scripted request/response use.
async fn accept(listener: &TcpListener) -> (BufReader<OwnedReadHalf>, OwnedWriteHalf) {
    let (stream, _) = listener.accept().await.expect("accept connection");
    let (read, write) = stream.into_split();
    (BufReader::new(read), write)
}

/// Read one CRLF-terminated request frame and parse it.
async fn read_request(reader: &mut BufReader<OwnedReadHalf>) -> Value {
    let mut line = String::new();
    let n = timeout(TEST_TIMEOUT, reader.read_line(&mut line))
        .await
        .expect("request within timeout")
        .expect("read request line");
    assert!(n > 0, "connection closed while waiting for a request");
    serde_json::from_str(line.trim_end()).expect("request is valid JSON")
}

async fn send(writer: &mut OwnedWriteHalf, value: &Value) {
    let mut frame = serde_json::to_vec(value).expect("serialize frame");
    frame.extend_from_slice(b"\r\n");
    writer.write_all(&frame).await.expect("write frame");
}

/// Reply to a request with the given result payload, echoing its id.
async fn reply(writer: &mut OwnedWriteHalf, request: &Value, result: Value) {
    let id = request["id"].clone();
    send(writer, &json!({"jsonrpc": "2.0", "id": id, "result": result})).await;
}

#[tokio::test]
async fn test_call_roundtrip() {
    let (listener, endpoint) = bind().await;

    let server = tokio::spawn(async move {
        let (mut reader, mut writer) = accept(&listener).await;
        let request = read_request(&mut reader).await;
        assert_eq!(request["jsonrpc"], "2.0");
        assert_eq!(request["method"], "Server.GetRPCVersion");
        assert!(request["id"].is_u64());
        reply(&mut writer, &request, json!({"major": 2})).await;
    });

    let client = RpcClient::connect(&endpoint).await.expect("connect");
    let result = timeout(TEST_TIMEOUT, client.call("Server.GetRPCVersion", None))
        .await
        .expect("call resolves")
        .expect("call succeeds");
    assert_eq!(result["major"], 2);

    client.close().await;
    server.await.expect("server task");
}

/// Responses arriving in a different order than the requests were sent must
/// still resolve the matching callers.
#[tokio::test]
async fn test_out_of_order_responses_correlate() {
    let (listener, endpoint) = bind().await;

    let server = tokio::spawn(async move {
        let (mut reader, mut writer) = accept(&listener).await;
        let mut requests = Vec::new();
        for _ in 0..3 {
            requests.push(read_request(&mut reader).await);
        }
        // Reply in reverse order, echoing each request's method back.
        for request in requests.iter().rev() {
            let method = request["method"].clone();
            reply(&mut writer, request, json!({"method": method})).await;
        }
    });

    let client = RpcClient::connect(&endpoint).await.expect("connect");
    let (a, b, c) = timeout(
        TEST_TIMEOUT,
        futures::future::join3(
            client.call("First", None),
            client.call("Second", None),
            client.call("Third", None),
        ),
    )
    .await
    .expect("calls resolve");

    assert_eq!(a.expect("first")["method"], "First");
    assert_eq!(b.expect("second")["method"], "Second");
    assert_eq!(c.expect("third")["method"], "Third");

    client.close().await;
    server.await.expect("server task");
}

/// Volumes outside [0,100] are clamped before they reach the wire.
#[tokio::test]
async fn test_volume_clamped_on_the_wire() {
    let (listener, endpoint) = bind().await;
    let (seen_tx, mut seen_rx) = mpsc::unbounded_channel::<Value>();

    let server = tokio::spawn(async move {
        let (mut reader, mut writer) = accept(&listener).await;
        for _ in 0..2 {
            let request = read_request(&mut reader).await;
            seen_tx.send(request.clone()).expect("record request");
            reply(&mut writer, &request, json!({})).await;
        }
    });

    let mixer = Mixer::connect(&endpoint).await.expect("connect");
    mixer
        .set_client_volume_percent("kitchen", 150)
        .await
        .expect("overdrive set");
    mixer
        .set_client_volume_percent("kitchen", -5)
        .await
        .expect("negative set");

    let first = seen_rx.recv().await.expect("first request");
    assert_eq!(first["method"], "Client.SetVolume");
    assert_eq!(first["params"]["volume"]["percent"], 100);

    let second = seen_rx.recv().await.expect("second request");
    assert_eq!(second["params"]["volume"]["percent"], 0);

    mixer.close().await;
    server.await.expect("server task");
}

/// Relative adjustments read the current percent, apply the delta and
/// clamp before the write goes on the wire.
#[tokio::test]
async fn test_adjust_client_volume_clamps_at_edges() {
    let (listener, endpoint) = bind().await;
    let (seen_tx, mut seen_rx) = mpsc::unbounded_channel::<Value>();

    let server = tokio::spawn(async move {
        let (mut reader, mut writer) = accept(&listener).await;
        for percent in [98, 2] {
            let request = read_request(&mut reader).await;
            assert_eq!(request["method"], "Client.GetStatus");
            reply(
                &mut writer,
                &request,
                json!({
                    "client": {
                        "id": request["params"]["id"],
                        "connected": true,
                        "config": {"volume": {"percent": percent, "muted": false}},
                    },
                }),
            )
            .await;

            let request = read_request(&mut reader).await;
            seen_tx.send(request.clone()).expect("record request");
            reply(&mut writer, &request, json!({})).await;
        }
    });

    let mixer = Mixer::connect(&endpoint).await.expect("connect");
    timeout(TEST_TIMEOUT, mixer.adjust_client_volume("loud", 5))
        .await
        .expect("upward adjust resolves")
        .expect("upward adjust succeeds");
    timeout(TEST_TIMEOUT, mixer.adjust_client_volume("quiet", -5))
        .await
        .expect("downward adjust resolves")
        .expect("downward adjust succeeds");

    // 98 + 5 clamps to 100, 2 - 5 clamps to 0.
    let first = seen_rx.recv().await.expect("first set");
    assert_eq!(first["method"], "Client.SetVolume");
    assert_eq!(first["params"]["id"], "loud");
    assert_eq!(first["params"]["volume"]["percent"], 100);

    let second = seen_rx.recv().await.expect("second set");
    assert_eq!(second["params"]["id"], "quiet");
    assert_eq!(second["params"]["volume"]["percent"], 0);

    mixer.close().await;
    server.await.expect("server task");
}

/// A group-wide adjustment moves the loudest member by the delta, clamps
/// it and scales the rest to the clamped target.
#[tokio::test]
async fn test_adjust_group_volume_clamps_loudest_member() {
    let (listener, endpoint) = bind().await;
    let (seen_tx, mut seen_rx) = mpsc::unbounded_channel::<Value>();

    let server = tokio::spawn(async move {
        let (mut reader, mut writer) = accept(&listener).await;

        let request = read_request(&mut reader).await;
        assert_eq!(request["method"], "Group.GetStatus");
        reply(
            &mut writer,
            &request,
            json!({
                "group": {
                    "id": "g1",
                    "name": "Patio",
                    "muted": false,
                    "stream_id": "radio",
                    "clients": [
                        {
                            "id": "quiet",
                            "connected": true,
                            "config": {"volume": {"percent": 45, "muted": false}},
                        },
                        {
                            "id": "loud",
                            "connected": true,
                            "config": {"volume": {"percent": 90, "muted": false}},
                        },
                    ],
                },
            }),
        )
        .await;

        for _ in 0..2 {
            let request = read_request(&mut reader).await;
            seen_tx.send(request.clone()).expect("record request");
            reply(&mut writer, &request, json!({})).await;
        }
    });

    let mixer = Mixer::connect(&endpoint).await.expect("connect");
    timeout(TEST_TIMEOUT, mixer.adjust_group_volume("g1", 20))
        .await
        .expect("group adjust resolves")
        .expect("group adjust succeeds");

    // Loudest 90 + 20 clamps to 100; 45 scales by 100/90 to 50.
    let first = seen_rx.recv().await.expect("first member set");
    assert_eq!(first["method"], "Client.SetVolume");
    assert_eq!(first["params"]["id"], "quiet");
    assert_eq!(first["params"]["volume"]["percent"], 50);

    let second = seen_rx.recv().await.expect("second member set");
    assert_eq!(second["params"]["id"], "loud");
    assert_eq!(second["params"]["volume"]["percent"], 100);

    mixer.close().await;
    server.await.expect("server task");
}

/// A JSON-RPC error response fails only the one call; the connection stays
/// usable for the next one.
#[tokio::test]
async fn test_remote_error_is_local_to_the_call() {
    let (listener, endpoint) = bind().await;

    let server = tokio::spawn(async move {
        let (mut reader, mut writer) = accept(&listener).await;

        let request = read_request(&mut reader).await;
        let id = request["id"].clone();
        send(
            &mut writer,
            &json!({
                "jsonrpc": "2.0",
                "id": id,
                "error": {"code": -32603, "message": "no such client"},
            }),
        )
        .await;

        let request = read_request(&mut reader).await;
        reply(&mut writer, &request, json!({"ok": true})).await;
    });

    let client = RpcClient::connect(&endpoint).await.expect("connect");

    let err = timeout(TEST_TIMEOUT, client.call("Client.GetStatus", None))
        .await
        .expect("call resolves")
        .expect_err("remote error surfaces");
    match err {
        RpcError::Remote { code, message, .. } => {
            assert_eq!(code, -32603);
            assert_eq!(message, "no such client");
        }
        other => panic!("expected remote error, got {other:?}"),
    }
    assert_eq!(client.state(), ConnectionState::Open);

    let result = timeout(TEST_TIMEOUT, client.call("Server.GetStatus", None))
        .await
        .expect("follow-up resolves")
        .expect("follow-up succeeds");
    assert_eq!(result["ok"], true);

    client.close().await;
    server.await.expect("server task");
}

/// A result payload that does not fit the typed model fails only that
/// call; the connection stays open for the next one.
#[tokio::test]
async fn test_model_decode_failure_leaves_connection_open() {
    let (listener, endpoint) = bind().await;

    let server = tokio::spawn(async move {
        let (mut reader, mut writer) = accept(&listener).await;

        // Valid JSON, wrong shape: groups must be an array.
        let request = read_request(&mut reader).await;
        reply(&mut writer, &request, json!({"server": {"groups": 42}})).await;

        let request = read_request(&mut reader).await;
        reply(&mut writer, &request, json!({"server": {"groups": []}})).await;
    });

    let mixer = Mixer::connect(&endpoint).await.expect("connect");

    let err = timeout(TEST_TIMEOUT, mixer.get_server_status())
        .await
        .expect("status resolves")
        .expect_err("shape mismatch surfaces");
    assert!(matches!(err, RpcError::Decode(_)));
    assert_eq!(mixer.state(), ConnectionState::Open);

    let status = timeout(TEST_TIMEOUT, mixer.get_server_status())
        .await
        .expect("follow-up resolves")
        .expect("follow-up succeeds");
    assert!(status.groups.is_empty());

    mixer.close().await;
    server.await.expect("server task");
}

/// Dropping the connection fails every in-flight call and faults the client.
#[tokio::test]
async fn test_connection_loss_resolves_all_pending() {
    let (listener, endpoint) = bind().await;

    let server = tokio::spawn(async move {
        let (mut reader, _writer) = accept(&listener).await;
        // Take both requests, then hang up without answering.
        read_request(&mut reader).await;
        read_request(&mut reader).await;
    });

    let client = RpcClient::connect(&endpoint).await.expect("connect");
    let (a, b) = timeout(
        TEST_TIMEOUT,
        futures::future::join(client.call("First", None), client.call("Second", None)),
    )
    .await
    .expect("both calls resolve after hangup");

    assert!(matches!(a, Err(RpcError::ConnectionLost)));
    assert!(matches!(b, Err(RpcError::ConnectionLost)));
    assert_eq!(client.state(), ConnectionState::Faulted);

    let err = client
        .call("Third", None)
        .await
        .expect_err("faulted client rejects new calls");
    assert!(matches!(err, RpcError::NotConnected));

    server.await.expect("server task");
}

/// Messages without a pending id are routed to notification subscribers and
/// never disturb in-flight calls.
#[tokio::test]
async fn test_notifications_are_routed_to_subscribers() {
    let (listener, endpoint) = bind().await;

    let server = tokio::spawn(async move {
        let (mut reader, mut writer) = accept(&listener).await;
        let request = read_request(&mut reader).await;

        // Unsolicited notification, then a response carrying an id that was
        // never issued, then the real response.
        send(
            &mut writer,
            &json!({
                "jsonrpc": "2.0",
                "method": "Client.OnVolumeChanged",
                "params": {"id": "kitchen", "volume": {"percent": 40, "muted": false}},
            }),
        )
        .await;
        send(
            &mut writer,
            &json!({"jsonrpc": "2.0", "id": 999_999, "result": {}}),
        )
        .await;
        reply(&mut writer, &request, json!({"done": true})).await;
    });

    let client = RpcClient::connect(&endpoint).await.expect("connect");
    let mut notifications = client.subscribe();

    let result = timeout(TEST_TIMEOUT, client.call("Server.GetStatus", None))
        .await
        .expect("call resolves")
        .expect("call unaffected by interleaved traffic");
    assert_eq!(result["done"], true);

    let first = timeout(TEST_TIMEOUT, notifications.recv())
        .await
        .expect("notification within timeout")
        .expect("notification delivered");
    assert_eq!(first["method"], "Client.OnVolumeChanged");
    assert_eq!(first["params"]["id"], "kitchen");

    let second = timeout(TEST_TIMEOUT, notifications.recv())
        .await
        .expect("stray response within timeout")
        .expect("stray response delivered as notification");
    assert_eq!(second["id"], 999_999);

    client.close().await;
    server.await.expect("server task");
}

/// `notify` sends a frame without an id and does not wait for any reply.
#[tokio::test]
async fn test_notify_is_fire_and_forget() {
    let (listener, endpoint) = bind().await;

    let server = tokio::spawn(async move {
        let (mut reader, _writer) = accept(&listener).await;
        let frame = read_request(&mut reader).await;
        assert_eq!(frame["method"], "Stream.Heartbeat");
        assert!(frame.get("id").is_none());
    });

    let client = RpcClient::connect(&endpoint).await.expect("connect");
    timeout(TEST_TIMEOUT, client.notify("Stream.Heartbeat", None))
        .await
        .expect("notify resolves without a response")
        .expect("notify succeeds");

    server.await.expect("server task");
    client.close().await;
}

/// A response split across TCP segments is reassembled before dispatch.
#[tokio::test]
async fn test_split_response_is_reassembled() {
    let (listener, endpoint) = bind().await;

    let server = tokio::spawn(async move {
        let (mut reader, mut writer) = accept(&listener).await;
        let request = read_request(&mut reader).await;

        let id = request["id"].clone();
        let frame = serde_json::to_vec(&json!({
            "jsonrpc": "2.0",
            "id": id,
            "result": {"answer": "in pieces"},
        }))
        .expect("serialize");
        let (head, tail) = frame.split_at(frame.len() / 2);

        writer.write_all(head).await.expect("write head");
        writer.flush().await.expect("flush head");
        tokio::time::sleep(Duration::from_millis(50)).await;
        writer.write_all(tail).await.expect("write tail");
        writer.write_all(b"\r\n").await.expect("write terminator");
    });

    let client = RpcClient::connect(&endpoint).await.expect("connect");
    let result = timeout(TEST_TIMEOUT, client.call("Server.GetStatus", None))
        .await
        .expect("call resolves")
        .expect("call succeeds despite segmentation");
    assert_eq!(result["answer"], "in pieces");

    client.close().await;
    server.await.expect("server task");
}

/// Server.GetStatus decodes into the typed model through the facade.
#[tokio::test]
async fn test_get_server_status_decodes_model() {
    let (listener, endpoint) = bind().await;

    let server = tokio::spawn(async move {
        let (mut reader, mut writer) = accept(&listener).await;
        let request = read_request(&mut reader).await;
        assert_eq!(request["method"], "Server.GetStatus");
        reply(
            &mut writer,
            &request,
            json!({
                "server": {
                    "groups": [{
                        "id": "g1",
                        "name": "Kitchen",
                        "muted": false,
                        "stream_id": "spotify",
                        "clients": [{
                            "id": "pi",
                            "connected": true,
                            "host": {"name": "kitchen-pi", "ip": "10.0.0.7"},
                            "config": {
                                "name": "",
                                "latency": 0,
                                "volume": {"percent": 63, "muted": false},
                            },
                        }],
                    }],
                },
            }),
        )
        .await;
    });

    let mixer = Mixer::connect(&endpoint).await.expect("connect");
    let status = timeout(TEST_TIMEOUT, mixer.get_server_status())
        .await
        .expect("status resolves")
        .expect("status decodes");

    assert_eq!(status.groups.len(), 1);
    let group = &status.groups[0];
    assert_eq!(group.display_name(), "Kitchen");
    assert_eq!(group.stream_id, "spotify");
    let client = &group.clients[0];
    assert_eq!(client.display_name(), "kitchen-pi");
    assert_eq!(client.config.volume.percent, 63);

    mixer.close().await;
    server.await.expect("server task");
}

/// Group volume scales members proportionally to the loudest one.
#[tokio::test]
async fn test_group_volume_scales_members() {
    let (listener, endpoint) = bind().await;
    let (seen_tx, mut seen_rx) = mpsc::unbounded_channel::<Value>();

    let server = tokio::spawn(async move {
        let (mut reader, mut writer) = accept(&listener).await;

        let request = read_request(&mut reader).await;
        assert_eq!(request["method"], "Group.GetStatus");
        reply(
            &mut writer,
            &request,
            json!({
                "group": {
                    "id": "g1",
                    "name": "Everywhere",
                    "muted": false,
                    "stream_id": "radio",
                    "clients": [
                        {
                            "id": "quiet",
                            "connected": true,
                            "config": {"volume": {"percent": 50, "muted": false}},
                        },
                        {
                            "id": "loud",
                            "connected": true,
                            "config": {"volume": {"percent": 100, "muted": false}},
                        },
                    ],
                },
            }),
        )
        .await;

        for _ in 0..2 {
            let request = read_request(&mut reader).await;
            seen_tx.send(request.clone()).expect("record request");
            reply(&mut writer, &request, json!({})).await;
        }
    });

    let mixer = Mixer::connect(&endpoint).await.expect("connect");
    timeout(TEST_TIMEOUT, mixer.set_group_volume_percent("g1", 50))
        .await
        .expect("group set resolves")
        .expect("group set succeeds");

    // Loudest member (100) lands on the target, the other keeps its ratio.
    let first = seen_rx.recv().await.expect("first member set");
    assert_eq!(first["method"], "Client.SetVolume");
    assert_eq!(first["params"]["id"], "quiet");
    assert_eq!(first["params"]["volume"]["percent"], 25);

    let second = seen_rx.recv().await.expect("second member set");
    assert_eq!(second["params"]["id"], "loud");
    assert_eq!(second["params"]["volume"]["percent"], 50);

    mixer.close().await;
    server.await.expect("server task");
}

/// Closing twice is harmless and leaves the client in Disconnected.
#[tokio::test]
async fn test_close_is_idempotent() {
    let (listener, endpoint) = bind().await;

    let server = tokio::spawn(async move {
        let (mut reader, _writer) = accept(&listener).await;
        let mut line = String::new();
        // Drains until the client hangs up.
        while reader.read_line(&mut line).await.unwrap_or(0) > 0 {
            line.clear();
        }
    });

    let client = RpcClient::connect(&endpoint).await.expect("connect");
    assert_eq!(client.state(), ConnectionState::Open);

    client.close().await;
    assert_eq!(client.state(), ConnectionState::Disconnected);
    client.close().await;
    assert_eq!(client.state(), ConnectionState::Disconnected);

    let err = client
        .call("Server.GetStatus", None)
        .await
        .expect_err("closed client rejects calls");
    assert!(matches!(err, RpcError::NotConnected));

    timeout(TEST_TIMEOUT, server).await.expect("server exits").expect("server task");
}
