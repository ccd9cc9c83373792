//! RPC client: one TCP connection, a reader task and a pending-call table.
//!
//! `RpcClient` composes the transport, the frame decoder and the request
//! correlator. A spawned reader task is the only consumer of the socket's
//! read half and the only mutator of the decode buffer; outbound writes go
//! through an async mutex over the write half. Independent calls are in
//! flight concurrently and resolve strictly by request id, in whatever
//! order the server answers.
//!
//! There is no automatic reconnection: once the connection faults, every
//! pending call resolves with `ConnectionLost` and every future call fails
//! with `NotConnected` until a new client is connected.

use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde_json::{json, Value};
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{broadcast, watch, Mutex};
use tracing::{debug, trace, warn};

use crate::rpc::correlator::Correlator;
use crate::rpc::framing::FrameDecoder;

/// Default control port of the audio server.
pub const DEFAULT_PORT: u16 = 1705;

/// Read chunk size for the socket reader task.
const READ_CHUNK_SIZE: usize = 4096;

/// Where the server lives. Immutable once constructed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
}

impl Endpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Error parsing a `HOST[:PORT]` endpoint string.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid port in endpoint {0:?}")]
pub struct InvalidEndpoint(pub String);

impl FromStr for Endpoint {
    type Err = InvalidEndpoint;

    /// Parse `HOST[:PORT]`, defaulting to port 1705.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.rsplit_once(':') {
            Some((host, port)) if !port.is_empty() => {
                let port = port
                    .parse::<u16>()
                    .map_err(|_| InvalidEndpoint(s.to_string()))?;
                Ok(Endpoint::new(host, port))
            }
            Some(_) => Err(InvalidEndpoint(s.to_string())),
            None => Ok(Endpoint::new(s, DEFAULT_PORT)),
        }
    }
}

/// Lifecycle of the single connection behind an `RpcClient`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Open,
    /// I/O error, decode error or peer close. Terminal; no reconnection.
    Faulted,
}

/// RPC-level error types.
///
/// Transport and decode failures are global: they fault the connection and
/// resolve every pending call with `ConnectionLost`. `Remote` errors are
/// local to the call that produced them and leave the connection open.
#[derive(Debug, Error)]
pub enum RpcError {
    /// Initial connection failed.
    #[error("connection failed: {0}")]
    Connect(#[source] std::io::Error),

    /// Call attempted while the connection is not open. No write attempted.
    #[error("not connected")]
    NotConnected,

    /// The connection faulted before this call's response arrived.
    #[error("connection lost")]
    ConnectionLost,

    /// Result payload that does not decode into the expected model.
    /// Local to the call; the connection stays open. Wire-level bytes
    /// that can never parse as JSON fault the connection instead, so
    /// callers observe those as `ConnectionLost`.
    #[error("unexpected result shape: {0}")]
    Decode(#[source] serde_json::Error),

    /// Server-reported application error for one specific call.
    #[error("server error {code}: {message}")]
    Remote {
        code: i64,
        message: String,
        data: Option<Value>,
    },

    /// Structurally valid JSON that violates the response contract.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// I/O error writing to an established connection.
    #[error("I/O error: {0}")]
    Io(#[source] std::io::Error),
}

struct Shared {
    /// Write half of the socket; taken on shutdown so late writers see
    /// `NotConnected` instead of a dead socket.
    writer: Mutex<Option<OwnedWriteHalf>>,
    correlator: Correlator,
    state_tx: watch::Sender<ConnectionState>,
    next_id: AtomicU64,
}

impl Shared {
    fn state(&self) -> ConnectionState {
        *self.state_tx.borrow()
    }

    /// Tear the connection down: flip the state, release the socket and
    /// resolve every pending call as lost. Idempotent; the state only
    /// transitions out of Connecting/Open, so a `close()` after a fault
    /// stays Faulted.
    async fn shutdown(&self, next: ConnectionState) {
        self.state_tx.send_if_modified(|state| {
            if matches!(state, ConnectionState::Connecting | ConnectionState::Open) {
                *state = next;
                true
            } else {
                false
            }
        });

        let writer = self.writer.lock().await.take();
        if let Some(mut writer) = writer {
            let _ = writer.shutdown().await;
        }

        self.correlator.fail_all();
    }
}

/// JSON-RPC 2.0 client over a persistent TCP connection.
///
/// # Connection Lifecycle
///
/// - `connect()` - establish the single connection for this client
/// - `call()` - send a request, await the correlated response
/// - `notify()` - fire-and-forget message without an id
/// - `subscribe()` - stream of unsolicited server messages
/// - `close()` - release the connection; idempotent
///
/// # Example
///
/// ```ignore
/// let client = RpcClient::connect(&"localhost:1705".parse()?).await?;
/// let status = client.call("Server.GetStatus", None).await?;
/// ```
pub struct RpcClient {
    shared: Arc<Shared>,
    reader: tokio::task::JoinHandle<()>,
}

impl RpcClient {
    /// Connect to the server's control port.
    ///
    /// # Errors
    ///
    /// Returns `RpcError::Connect` if the TCP connection cannot be
    /// established (refused, unreachable, lookup failure).
    pub async fn connect(endpoint: &Endpoint) -> Result<Self, RpcError> {
        let (state_tx, _) = watch::channel(ConnectionState::Connecting);

        debug!("connecting to {}", endpoint);
        let stream = TcpStream::connect((endpoint.host.as_str(), endpoint.port))
            .await
            .map_err(RpcError::Connect)?;
        // Volume nudges are tiny writes; don't let Nagle sit on them.
        let _ = stream.set_nodelay(true);

        let (read_half, write_half) = stream.into_split();

        let shared = Arc::new(Shared {
            writer: Mutex::new(Some(write_half)),
            correlator: Correlator::new(),
            state_tx,
            next_id: AtomicU64::new(1),
        });
        shared.state_tx.send_replace(ConnectionState::Open);

        let reader = tokio::spawn(read_loop(read_half, Arc::clone(&shared)));

        Ok(Self { shared, reader })
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        self.shared.state()
    }

    /// Watch channel following the connection state. The UI layer uses
    /// this to distinguish a faulted connection from a failed adjustment.
    pub fn state_changes(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state_tx.subscribe()
    }

    /// Subscribe to unsolicited server messages. Every subscriber receives
    /// every message, in the order they were decoded off the wire.
    pub fn subscribe(&self) -> broadcast::Receiver<Value> {
        self.shared.correlator.subscribe()
    }

    /// Send a request and await its correlated response.
    ///
    /// Suspends only the issuing task; other calls may be in flight
    /// concurrently, and responses may arrive in any order. There is no
    /// built-in timeout - wrap in `tokio::time::timeout` if one is needed.
    ///
    /// # Errors
    ///
    /// - `NotConnected` if the connection is not open (nothing is written)
    /// - `ConnectionLost` if the connection faults before the response
    /// - `Remote` if the server answers with an `error` object
    /// - `Protocol` if the response carries neither `result` nor `error`
    pub async fn call(&self, method: &str, params: Option<Value>) -> Result<Value, RpcError> {
        if self.state() != ConnectionState::Open {
            return Err(RpcError::NotConnected);
        }

        let id = self.shared.next_id.fetch_add(1, Ordering::Relaxed);
        let handle = self.shared.correlator.register(id);

        let mut request = json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
        });
        if let Some(params) = params {
            request["params"] = params;
        }

        trace!(id, method, "sending request");
        if let Err(e) = self.write_frame(&request).await {
            self.shared.correlator.discard(id);
            return Err(e);
        }

        let response = handle.await.map_err(|_| RpcError::ConnectionLost)?;
        extract_result(response)
    }

    /// Send a notification: same envelope as `call` but without an `id`,
    /// so no response is possible and none is awaited.
    pub async fn notify(&self, method: &str, params: Option<Value>) -> Result<(), RpcError> {
        if self.state() != ConnectionState::Open {
            return Err(RpcError::NotConnected);
        }

        let mut message = json!({
            "jsonrpc": "2.0",
            "method": method,
        });
        if let Some(params) = params {
            message["params"] = params;
        }

        trace!(method, "sending notification");
        self.write_frame(&message).await
    }

    /// Release the connection. Idempotent; safe to race with a fault.
    pub async fn close(&self) {
        self.shared.shutdown(ConnectionState::Disconnected).await;
        self.reader.abort();
    }

    /// Serialize and write one CRLF-terminated message. A write failure
    /// faults the whole connection.
    async fn write_frame(&self, message: &Value) -> Result<(), RpcError> {
        let mut payload = serde_json::to_vec(message)
            .map_err(|e| RpcError::Protocol(format!("failed to serialize request: {e}")))?;
        payload.extend_from_slice(b"\r\n");

        let mut guard = self.shared.writer.lock().await;
        let writer = guard.as_mut().ok_or(RpcError::NotConnected)?;

        let result = async {
            writer.write_all(&payload).await?;
            writer.flush().await
        }
        .await;

        if let Err(e) = result {
            drop(guard);
            warn!("write failed, faulting connection: {e}");
            self.shared.shutdown(ConnectionState::Faulted).await;
            return Err(RpcError::Io(e));
        }
        Ok(())
    }
}

impl Drop for RpcClient {
    fn drop(&mut self) {
        // The reader task holds the read half; don't leave it running
        // against a client nobody can observe.
        self.reader.abort();
    }
}

/// Reader task: the sole consumer of the read half and the decode buffer.
///
/// Terminates on orderly peer close, I/O error or fatal decode error; all
/// three fault the connection, which resolves every pending call.
async fn read_loop(mut read_half: OwnedReadHalf, shared: Arc<Shared>) {
    let mut decoder = FrameDecoder::new();
    let mut chunk = [0u8; READ_CHUNK_SIZE];

    loop {
        match read_half.read(&mut chunk).await {
            Ok(0) => {
                debug!("server closed the connection");
                break;
            }
            Ok(n) => {
                decoder.push(&chunk[..n]);
                loop {
                    match decoder.next_value() {
                        Ok(Some(value)) => {
                            trace!("decoded message: {value}");
                            shared.correlator.dispatch(value);
                        }
                        Ok(None) => break,
                        Err(e) => {
                            warn!("fatal decode error: {e}");
                            shared.shutdown(ConnectionState::Faulted).await;
                            return;
                        }
                    }
                }
            }
            Err(e) => {
                warn!("read error: {e}");
                break;
            }
        }
    }

    shared.shutdown(ConnectionState::Faulted).await;
}

/// Split a decoded response into `Ok(result)` or the remote error.
fn extract_result(mut response: Value) -> Result<Value, RpcError> {
    if let Some(error) = response.get("error") {
        let code = error.get("code").and_then(Value::as_i64).unwrap_or(-1);
        let message = error
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("unknown server error")
            .to_string();
        let data = error.get("data").cloned();
        return Err(RpcError::Remote {
            code,
            message,
            data,
        });
    }

    match response.get_mut("result") {
        Some(result) => Ok(result.take()),
        None => Err(RpcError::Protocol(
            "response carries neither result nor error".to_string(),
        )),
    }
}
