//! Streaming JSON-RPC 2.0 client for the audio server's control port.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────┐          TCP byte stream          ┌──────────────────┐
//! │  snapmix    │ ◄────────────────────────────────►│  audio server    │
//! │ (RpcClient) │   JSON-RPC 2.0, CRLF-terminated   │  (control port)  │
//! └─────────────┘                                   └──────────────────┘
//! ```
//!
//! # Protocol
//!
//! Each message is one JSON object. Outbound messages are terminated with
//! CRLF as a transmission convenience, but inbound message boundaries are
//! determined purely by JSON structure - there is no length prefix. The
//! frame decoder accumulates raw chunks and extracts every complete value,
//! keeping any partial tail for the next chunk.
//!
//! Inbound objects are classified by their `id`: a value whose `id` matches
//! a pending request resolves that request; everything else is forwarded on
//! the unsolicited-notification stream.
//!
//! # Usage
//!
//! ```ignore
//! use snapmix::rpc::{Endpoint, RpcClient};
//! use serde_json::json;
//!
//! let client = RpcClient::connect(&"localhost:1705".parse()?).await?;
//! let status = client.call("Server.GetStatus", None).await?;
//! let mut notifications = client.subscribe();
//! ```

mod client;
mod correlator;
mod framing;

pub use client::{ConnectionState, Endpoint, InvalidEndpoint, RpcClient, RpcError, DEFAULT_PORT};
pub use framing::FrameDecoder;
