//! snapmix library
//!
//! Core components for the snapmix terminal mixer:
//!
//! - `rpc` - streaming JSON-RPC 2.0 client over a persistent TCP connection
//! - `control` - mixer facade mapping server semantics onto RPC calls
//! - `models` - server-reported entities (groups, clients, volumes)
//!
//! # RPC Module
//!
//! The `rpc` module owns the connection: transport, frame decoding, request
//! correlation and the unsolicited-notification stream. The `control::Mixer`
//! facade is the recommended way to talk to the server:
//!
//! ```ignore
//! use snapmix::control::Mixer;
//! use snapmix::rpc::{Endpoint, RpcClient};
//!
//! let endpoint: Endpoint = "localhost:1705".parse()?;
//! let mixer = Mixer::new(RpcClient::connect(&endpoint).await?);
//! let status = mixer.get_server_status().await?;
//! mixer.set_client_volume_percent("kitchen", 40).await?;
//! ```

pub mod control;
pub mod models;
pub mod rpc;
