//! Live commentary stream relay
//!
//! `livecast` ingests the near-real-time highlight/commentary stream an
//! external video-analysis process produces and redistributes it to any
//! number of WebSocket subscribers, persisting each commentary chunk to
//! object storage and a metadata store along the way.
//!
//! The crate is organized around one invariant: **at most one upstream
//! producer per distinct `(source URL, liveness)` pair**, no matter how
//! many subscribers join, how quickly they come and go, or how slowly they
//! read.
//!
//! - [`registry`]: the per-key stream registry. It lazily starts one
//!   producer per key, fans its messages out with a small replay window,
//!   and tears entries down after an idle grace period.
//! - [`producer`]: the task driving one agent connection, translating
//!   analysis events into outgoing frames and dispatching persistence off
//!   the publish path.
//! - [`agent`]: the gateway to the analysis process, with a
//!   deployment-wide single-flight admission gate plus the connection
//!   seam and event decoder.
//! - [`server`]: the WebSocket edge and HTTP assembly.
//! - [`sink`]: the object-storage/metadata-store collaborator contract.
//! - [`wire`]: the JSON message vocabularies on both edges.
//!
//! # Quick start
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use livecast::agent::WsConnector;
//! use livecast::sink::LogSink;
//! use livecast::{RelayServer, ServerConfig};
//!
//! #[tokio::main]
//! async fn main() -> livecast::Result<()> {
//!     let config = ServerConfig::default();
//!     let connector = Arc::new(WsConnector::new(config.agent_endpoint.clone()));
//!     let server = RelayServer::new(config, connector, Arc::new(LogSink));
//!
//!     server.run().await
//! }
//! ```

pub mod agent;
pub mod error;
pub mod producer;
pub mod registry;
pub mod server;
pub mod sink;
pub mod wire;

pub use error::{Error, Result};
pub use registry::{
    OutgoingMessage, RegistryConfig, StreamHandle, StreamKey, StreamRegistry, StreamStats,
};
pub use server::{RelayServer, ServerConfig};
