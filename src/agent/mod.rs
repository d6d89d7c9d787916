//! Gateway to the external video-analysis process
//!
//! Producers reach the analysis process through two pieces: the
//! deployment-wide [`ConnectGate`] serializing connection attempts, and an
//! [`AgentConnector`] that opens one connection and yields decoded
//! [`AgentEvent`]s.

pub mod connector;
pub mod event;
pub mod gate;

pub use connector::{AgentConnection, AgentConnector, WsConnector};
pub use event::{decode_frame, AgentEvent, DecodeError};
pub use gate::{ConnectGate, GatePermit};
