//! Relay server edge
//!
//! The HTTP/WebSocket surface: subscriber sessions, server configuration,
//! and the application wiring.

pub mod app;
pub mod config;
pub mod session;

pub use app::RelayServer;
pub use config::ServerConfig;
pub use session::ConnectQuery;
