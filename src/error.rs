//! Crate-level error types

use crate::agent::DecodeError;
use crate::registry::RegistryError;

/// Convenience result alias used throughout the crate
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error type
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// I/O failure (bind, accept, socket configuration)
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// Upstream analysis connection failed
    #[error("upstream connection error: {0}")]
    Upstream(#[from] tokio_tungstenite::tungstenite::Error),

    /// Upstream sent a frame we could not decode
    #[error("upstream decode error: {0}")]
    Decode(#[from] DecodeError),

    /// Registry refused the operation
    #[error("registry error: {0}")]
    Registry(#[from] RegistryError),

    /// Outgoing frame could not be serialized
    #[error("frame serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}
