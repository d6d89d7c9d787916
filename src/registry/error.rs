//! Registry error types

/// Error type for registry operations
#[derive(Debug, Clone, thiserror::Error)]
pub enum RegistryError {
    /// The registry has been shut down and accepts no new subscribers
    #[error("registry is shut down")]
    ShutDown,
}

/// Error returned when reading the next message from a stream handle
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum StreamRecvError {
    /// The subscriber fell behind and `n` messages were dropped for it
    ///
    /// The subscription is still usable; the next read resumes at the
    /// oldest retained message.
    #[error("subscriber lagged, {0} messages dropped")]
    Lagged(u64),

    /// The stream entry was torn down and no further messages will arrive
    #[error("stream closed")]
    Closed,
}
