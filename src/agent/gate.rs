//! Single-flight admission gate for upstream connections
//!
//! The external analysis process effectively serves one in-flight request
//! at a time, so producers queue here before connecting. A permit is held
//! only through connection startup: it is released on the first inbound
//! event, not at stream completion, so a long-lived stream costs other
//! producers nothing beyond its own startup latency.

use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Deployment-wide admission gate of fixed capacity
#[derive(Debug, Clone)]
pub struct ConnectGate {
    sem: Arc<Semaphore>,
    capacity: usize,
}

impl ConnectGate {
    /// Create a gate admitting at most `capacity` concurrent connection
    /// attempts (minimum 1, nominally 1)
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            sem: Arc::new(Semaphore::new(capacity)),
            capacity,
        }
    }

    /// Wait for admission
    pub async fn admit(&self) -> GatePermit {
        // The semaphore is never closed, so acquisition cannot fail.
        let permit = Arc::clone(&self.sem).acquire_owned().await.ok();
        GatePermit { permit }
    }

    /// Configured capacity
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Permits currently available
    pub fn available(&self) -> usize {
        self.sem.available_permits()
    }
}

/// One admission through the gate
///
/// Released explicitly by the holder or implicitly on drop, whichever
/// comes first; further releases are no-ops. Over-release can never raise
/// the gate's effective capacity.
#[derive(Debug)]
pub struct GatePermit {
    permit: Option<OwnedSemaphorePermit>,
}

impl GatePermit {
    /// Give the permit back; safe to call any number of times
    pub fn release(&mut self) {
        if let Some(permit) = self.permit.take() {
            drop(permit);
        }
    }

    /// Whether the permit has already been given back
    pub fn is_released(&self) -> bool {
        self.permit.is_none()
    }
}
