//! Registry configuration

use std::time::Duration;

/// Configuration for the stream registry
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// Number of recent messages replayed to a late joiner
    pub replay_depth: usize,

    /// Capacity of the per-stream broadcast channel
    ///
    /// A subscriber falling more than this many messages behind loses the
    /// oldest ones; the producer is never blocked.
    pub channel_capacity: usize,

    /// Grace period before an unreferenced stream entry is torn down
    pub idle_grace: Duration,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            replay_depth: 3,
            channel_capacity: 64,
            idle_grace: Duration::from_secs(30),
        }
    }
}

impl RegistryConfig {
    /// Set the replay depth
    pub fn replay_depth(mut self, depth: usize) -> Self {
        self.replay_depth = depth;
        self
    }

    /// Set the broadcast channel capacity (minimum 1)
    pub fn channel_capacity(mut self, capacity: usize) -> Self {
        self.channel_capacity = capacity.max(1);
        self
    }

    /// Set the idle teardown grace period
    pub fn idle_grace(mut self, grace: Duration) -> Self {
        self.idle_grace = grace;
        self
    }
}
