//! Replay buffer for late-joiner support
//!
//! A subscriber joining an already-running stream receives the most recent
//! messages before live fan-out resumes. The window is intentionally small:
//! live commentary is ephemeral and durable history lives elsewhere.

use std::collections::VecDeque;

use super::message::OutgoingMessage;

/// Fixed-depth ring of the most recently published messages
#[derive(Debug)]
pub struct ReplayBuffer {
    /// Maximum number of retained messages
    depth: usize,
    /// Retained messages, oldest first
    messages: VecDeque<OutgoingMessage>,
}

impl ReplayBuffer {
    /// Create a buffer retaining at most `depth` messages
    ///
    /// A depth of zero disables replay entirely.
    pub fn new(depth: usize) -> Self {
        Self {
            depth,
            messages: VecDeque::with_capacity(depth),
        }
    }

    /// Record a published message, evicting the oldest when full
    pub fn push(&mut self, message: OutgoingMessage) {
        if self.depth == 0 {
            return;
        }
        if self.messages.len() == self.depth {
            self.messages.pop_front();
        }
        self.messages.push_back(message);
    }

    /// Messages to replay to a new subscriber, oldest first
    pub fn catchup(&self) -> Vec<OutgoingMessage> {
        self.messages.iter().cloned().collect()
    }

    /// Number of retained messages
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    /// Whether the buffer holds no messages
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}
