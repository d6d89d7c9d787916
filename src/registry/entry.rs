//! Stream entry and producer handle types
//!
//! This module defines the per-stream state stored in the registry: the
//! broadcast channel, the replay buffer, the reference count, and the
//! handle to the upstream producer task.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::{broadcast, watch, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::config::RegistryConfig;
use super::message::{OutgoingMessage, StreamKey};
use super::replay::ReplayBuffer;

/// Lifecycle state of a producer task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProducerState {
    /// Spawned, not yet requesting upstream admission
    Idle,
    /// Waiting for the upstream admission gate
    Connecting,
    /// Admitted and connected, waiting for the first upstream event
    Gated,
    /// Receiving upstream events and publishing
    Streaming,
    /// Upstream finished cleanly
    Completed,
    /// Upstream connection or decoding failed
    Failed,
    /// Torn down by the registry
    Cancelled,
}

impl ProducerState {
    /// Whether the producer has terminated
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

/// Handle to a running producer task
///
/// Owned by the stream entry. Cancelling the token is the only way the
/// registry stops a producer; the task itself decides when it is finished.
#[derive(Debug)]
pub struct ProducerHandle {
    join: JoinHandle<()>,
    cancel: CancellationToken,
    state: watch::Receiver<ProducerState>,
}

impl ProducerHandle {
    /// Create a handle from the pieces a producer spawner returns
    pub fn new(
        join: JoinHandle<()>,
        cancel: CancellationToken,
        state: watch::Receiver<ProducerState>,
    ) -> Self {
        Self {
            join,
            cancel,
            state,
        }
    }

    /// Current producer state
    pub fn state(&self) -> ProducerState {
        *self.state.borrow()
    }

    /// Watch receiver observing state transitions
    pub fn watch(&self) -> watch::Receiver<ProducerState> {
        self.state.clone()
    }

    /// Whether the producer has terminated (or its task is gone)
    pub fn is_terminal(&self) -> bool {
        self.state().is_terminal() || self.join.is_finished()
    }

    /// Cancel the producer and wait for its task to exit
    pub async fn shutdown(self) {
        self.cancel.cancel();
        if let Err(e) = self.join.await {
            if e.is_panic() {
                tracing::error!(error = %e, "producer task panicked");
            }
        }
    }
}

/// Starts the upstream producer for a stream entry
///
/// Implemented by the producer module; the registry only knows how to ask
/// for a producer and how to cancel the handle it gets back.
pub trait ProducerStarter: Send + Sync {
    /// Spawn a producer task publishing into `publisher`
    fn start(&self, key: &StreamKey, publisher: StreamPublisher) -> ProducerHandle;
}

/// Publish side of a stream entry
///
/// Handed to the producer task. Publishing is non-blocking: the message is
/// recorded in the replay buffer and broadcast to whoever is currently
/// listening; a slow subscriber loses old messages rather than slowing the
/// producer down.
#[derive(Debug, Clone)]
pub struct StreamPublisher {
    key: StreamKey,
    shared: Arc<PublishShared>,
}

impl StreamPublisher {
    /// Key of the stream this publisher feeds
    pub fn key(&self) -> &StreamKey {
        &self.key
    }

    /// Publish a message to all current subscribers
    ///
    /// Returns the number of subscribers that were listening.
    pub fn publish(&self, message: OutgoingMessage) -> usize {
        // The broadcast send happens under the replay lock so that a
        // joining subscriber sees each message exactly once: either in its
        // catch-up snapshot or on its receiver, never both.
        let mut replay = self
            .shared
            .replay
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        replay.push(message.clone());
        self.shared.published.fetch_add(1, Ordering::Relaxed);
        self.shared.tx.send(message).unwrap_or(0)
    }
}

/// State shared between the entry and its publisher
#[derive(Debug)]
struct PublishShared {
    tx: broadcast::Sender<OutgoingMessage>,
    replay: std::sync::Mutex<ReplayBuffer>,
    published: AtomicU64,
}

/// Mutable bookkeeping guarded by the entry lock
pub(super) struct EntryState {
    /// Number of outstanding subscriber handles
    pub(super) ref_count: usize,
    /// Keep the entry alive with zero subscribers (background mode)
    pub(super) keep_alive: bool,
    /// Active producer, if any
    pub(super) producer: Option<ProducerHandle>,
    /// Pending delayed teardown timer, if any
    pub(super) idle_teardown: Option<JoinHandle<()>>,
}

/// Entry for a single stream in the registry
pub struct StreamEntry {
    key: StreamKey,
    shared: Arc<PublishShared>,
    pub(super) state: Mutex<EntryState>,
}

impl StreamEntry {
    /// Create a new entry with no subscribers and no producer
    pub(crate) fn new(key: StreamKey, config: &RegistryConfig) -> Self {
        let (tx, _) = broadcast::channel(config.channel_capacity);

        Self {
            key,
            shared: Arc::new(PublishShared {
                tx,
                replay: std::sync::Mutex::new(ReplayBuffer::new(config.replay_depth)),
                published: AtomicU64::new(0),
            }),
            state: Mutex::new(EntryState {
                ref_count: 0,
                keep_alive: false,
                producer: None,
                idle_teardown: None,
            }),
        }
    }

    /// Key identifying this entry
    pub fn key(&self) -> &StreamKey {
        &self.key
    }

    /// Publish handle for the producer task
    pub(crate) fn publisher(&self) -> StreamPublisher {
        StreamPublisher {
            key: self.key.clone(),
            shared: Arc::clone(&self.shared),
        }
    }

    /// Subscribe to this entry's channel
    ///
    /// Returns a receiver plus the replay catch-up batch, oldest first.
    pub(crate) fn subscribe(&self) -> (broadcast::Receiver<OutgoingMessage>, Vec<OutgoingMessage>) {
        // Taken under the replay lock to order against concurrent
        // publishes; see `StreamPublisher::publish`.
        let replay = self
            .shared
            .replay
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let rx = self.shared.tx.subscribe();
        let catchup = replay.catchup();
        (rx, catchup)
    }

    /// Total messages published onto this entry
    pub fn messages_published(&self) -> u64 {
        self.shared.published.load(Ordering::Relaxed)
    }

    /// Snapshot of this entry's state
    pub async fn stats(&self) -> StreamStats {
        let state = self.state.lock().await;
        StreamStats {
            source_url: self.key.source_url.clone(),
            is_live: self.key.is_live,
            subscribers: state.ref_count,
            keep_alive: state.keep_alive,
            producer_state: state
                .producer
                .as_ref()
                .map(|p| p.state())
                .unwrap_or(ProducerState::Idle),
            messages_published: self.messages_published(),
        }
    }
}

/// Statistics for a stream
#[derive(Debug, Clone, Serialize)]
pub struct StreamStats {
    /// Source video URL
    pub source_url: String,
    /// Liveness flag of the key
    pub is_live: bool,
    /// Number of active subscribers
    pub subscribers: usize,
    /// Whether background keep-alive is set
    pub keep_alive: bool,
    /// Current producer state
    pub producer_state: ProducerState,
    /// Messages published since the entry was created
    pub messages_published: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_publish_reaches_subscriber() {
        let entry = StreamEntry::new(
            StreamKey::new("https://example.com/v", true),
            &RegistryConfig::default(),
        );
        let publisher = entry.publisher();
        let (mut rx, catchup) = entry.subscribe();
        assert!(catchup.is_empty());

        let listening = publisher.publish(OutgoingMessage::text("hello"));
        assert_eq!(listening, 1);

        let received = rx.recv().await.unwrap();
        assert_eq!(received.as_text(), Some("hello"));
        assert_eq!(entry.messages_published(), 1);
    }

    #[tokio::test]
    async fn test_publish_without_subscribers_is_not_an_error() {
        let entry = StreamEntry::new(
            StreamKey::new("https://example.com/v", true),
            &RegistryConfig::default(),
        );
        let publisher = entry.publisher();

        assert_eq!(publisher.publish(OutgoingMessage::text("nobody")), 0);
        assert_eq!(entry.messages_published(), 1);
    }

    #[tokio::test]
    async fn test_late_subscriber_gets_replay_window() {
        let config = RegistryConfig::default().replay_depth(3);
        let entry = StreamEntry::new(StreamKey::new("https://example.com/v", true), &config);
        let publisher = entry.publisher();

        for n in 1..=5 {
            publisher.publish(OutgoingMessage::text(format!("msg-{n}")));
        }

        let (_rx, catchup) = entry.subscribe();
        let texts: Vec<_> = catchup.iter().filter_map(|m| m.as_text()).collect();
        assert_eq!(texts, vec!["msg-3", "msg-4", "msg-5"]);
    }

    #[test]
    fn test_producer_state_terminal() {
        assert!(ProducerState::Completed.is_terminal());
        assert!(ProducerState::Failed.is_terminal());
        assert!(ProducerState::Cancelled.is_terminal());
        assert!(!ProducerState::Streaming.is_terminal());
        assert!(!ProducerState::Connecting.is_terminal());
    }
}
