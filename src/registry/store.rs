//! Stream registry implementation
//!
//! The central registry that owns all active stream entries. It starts
//! exactly one producer per distinct stream key, hands out subscriber
//! handles, and tears entries down once they are unreferenced and their
//! idle grace period has elapsed.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::{broadcast, RwLock};

use super::config::RegistryConfig;
use super::entry::{ProducerStarter, StreamEntry, StreamStats};
use super::error::{RegistryError, StreamRecvError};
use super::message::{OutgoingMessage, StreamKey};

/// Subscription handle binding one subscriber to a stream entry
///
/// Obtained from [`StreamRegistry::acquire`] and given back to
/// [`StreamRegistry::release`]. Consuming the handle on release is what
/// guarantees the acquire/release pairing.
pub struct StreamHandle {
    key: StreamKey,
    rx: broadcast::Receiver<OutgoingMessage>,
    catchup: Vec<OutgoingMessage>,
}

impl StreamHandle {
    /// Key of the subscribed stream
    pub fn key(&self) -> &StreamKey {
        &self.key
    }

    /// Replay messages published before this subscriber joined, oldest
    /// first
    ///
    /// At most the registry's configured replay depth. Returns the batch
    /// once; subsequent calls return an empty vec.
    pub fn take_catchup(&mut self) -> Vec<OutgoingMessage> {
        std::mem::take(&mut self.catchup)
    }

    /// Wait for the next published message
    ///
    /// A lagged subscriber gets [`StreamRecvError::Lagged`] once, then
    /// resumes at the oldest retained message. [`StreamRecvError::Closed`]
    /// means the entry was torn down.
    pub async fn recv(&mut self) -> Result<OutgoingMessage, StreamRecvError> {
        match self.rx.recv().await {
            Ok(message) => Ok(message),
            Err(broadcast::error::RecvError::Lagged(n)) => Err(StreamRecvError::Lagged(n)),
            Err(broadcast::error::RecvError::Closed) => Err(StreamRecvError::Closed),
        }
    }
}

/// Central registry for all active streams
///
/// Thread-safe via `RwLock`; entry creation happens under the write lock so
/// concurrent first-joins on the same key can never start two producers.
pub struct StreamRegistry {
    /// Map of stream key to stream entry
    streams: RwLock<HashMap<StreamKey, Arc<StreamEntry>>>,

    /// Spawns the upstream producer for new entries
    starter: Arc<dyn ProducerStarter>,

    /// Configuration
    config: RegistryConfig,

    /// Set once by [`shutdown`](Self::shutdown); no new entries after that
    shut_down: AtomicBool,
}

impl StreamRegistry {
    /// Create a new registry
    pub fn new(config: RegistryConfig, starter: Arc<dyn ProducerStarter>) -> Arc<Self> {
        Arc::new(Self {
            streams: RwLock::new(HashMap::new()),
            starter,
            config,
            shut_down: AtomicBool::new(false),
        })
    }

    /// Get the registry configuration
    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    /// Subscribe to a stream, creating it on first join
    ///
    /// Creating the entry also starts its producer. Any pending idle
    /// teardown for the key is cancelled.
    pub async fn acquire(&self, key: &StreamKey) -> Result<StreamHandle, RegistryError> {
        if self.shut_down.load(Ordering::Acquire) {
            return Err(RegistryError::ShutDown);
        }

        // Fast path: entry already exists
        {
            let streams = self.streams.read().await;
            if let Some(entry) = streams.get(key) {
                return Ok(self.join_entry(entry).await);
            }
        }

        let mut streams = self.streams.write().await;

        // Double-check: another acquire may have created the entry while we
        // waited for the write lock
        if let Some(entry) = streams.get(key) {
            return Ok(self.join_entry(entry).await);
        }

        let entry = Arc::new(StreamEntry::new(key.clone(), &self.config));
        {
            let mut state = entry.state.lock().await;
            state.producer = Some(self.starter.start(key, entry.publisher()));
        }
        streams.insert(key.clone(), Arc::clone(&entry));

        tracing::info!(stream = %key, "stream entry created");

        Ok(self.join_entry(&entry).await)
    }

    /// Release a subscriber handle
    ///
    /// When the last handle for a non-keep-alive entry is released, a
    /// delayed teardown is scheduled after the configured grace period.
    pub async fn release(self: &Arc<Self>, handle: StreamHandle) {
        let StreamHandle { key, .. } = handle;

        let streams = self.streams.read().await;
        let Some(entry) = streams.get(&key) else {
            tracing::warn!(stream = %key, "release for unknown stream");
            return;
        };

        let mut state = entry.state.lock().await;
        state.ref_count = state.ref_count.saturating_sub(1);

        tracing::debug!(
            stream = %key,
            subscribers = state.ref_count,
            "subscriber released"
        );

        if state.ref_count == 0 && !state.keep_alive && !self.shut_down.load(Ordering::Acquire) {
            if let Some(timer) = state.idle_teardown.take() {
                timer.abort();
            }

            let registry = Arc::clone(self);
            let grace = self.config.idle_grace;
            let timer_key = key.clone();
            state.idle_teardown = Some(tokio::spawn(async move {
                tokio::time::sleep(grace).await;
                registry.try_teardown(&timer_key).await;
            }));

            tracing::debug!(
                stream = %key,
                grace_secs = grace.as_secs(),
                "idle teardown scheduled"
            );
        }
    }

    /// Start a stream in background mode, keeping it alive with zero
    /// subscribers
    ///
    /// Creates the entry and producer if needed and cancels any pending
    /// idle teardown. Idempotent.
    pub async fn ensure_background_start(&self, key: &StreamKey) -> Result<(), RegistryError> {
        if self.shut_down.load(Ordering::Acquire) {
            return Err(RegistryError::ShutDown);
        }

        let mut streams = self.streams.write().await;

        let entry = match streams.get(key) {
            Some(entry) => Arc::clone(entry),
            None => {
                let entry = Arc::new(StreamEntry::new(key.clone(), &self.config));
                streams.insert(key.clone(), Arc::clone(&entry));
                tracing::info!(stream = %key, "stream entry created (background)");
                entry
            }
        };

        let mut state = entry.state.lock().await;
        if let Some(timer) = state.idle_teardown.take() {
            timer.abort();
        }
        self.ensure_producer(&entry, &mut state);
        if !state.keep_alive {
            state.keep_alive = true;
            tracing::info!(stream = %key, "background keep-alive enabled");
        }

        Ok(())
    }

    /// Clear a stream's background mode
    ///
    /// If no subscribers remain the entry is torn down immediately.
    pub async fn stop_background(&self, key: &StreamKey) {
        let entry = {
            let streams = self.streams.read().await;
            match streams.get(key) {
                Some(entry) => Arc::clone(entry),
                None => return,
            }
        };

        let teardown_now = {
            let mut state = entry.state.lock().await;
            if !state.keep_alive {
                return;
            }
            state.keep_alive = false;
            tracing::info!(stream = %key, "background keep-alive cleared");

            if state.ref_count == 0 {
                if let Some(timer) = state.idle_teardown.take() {
                    timer.abort();
                }
                true
            } else {
                false
            }
        };

        if teardown_now {
            self.try_teardown(key).await;
        }
    }

    /// Tear down an entry if it is still unreferenced and not kept alive
    ///
    /// Called by fired idle timers and by [`stop_background`]; the
    /// precondition is re-validated under the locks, so a subscriber that
    /// arrived after the timer was scheduled keeps the entry.
    async fn try_teardown(&self, key: &StreamKey) {
        let producer = {
            let mut streams = self.streams.write().await;
            let Some(entry) = streams.get(key).map(Arc::clone) else {
                return;
            };

            let producer = {
                let mut state = entry.state.lock().await;
                if state.ref_count > 0 || state.keep_alive {
                    tracing::debug!(stream = %key, "teardown skipped, entry in use");
                    return;
                }
                // May be the handle of the timer task running right now;
                // dropping it only detaches, which is what we want.
                state.idle_teardown.take();
                state.producer.take()
            };

            streams.remove(key);
            producer
        };

        if let Some(producer) = producer {
            producer.shutdown().await;
        }

        tracing::info!(stream = %key, "stream entry removed");
    }

    /// Cancel every producer and timer and refuse new work
    ///
    /// Used at server shutdown. Producers are cancelled first, then joined,
    /// so slow upstream closes overlap.
    pub async fn shutdown(&self) {
        self.shut_down.store(true, Ordering::Release);

        let entries: Vec<(StreamKey, Arc<StreamEntry>)> = {
            let mut streams = self.streams.write().await;
            streams.drain().collect()
        };

        let mut producers = Vec::with_capacity(entries.len());
        for (key, entry) in entries {
            let mut state = entry.state.lock().await;
            if let Some(timer) = state.idle_teardown.take() {
                timer.abort();
            }
            if let Some(producer) = state.producer.take() {
                producers.push((key, producer));
            }
        }

        for (key, producer) in producers {
            producer.shutdown().await;
            tracing::debug!(stream = %key, "producer stopped");
        }

        tracing::info!("stream registry shut down");
    }

    /// Get total number of streams
    pub async fn stream_count(&self) -> usize {
        self.streams.read().await.len()
    }

    /// Get statistics for one stream
    pub async fn stream_stats(&self, key: &StreamKey) -> Option<StreamStats> {
        let entry = {
            let streams = self.streams.read().await;
            streams.get(key).map(Arc::clone)
        };
        match entry {
            Some(entry) => Some(entry.stats().await),
            None => None,
        }
    }

    /// Get statistics for every stream
    pub async fn stats_snapshot(&self) -> Vec<StreamStats> {
        let entries: Vec<Arc<StreamEntry>> = {
            let streams = self.streams.read().await;
            streams.values().map(Arc::clone).collect()
        };

        let mut stats = Vec::with_capacity(entries.len());
        for entry in entries {
            stats.push(entry.stats().await);
        }
        stats
    }

    /// Join an existing entry: bump the ref count, cancel any pending
    /// teardown, and restart the producer if the previous one terminated
    async fn join_entry(&self, entry: &Arc<StreamEntry>) -> StreamHandle {
        let mut state = entry.state.lock().await;

        if let Some(timer) = state.idle_teardown.take() {
            timer.abort();
            tracing::debug!(stream = %entry.key(), "idle teardown cancelled");
        }

        self.ensure_producer(entry, &mut state);

        state.ref_count += 1;
        let (rx, catchup) = entry.subscribe();

        tracing::debug!(
            stream = %entry.key(),
            subscribers = state.ref_count,
            catchup = catchup.len(),
            "subscriber added"
        );

        StreamHandle {
            key: entry.key().clone(),
            rx,
            catchup,
        }
    }

    /// Start a fresh producer if the entry has none or the old one is done
    fn ensure_producer(&self, entry: &Arc<StreamEntry>, state: &mut super::entry::EntryState) {
        let needs_start = match &state.producer {
            None => true,
            Some(producer) => producer.is_terminal(),
        };

        if needs_start {
            if let Some(old) = state.producer.take() {
                tracing::info!(
                    stream = %entry.key(),
                    last_state = ?old.state(),
                    "starting fresh producer"
                );
                // Old task already finished; detach its handle.
                drop(old);
            }
            state.producer = Some(self.starter.start(entry.key(), entry.publisher()));
        }
    }

    /// Producer handle for a key, for tests and introspection
    #[cfg(test)]
    async fn with_producer<R>(
        &self,
        key: &StreamKey,
        f: impl FnOnce(Option<&super::entry::ProducerHandle>) -> R,
    ) -> R {
        let streams = self.streams.read().await;
        match streams.get(key) {
            Some(entry) => {
                let state = entry.state.lock().await;
                f(state.producer.as_ref())
            }
            None => f(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    use tokio::sync::watch;
    use tokio_util::sync::CancellationToken;

    use super::*;
    use crate::registry::entry::ProducerState;
    use crate::registry::{ProducerHandle, StreamPublisher};

    /// Producer stand-in: counts starts and cancellations, hands the
    /// publisher out to the test, and runs until cancelled (or finishes
    /// immediately when `immediate_terminal` is set).
    struct StubStarter {
        starts: AtomicUsize,
        cancels: Arc<AtomicUsize>,
        publishers: std::sync::Mutex<Vec<StreamPublisher>>,
        immediate_terminal: bool,
    }

    impl StubStarter {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                starts: AtomicUsize::new(0),
                cancels: Arc::new(AtomicUsize::new(0)),
                publishers: std::sync::Mutex::new(Vec::new()),
                immediate_terminal: false,
            })
        }

        fn completing() -> Arc<Self> {
            Arc::new(Self {
                starts: AtomicUsize::new(0),
                cancels: Arc::new(AtomicUsize::new(0)),
                publishers: std::sync::Mutex::new(Vec::new()),
                immediate_terminal: true,
            })
        }

        fn starts(&self) -> usize {
            self.starts.load(Ordering::SeqCst)
        }

        fn cancels(&self) -> usize {
            self.cancels.load(Ordering::SeqCst)
        }

        fn publisher(&self) -> StreamPublisher {
            self.publishers.lock().unwrap().last().unwrap().clone()
        }

        fn clear_publishers(&self) {
            self.publishers.lock().unwrap().clear();
        }
    }

    impl ProducerStarter for StubStarter {
        fn start(&self, _key: &StreamKey, publisher: StreamPublisher) -> ProducerHandle {
            self.starts.fetch_add(1, Ordering::SeqCst);
            self.publishers.lock().unwrap().push(publisher);

            let cancel = CancellationToken::new();
            let (state_tx, state_rx) = watch::channel(ProducerState::Streaming);
            let cancels = Arc::clone(&self.cancels);
            let token = cancel.clone();
            let immediate = self.immediate_terminal;

            let join = tokio::spawn(async move {
                if immediate {
                    let _ = state_tx.send(ProducerState::Failed);
                    return;
                }
                token.cancelled().await;
                cancels.fetch_add(1, Ordering::SeqCst);
                let _ = state_tx.send(ProducerState::Cancelled);
            });

            ProducerHandle::new(join, cancel, state_rx)
        }
    }

    fn key() -> StreamKey {
        StreamKey::new("https://example.com/game.mp4", true)
    }

    fn registry_with(
        starter: &Arc<StubStarter>,
        config: RegistryConfig,
    ) -> Arc<StreamRegistry> {
        StreamRegistry::new(config, Arc::clone(starter) as Arc<dyn ProducerStarter>)
    }

    #[tokio::test]
    async fn test_concurrent_first_joins_start_one_producer() {
        let starter = StubStarter::new();
        let registry = registry_with(&starter, RegistryConfig::default());

        let (k1, k2) = (key(), key());
        let (a, b) = tokio::join!(registry.acquire(&k1), registry.acquire(&k2));
        let mut a = a.unwrap();
        let mut b = b.unwrap();

        assert_eq!(starter.starts(), 1);
        assert_eq!(registry.stream_count().await, 1);

        // Both subscribers observe the same sequence
        let publisher = starter.publisher();
        for n in 1..=3 {
            publisher.publish(OutgoingMessage::text(format!("msg-{n}")));
        }
        for handle in [&mut a, &mut b] {
            for n in 1..=3 {
                let msg = handle.recv().await.unwrap();
                assert_eq!(msg.as_text(), Some(format!("msg-{n}").as_str()));
            }
        }

        registry.release(a).await;
        registry.release(b).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_teardown_after_grace() {
        let starter = StubStarter::new();
        let config = RegistryConfig::default().idle_grace(Duration::from_secs(30));
        let registry = registry_with(&starter, config);

        let handle = registry.acquire(&key()).await.unwrap();
        registry.release(handle).await;

        // Entry survives until the grace period elapses
        assert_eq!(registry.stream_count().await, 1);

        tokio::time::sleep(Duration::from_secs(31)).await;

        assert_eq!(registry.stream_count().await, 0);
        assert_eq!(starter.cancels(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reacquire_during_grace_cancels_teardown() {
        let starter = StubStarter::new();
        let config = RegistryConfig::default().idle_grace(Duration::from_secs(30));
        let registry = registry_with(&starter, config);

        let handle = registry.acquire(&key()).await.unwrap();
        registry.release(handle).await;

        tokio::time::sleep(Duration::from_secs(15)).await;
        let handle = registry.acquire(&key()).await.unwrap();

        tokio::time::sleep(Duration::from_secs(60)).await;

        assert_eq!(registry.stream_count().await, 1);
        assert_eq!(starter.starts(), 1);
        assert_eq!(starter.cancels(), 0);

        registry.release(handle).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_background_start_is_idempotent() {
        let starter = StubStarter::new();
        let config = RegistryConfig::default().idle_grace(Duration::from_secs(30));
        let registry = registry_with(&starter, config);

        registry.ensure_background_start(&key()).await.unwrap();
        registry.ensure_background_start(&key()).await.unwrap();

        assert_eq!(starter.starts(), 1);
        assert_eq!(registry.stream_count().await, 1);

        let stats = registry.stream_stats(&key()).await.unwrap();
        assert!(stats.keep_alive);
        assert_eq!(stats.subscribers, 0);

        // Keep-alive holds the entry well past the grace period
        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(registry.stream_count().await, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_background_start_cancels_pending_teardown() {
        let starter = StubStarter::new();
        let config = RegistryConfig::default().idle_grace(Duration::from_secs(30));
        let registry = registry_with(&starter, config);

        let handle = registry.acquire(&key()).await.unwrap();
        registry.release(handle).await;

        tokio::time::sleep(Duration::from_secs(15)).await;
        registry.ensure_background_start(&key()).await.unwrap();

        tokio::time::sleep(Duration::from_secs(120)).await;

        assert_eq!(registry.stream_count().await, 1);
        assert_eq!(starter.starts(), 1);
    }

    #[tokio::test]
    async fn test_stop_background_with_no_subscribers_removes_immediately() {
        let starter = StubStarter::new();
        let registry = registry_with(&starter, RegistryConfig::default());

        registry.ensure_background_start(&key()).await.unwrap();
        registry.stop_background(&key()).await;

        assert_eq!(registry.stream_count().await, 0);
        assert_eq!(starter.cancels(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_background_with_subscribers_defers_to_refcount() {
        let starter = StubStarter::new();
        let config = RegistryConfig::default().idle_grace(Duration::from_secs(30));
        let registry = registry_with(&starter, config);

        registry.ensure_background_start(&key()).await.unwrap();
        let handle = registry.acquire(&key()).await.unwrap();

        registry.stop_background(&key()).await;
        assert_eq!(registry.stream_count().await, 1);

        registry.release(handle).await;
        tokio::time::sleep(Duration::from_secs(31)).await;

        assert_eq!(registry.stream_count().await, 0);
    }

    #[tokio::test]
    async fn test_late_joiner_gets_replay_window_then_live_messages() {
        let starter = StubStarter::new();
        let config = RegistryConfig::default().replay_depth(3);
        let registry = registry_with(&starter, config);

        let first = registry.acquire(&key()).await.unwrap();
        let publisher = starter.publisher();
        for n in 1..=5 {
            publisher.publish(OutgoingMessage::text(format!("msg-{n}")));
        }

        let mut late = registry.acquire(&key()).await.unwrap();
        let catchup: Vec<String> = late
            .take_catchup()
            .iter()
            .map(|m| m.as_text().unwrap().to_string())
            .collect();
        assert_eq!(catchup, vec!["msg-3", "msg-4", "msg-5"]);
        assert!(late.take_catchup().is_empty());

        publisher.publish(OutgoingMessage::text("msg-6"));
        assert_eq!(late.recv().await.unwrap().as_text(), Some("msg-6"));

        registry.release(first).await;
        registry.release(late).await;
    }

    #[tokio::test]
    async fn test_slow_subscriber_drops_oldest_and_keeps_reading() {
        let starter = StubStarter::new();
        let config = RegistryConfig::default().channel_capacity(1).replay_depth(1);
        let registry = registry_with(&starter, config);

        let mut handle = registry.acquire(&key()).await.unwrap();
        let publisher = starter.publisher();

        publisher.publish(OutgoingMessage::text("msg-1"));
        publisher.publish(OutgoingMessage::text("msg-2"));
        publisher.publish(OutgoingMessage::text("msg-3"));

        // Two messages were dropped for this subscriber; the stream itself
        // is unaffected and the next read resumes with the newest message.
        assert!(matches!(
            handle.recv().await,
            Err(StreamRecvError::Lagged(2))
        ));
        assert_eq!(handle.recv().await.unwrap().as_text(), Some("msg-3"));

        registry.release(handle).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_terminal_producer_restarts_on_next_acquire() {
        let starter = StubStarter::completing();
        let registry = registry_with(&starter, RegistryConfig::default());

        let handle = registry.acquire(&key()).await.unwrap();
        assert_eq!(starter.starts(), 1);

        // Let the producer task run to completion
        tokio::time::sleep(Duration::from_millis(10)).await;
        registry
            .with_producer(&key(), |p| {
                assert!(p.unwrap().is_terminal());
            })
            .await;

        let second = registry.acquire(&key()).await.unwrap();
        assert_eq!(starter.starts(), 2);

        registry.release(handle).await;
        registry.release(second).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_remaining_subscriber_holds_entry_open() {
        let starter = StubStarter::new();
        let config = RegistryConfig::default().idle_grace(Duration::from_secs(5));
        let registry = registry_with(&starter, config);

        let handle = registry.acquire(&key()).await.unwrap();
        let watcher = registry.acquire(&key()).await.unwrap();

        registry.release(handle).await;

        // One subscriber still holds the entry well past the grace period
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(registry.stream_count().await, 1);
        assert_eq!(starter.cancels(), 0);

        registry.release(watcher).await;
        tokio::time::sleep(Duration::from_secs(6)).await;
        assert_eq!(registry.stream_count().await, 0);
        assert_eq!(starter.cancels(), 1);
    }

    #[tokio::test]
    async fn test_shutdown_closes_subscriber_channels() {
        let starter = StubStarter::new();
        let registry = registry_with(&starter, RegistryConfig::default());

        let mut handle = registry.acquire(&key()).await.unwrap();
        registry.shutdown().await;
        starter.clear_publishers();

        assert!(matches!(handle.recv().await, Err(StreamRecvError::Closed)));
    }

    #[tokio::test]
    async fn test_shutdown_cancels_producers_and_blocks_acquire() {
        let starter = StubStarter::new();
        let registry = registry_with(&starter, RegistryConfig::default());

        let _handle = registry.acquire(&key()).await.unwrap();
        registry.ensure_background_start(&StreamKey::new("https://example.com/b", false))
            .await
            .unwrap();

        registry.shutdown().await;

        assert_eq!(registry.stream_count().await, 0);
        assert_eq!(starter.cancels(), 2);
        assert!(matches!(
            registry.acquire(&key()).await,
            Err(RegistryError::ShutDown)
        ));
        assert!(matches!(
            registry.ensure_background_start(&key()).await,
            Err(RegistryError::ShutDown)
        ));
    }
}
