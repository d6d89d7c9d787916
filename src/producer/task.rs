//! Producer task driving one upstream analysis connection
//!
//! One producer runs per active stream entry. It queues at the admission
//! gate, opens the agent connection, and translates inbound events into
//! outgoing frames. Chunk persistence is dispatched off the publish path;
//! subscribers never wait on storage.

use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::agent::{AgentConnection, AgentConnector, AgentEvent, ConnectGate, GatePermit};
use crate::registry::{ProducerHandle, ProducerStarter, ProducerState, StreamKey, StreamPublisher};
use crate::sink::{chunk_storage_key, SideEffectSink};
use crate::wire::{AgentSnippet, ChunkMetadata, ClientFrame};

/// Collaborators shared by every producer
#[derive(Clone)]
pub struct ProducerContext {
    /// Deployment-wide upstream admission gate
    pub gate: ConnectGate,
    /// Opens agent connections
    pub connector: Arc<dyn AgentConnector>,
    /// Durable side-effect collaborators
    pub sink: Arc<dyn SideEffectSink>,
}

/// Spawns producer tasks on behalf of the registry
pub struct Producer {
    ctx: ProducerContext,
}

impl Producer {
    /// Create a producer spawner
    pub fn new(ctx: ProducerContext) -> Self {
        Self { ctx }
    }
}

impl ProducerStarter for Producer {
    fn start(&self, key: &StreamKey, publisher: StreamPublisher) -> ProducerHandle {
        let cancel = CancellationToken::new();
        let (state_tx, state_rx) = watch::channel(ProducerState::Idle);

        let task = ProducerTask {
            key: key.clone(),
            publisher,
            ctx: self.ctx.clone(),
            cancel: cancel.clone(),
            state: state_tx,
        };
        let join = tokio::spawn(task.run());

        ProducerHandle::new(join, cancel, state_rx)
    }
}

struct ProducerTask {
    key: StreamKey,
    publisher: StreamPublisher,
    ctx: ProducerContext,
    cancel: CancellationToken,
    state: watch::Sender<ProducerState>,
}

impl ProducerTask {
    async fn run(self) {
        self.set_state(ProducerState::Connecting);

        let mut permit = tokio::select! {
            _ = self.cancel.cancelled() => {
                self.set_state(ProducerState::Cancelled);
                return;
            }
            permit = self.ctx.gate.admit() => permit,
        };

        let connection = tokio::select! {
            _ = self.cancel.cancelled() => {
                permit.release();
                self.set_state(ProducerState::Cancelled);
                return;
            }
            connection = self.ctx.connector.connect(&self.key) => connection,
        };

        let mut connection = match connection {
            Ok(connection) => connection,
            Err(e) => {
                permit.release();
                tracing::warn!(stream = %self.key, error = %e, "agent connection failed");
                self.publish_error("commentary stream unavailable");
                self.set_state(ProducerState::Failed);
                return;
            }
        };

        self.set_state(ProducerState::Gated);
        self.stream_events(connection.as_mut(), &mut permit).await;
    }

    /// Pump upstream events until a terminal condition
    ///
    /// The gate permit is given back on the first inbound event of any
    /// kind; every exit path below also releases it (a no-op when already
    /// released).
    async fn stream_events(&self, connection: &mut dyn AgentConnection, permit: &mut GatePermit) {
        loop {
            let event = tokio::select! {
                _ = self.cancel.cancelled() => {
                    connection.close().await;
                    permit.release();
                    self.set_state(ProducerState::Cancelled);
                    tracing::debug!(stream = %self.key, "producer cancelled");
                    return;
                }
                event = connection.next_event() => event,
            };

            if !permit.is_released() {
                permit.release();
                self.set_state(ProducerState::Streaming);
            }

            match event {
                Some(Ok(AgentEvent::Snippet(snippet))) => self.on_snippet(snippet),
                Some(Ok(AgentEvent::Chunk { payload, metadata })) => {
                    self.on_chunk(payload, metadata)
                }
                Some(Ok(AgentEvent::Complete)) => {
                    connection.close().await;
                    self.set_state(ProducerState::Completed);
                    tracing::info!(stream = %self.key, "analysis complete");
                    return;
                }
                Some(Ok(AgentEvent::Error(message))) => {
                    tracing::warn!(stream = %self.key, error = %message, "agent reported failure");
                    self.publish_error(&message);
                    connection.close().await;
                    self.set_state(ProducerState::Failed);
                    return;
                }
                Some(Ok(AgentEvent::Unknown(kind))) => {
                    tracing::debug!(stream = %self.key, kind, "ignoring unknown agent message");
                }
                Some(Err(e)) => {
                    tracing::warn!(stream = %self.key, error = %e, "agent stream failed");
                    self.publish_error("commentary stream interrupted");
                    connection.close().await;
                    self.set_state(ProducerState::Failed);
                    return;
                }
                None => {
                    tracing::info!(stream = %self.key, "agent closed the stream");
                    self.publish_error("commentary stream closed");
                    self.set_state(ProducerState::Completed);
                    return;
                }
            }
        }
    }

    /// Relay a snippet with its video inline
    fn on_snippet(&self, snippet: AgentSnippet) {
        self.publish_frame(&ClientFrame::snippet(snippet.video_data, snippet.metadata));
    }

    /// Persist a chunk payload and relay its metadata
    ///
    /// The storage put and the progress upsert run detached and
    /// concurrently; the metadata frame goes out immediately either way.
    fn on_chunk(&self, payload: Bytes, metadata: ChunkMetadata) {
        let s3_key = chunk_storage_key(&metadata.source_url, metadata.chunk_number, &metadata.format);

        let sink = Arc::clone(&self.ctx.sink);
        let chunk = metadata.clone();
        let storage_key = s3_key.clone();
        let stream = self.key.clone();
        tokio::spawn(async move {
            let (put, progress) = tokio::join!(
                sink.put(&storage_key, payload),
                sink.upsert_progress(&chunk),
            );
            if let Err(e) = put {
                tracing::warn!(
                    stream = %stream,
                    key = %storage_key,
                    error = %e,
                    "chunk upload failed"
                );
            }
            if let Err(e) = progress {
                tracing::warn!(
                    stream = %stream,
                    chunk_number = chunk.chunk_number,
                    error = %e,
                    "chunk progress upsert failed"
                );
            }
        });

        self.publish_frame(&ClientFrame::chunk(metadata, s3_key));
    }

    fn publish_error(&self, message: &str) {
        self.publish_frame(&ClientFrame::error(message, self.key.source_url.clone()));
    }

    fn publish_frame(&self, frame: &ClientFrame) {
        match frame.encode() {
            Ok(message) => {
                let listeners = self.publisher.publish(message);
                tracing::trace!(stream = %self.key, listeners, "frame published");
            }
            Err(e) => {
                tracing::error!(stream = %self.key, error = %e, "failed to encode frame");
            }
        }
    }

    fn set_state(&self, state: ProducerState) {
        tracing::trace!(stream = %self.key, state = ?state, "producer state");
        let _ = self.state.send(state);
    }
}
