//! Relay server assembly
//!
//! Wires the registry, producer spawner, admission gate, and collaborators
//! into an HTTP application: the WebSocket subscribe edge plus small
//! health, status, and background-control routes.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use axum::extract::{Query, State, WebSocketUpgrade};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use tokio::sync::Semaphore;

use crate::agent::{AgentConnector, ConnectGate};
use crate::error::Result;
use crate::producer::{Producer, ProducerContext};
use crate::registry::{StreamKey, StreamRegistry, StreamStats};
use crate::sink::SideEffectSink;

use super::config::ServerConfig;
use super::session::{ConnectQuery, SubscriberSession};

/// Live commentary relay server
pub struct RelayServer {
    config: ServerConfig,
    registry: Arc<StreamRegistry>,
    next_session_id: AtomicU64,
    connection_semaphore: Option<Arc<Semaphore>>,
}

impl RelayServer {
    /// Create a server from its configuration and collaborators
    pub fn new(
        config: ServerConfig,
        connector: Arc<dyn AgentConnector>,
        sink: Arc<dyn SideEffectSink>,
    ) -> Arc<Self> {
        let gate = ConnectGate::new(config.gate_capacity);
        let producer = Producer::new(ProducerContext {
            gate,
            connector,
            sink,
        });
        let registry = StreamRegistry::new(config.registry.clone(), Arc::new(producer));

        let connection_semaphore = if config.max_connections > 0 {
            Some(Arc::new(Semaphore::new(config.max_connections)))
        } else {
            None
        };

        Arc::new(Self {
            config,
            registry,
            next_session_id: AtomicU64::new(1),
            connection_semaphore,
        })
    }

    /// Get a reference to the stream registry
    pub fn registry(&self) -> &Arc<StreamRegistry> {
        &self.registry
    }

    /// Build the application router
    pub fn router(self: &Arc<Self>) -> Router {
        Router::new()
            .route("/live", get(subscribe_handler))
            .route("/healthz", get(healthz))
            .route("/streams", get(streams_handler))
            .route(
                "/streams/background",
                post(start_background).delete(stop_background),
            )
            .with_state(Arc::clone(self))
    }

    /// Run the server
    ///
    /// This method blocks until the server is shut down.
    pub async fn run(self: Arc<Self>) -> Result<()> {
        let listener = tokio::net::TcpListener::bind(self.config.bind_addr).await?;
        tracing::info!(addr = %self.config.bind_addr, "relay server listening");

        let router = self.router();
        axum::serve(listener, router).await?;
        Ok(())
    }

    /// Run the server with graceful shutdown
    ///
    /// Once `shutdown` resolves, the listener stops and every producer is
    /// cancelled.
    pub async fn run_until<F>(self: Arc<Self>, shutdown: F) -> Result<()>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let listener = tokio::net::TcpListener::bind(self.config.bind_addr).await?;
        tracing::info!(addr = %self.config.bind_addr, "relay server listening");

        let router = self.router();
        axum::serve(listener, router)
            .with_graceful_shutdown(shutdown)
            .await?;

        tracing::info!("shutdown signal received");
        self.registry.shutdown().await;
        Ok(())
    }

    /// Get the bind address
    pub fn bind_addr(&self) -> std::net::SocketAddr {
        self.config.bind_addr
    }
}

async fn healthz() -> &'static str {
    "ok"
}

/// WebSocket subscribe edge
async fn subscribe_handler(
    State(server): State<Arc<RelayServer>>,
    Query(query): Query<ConnectQuery>,
    ws: WebSocketUpgrade,
) -> Response {
    // Check connection limit before upgrading
    let permit = match &server.connection_semaphore {
        Some(sem) => match Arc::clone(sem).try_acquire_owned() {
            Ok(permit) => Some(permit),
            Err(_) => {
                tracing::warn!("subscriber rejected: connection limit reached");
                return StatusCode::SERVICE_UNAVAILABLE.into_response();
            }
        },
        None => None,
    };

    let session_id = server.next_session_id.fetch_add(1, Ordering::Relaxed);
    let registry = Arc::clone(&server.registry);

    ws.on_upgrade(move |socket| async move {
        // Permit held for the whole connection
        let _permit = permit;
        SubscriberSession::new(session_id, registry)
            .run(socket, query)
            .await;
    })
}

async fn streams_handler(State(server): State<Arc<RelayServer>>) -> Json<Vec<StreamStats>> {
    Json(server.registry.stats_snapshot().await)
}

#[derive(Debug, Deserialize)]
struct BackgroundRequest {
    source_url: String,
    is_live: bool,
}

/// Pre-warm a stream and keep it alive with zero subscribers
async fn start_background(
    State(server): State<Arc<RelayServer>>,
    Json(request): Json<BackgroundRequest>,
) -> Response {
    let key = StreamKey::new(request.source_url, request.is_live);
    match server.registry.ensure_background_start(&key).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => (StatusCode::SERVICE_UNAVAILABLE, e.to_string()).into_response(),
    }
}

/// Clear a stream's keep-alive flag
async fn stop_background(
    State(server): State<Arc<RelayServer>>,
    Json(request): Json<BackgroundRequest>,
) -> StatusCode {
    let key = StreamKey::new(request.source_url, request.is_live);
    server.registry.stop_background(&key).await;
    StatusCode::NO_CONTENT
}
