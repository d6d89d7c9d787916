//! Subscriber sessions
//!
//! The per-client edge adapter: validates connect parameters, acquires a
//! registry handle, relays every published message to the WebSocket, and
//! releases the handle exactly once on any exit path.

use std::sync::Arc;

use axum::extract::ws::{close_code, CloseFrame, Message, WebSocket};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;

use crate::registry::{OutgoingMessage, StreamKey, StreamRecvError, StreamRegistry};
use crate::wire::ClientFrame;

/// Connect parameters as they appear in the query string
#[derive(Debug, Default, Clone, Deserialize)]
pub struct ConnectQuery {
    #[serde(rename = "sourceURL")]
    pub source_url: Option<String>,
    #[serde(rename = "isLive")]
    pub is_live: Option<String>,
}

/// Validate connect parameters into a stream key
pub(crate) fn parse_params(query: &ConnectQuery) -> Result<StreamKey, String> {
    let source_url = match query.source_url.as_deref() {
        Some(url) if !url.trim().is_empty() => url.to_string(),
        _ => return Err("missing required parameter sourceURL".into()),
    };

    let is_live = match query.is_live.as_deref() {
        Some(raw) => match parse_bool(raw) {
            Some(value) => value,
            None => return Err(format!("invalid isLive value: {raw}")),
        },
        None => return Err("missing required parameter isLive".into()),
    };

    Ok(StreamKey::new(source_url, is_live))
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.to_ascii_lowercase().as_str() {
        "true" | "1" => Some(true),
        "false" | "0" => Some(false),
        _ => None,
    }
}

/// One subscriber connection
pub(crate) struct SubscriberSession {
    session_id: u64,
    registry: Arc<StreamRegistry>,
}

impl SubscriberSession {
    pub(crate) fn new(session_id: u64, registry: Arc<StreamRegistry>) -> Self {
        Self {
            session_id,
            registry,
        }
    }

    /// Run the session to completion
    pub(crate) async fn run(self, socket: WebSocket, query: ConnectQuery) {
        let key = match parse_params(&query) {
            Ok(key) => key,
            Err(reason) => {
                tracing::debug!(
                    session_id = self.session_id,
                    reason = %reason,
                    "subscriber rejected"
                );
                let source_url = query.source_url.as_deref().unwrap_or_default();
                reject(socket, &reason, source_url).await;
                return;
            }
        };

        let mut handle = match self.registry.acquire(&key).await {
            Ok(handle) => handle,
            Err(e) => {
                tracing::warn!(
                    session_id = self.session_id,
                    stream = %key,
                    error = %e,
                    "subscriber admission failed"
                );
                reject(socket, "relay is shutting down", &key.source_url).await;
                return;
            }
        };

        tracing::info!(
            session_id = self.session_id,
            stream = %key,
            "subscriber connected"
        );

        let (mut sender, mut receiver) = socket.split();
        let mut dropped: u64 = 0;
        let mut client_gone = false;

        // Replay recent history before live fan-out
        for message in handle.take_catchup() {
            if sender.send(ws_message(&message)).await.is_err() {
                client_gone = true;
                break;
            }
        }

        while !client_gone {
            tokio::select! {
                published = handle.recv() => match published {
                    Ok(message) => {
                        if sender.send(ws_message(&message)).await.is_err() {
                            break;
                        }
                    }
                    Err(StreamRecvError::Lagged(n)) => {
                        // Best-effort delivery: the slow subscriber loses
                        // old messages and keeps reading.
                        dropped += n;
                        tracing::debug!(
                            session_id = self.session_id,
                            stream = %key,
                            lagged = n,
                            "slow subscriber dropped messages"
                        );
                    }
                    Err(StreamRecvError::Closed) => break,
                },
                inbound = receiver.next() => match inbound {
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(_)) => break,
                    Some(Ok(_)) => {} // ignore client chatter
                },
            }
        }

        self.registry.release(handle).await;
        let _ = sender.close().await;

        tracing::info!(
            session_id = self.session_id,
            stream = %key,
            dropped,
            "subscriber disconnected"
        );
    }
}

/// Send one error frame and close without touching the registry
async fn reject(mut socket: WebSocket, reason: &str, source_url: &str) {
    if let Ok(message) = ClientFrame::error(reason, source_url).encode() {
        if let Some(text) = message.as_text() {
            let _ = socket.send(Message::Text(text.to_string())).await;
        }
    }
    let _ = socket
        .send(Message::Close(Some(CloseFrame {
            code: close_code::UNSUPPORTED,
            reason: "cannot accept".into(),
        })))
        .await;
}

fn ws_message(message: &OutgoingMessage) -> Message {
    match message {
        OutgoingMessage::Text(text) => Message::Text(text.to_string()),
        OutgoingMessage::Binary(bytes) => Message::Binary(bytes.to_vec()),
    }
}
