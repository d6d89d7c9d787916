//! Upstream connection to the external analysis process
//!
//! The connector is a seam: producers only see a stream of decoded events,
//! so tests drive them with scripted connections while the production
//! implementation speaks WebSocket to the analysis endpoint.

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};

use crate::error::Result;
use crate::registry::StreamKey;
use crate::wire::AgentRequest;

use super::event::{decode_frame, AgentEvent};

/// Opens one upstream connection per producer
#[async_trait]
pub trait AgentConnector: Send + Sync {
    /// Connect and request analysis of the given stream
    async fn connect(&self, key: &StreamKey) -> Result<Box<dyn AgentConnection>>;
}

/// One live upstream connection
#[async_trait]
pub trait AgentConnection: Send {
    /// Next decoded event; `None` once the upstream has closed
    async fn next_event(&mut self) -> Option<Result<AgentEvent>>;

    /// Close the underlying connection promptly
    async fn close(&mut self);
}

/// WebSocket connector for the analysis process
pub struct WsConnector {
    endpoint: String,
}

impl WsConnector {
    /// Create a connector dialing the given `ws://`/`wss://` endpoint
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
        }
    }
}

#[async_trait]
impl AgentConnector for WsConnector {
    async fn connect(&self, key: &StreamKey) -> Result<Box<dyn AgentConnection>> {
        let (mut socket, _response) = connect_async(self.endpoint.as_str()).await?;

        let request = AgentRequest::StartAnalysis {
            source_url: key.source_url.clone(),
            is_live: key.is_live,
        };
        socket
            .send(Message::Text(serde_json::to_string(&request)?))
            .await?;

        tracing::debug!(
            stream = %key,
            endpoint = %self.endpoint,
            "agent connection opened"
        );

        Ok(Box::new(WsAgentConnection { socket }))
    }
}

struct WsAgentConnection {
    socket: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

#[async_trait]
impl AgentConnection for WsAgentConnection {
    async fn next_event(&mut self) -> Option<Result<AgentEvent>> {
        loop {
            match self.socket.next().await {
                Some(Ok(Message::Text(text))) => {
                    return Some(decode_frame(&text).map_err(Into::into));
                }
                // The agent protocol is text-only; a binary frame is an
                // unrecognized message, not a connection failure.
                Some(Ok(Message::Binary(_))) => {
                    return Some(Ok(AgentEvent::Unknown("binary".into())));
                }
                Some(Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_))) => continue,
                Some(Ok(Message::Close(_))) => return None,
                Some(Err(e)) => return Some(Err(e.into())),
                None => return None,
            }
        }
    }

    async fn close(&mut self) {
        let _ = self.socket.close(None).await;
    }
}
