//! Decoding of agent wire frames into producer events

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use bytes::Bytes;

use crate::wire::{AgentFrame, AgentSnippet, ChunkMetadata};

/// Event vocabulary a producer consumes
#[derive(Debug, Clone)]
pub enum AgentEvent {
    /// Highlight snippet, video still base64 for inline relay
    Snippet(AgentSnippet),
    /// Commentary chunk with its payload decoded for persistence
    Chunk {
        payload: Bytes,
        metadata: ChunkMetadata,
    },
    /// Analysis finished cleanly
    Complete,
    /// Analysis reported a failure
    Error(String),
    /// Message type we do not understand
    ///
    /// Still counts as an inbound event for gate-release purposes.
    Unknown(String),
}

/// Error decoding an agent frame
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("frame is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("frame has no type field")]
    MissingType,

    #[error("malformed {kind} frame: {source}")]
    BadFrame {
        kind: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid base64 payload in {kind} frame: {source}")]
    BadPayload {
        kind: String,
        #[source]
        source: base64::DecodeError,
    },
}

/// Decode one agent text frame
///
/// Known message types must decode fully; unknown types are surfaced as
/// [`AgentEvent::Unknown`] rather than an error so a newer agent does not
/// kill the stream.
pub fn decode_frame(text: &str) -> Result<AgentEvent, DecodeError> {
    let value: serde_json::Value = serde_json::from_str(text)?;
    let kind = value
        .get("type")
        .and_then(|t| t.as_str())
        .ok_or(DecodeError::MissingType)?
        .to_string();

    match kind.as_str() {
        "snippet" | "live_commentary_chunk" | "snippet_complete" | "error" => {
            let frame: AgentFrame = serde_json::from_value(value).map_err(|source| {
                DecodeError::BadFrame {
                    kind: kind.clone(),
                    source,
                }
            })?;

            Ok(match frame {
                AgentFrame::Snippet { data } => AgentEvent::Snippet(data),
                AgentFrame::LiveCommentaryChunk { data } => {
                    let payload = BASE64.decode(data.payload.as_bytes()).map_err(|source| {
                        DecodeError::BadPayload {
                            kind: kind.clone(),
                            source,
                        }
                    })?;
                    AgentEvent::Chunk {
                        payload: Bytes::from(payload),
                        metadata: data.metadata,
                    }
                }
                AgentFrame::SnippetComplete => AgentEvent::Complete,
                AgentFrame::Error { message } => AgentEvent::Error(message),
            })
        }
        _ => Ok(AgentEvent::Unknown(kind)),
    }
}
