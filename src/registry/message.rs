//! Stream identity and fan-out message types
//!
//! This module defines the key type identifying one cached stream and the
//! messages that are broadcast to subscribers.

use std::sync::Arc;

use bytes::Bytes;

/// Unique identifier for a stream (source URL + liveness)
///
/// Two subscribers asking for the same source URL with the same liveness
/// flag always resolve to the same stream entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StreamKey {
    /// Source video URL the analysis process consumes
    pub source_url: String,
    /// Whether the source is a live stream or a finished video
    pub is_live: bool,
}

impl StreamKey {
    /// Create a new stream key
    pub fn new(source_url: impl Into<String>, is_live: bool) -> Self {
        Self {
            source_url: source_url.into(),
            is_live,
        }
    }
}

impl std::fmt::Display for StreamKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} ({})",
            self.source_url,
            if self.is_live { "live" } else { "vod" }
        )
    }
}

/// A message fanned out to every subscriber of a stream
///
/// Designed to be cheap to clone: the broadcast channel clones the message
/// per receiver, but the inner `Arc`/`Bytes` payload is only
/// reference-counted, not copied.
#[derive(Debug, Clone)]
pub enum OutgoingMessage {
    /// JSON text frame
    Text(Arc<str>),
    /// Binary frame
    ///
    /// Reserved for future wire formats. Chunk payloads are never inlined;
    /// only a metadata text frame referencing the storage key is sent.
    Binary(Bytes),
}

impl OutgoingMessage {
    /// Create a text message
    pub fn text(payload: impl Into<Arc<str>>) -> Self {
        Self::Text(payload.into())
    }

    /// Create a binary message
    pub fn binary(payload: impl Into<Bytes>) -> Self {
        Self::Binary(payload.into())
    }

    /// Payload length in bytes
    pub fn len(&self) -> usize {
        match self {
            Self::Text(s) => s.len(),
            Self::Binary(b) => b.len(),
        }
    }

    /// Whether the payload is empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Text payload, if this is a text message
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            Self::Binary(_) => None,
        }
    }
}
