//! Outgoing wire frames for subscriber connections
//!
//! All frames are JSON text. Chunk frames carry metadata only; the chunk
//! payload itself lives in object storage under the referenced key.

use serde::{Deserialize, Serialize};

use crate::registry::OutgoingMessage;

/// Metadata describing a highlight snippet
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnippetMetadata {
    /// Source video the snippet was cut from
    pub src_video_url: String,
    /// Display title, if the analysis produced one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Display description, if the analysis produced one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Metadata describing one commentary chunk
///
/// Immutable once produced. Chunk numbers are monotonically non-decreasing
/// per source but need not be contiguous.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkMetadata {
    /// Source video URL
    #[serde(rename = "src_video_url")]
    pub source_url: String,
    /// Position of this chunk in the stream
    pub chunk_number: u64,
    /// Container format of the chunk (e.g. "mp4")
    pub format: String,
    /// Sample rate of the commentary audio
    pub audio_sample_rate: u32,
    /// Length of the commentary audio in bytes
    pub commentary_length_bytes: u64,
    /// Length of the chunk video in bytes
    pub video_length_bytes: u64,
    /// Running total of chunks the analysis has processed
    #[serde(
        rename = "num_chunks_processed",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub chunks_processed: Option<u64>,
}

/// Chunk metadata as sent to subscribers, with its storage location
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredChunkMetadata {
    #[serde(flatten)]
    pub chunk: ChunkMetadata,
    /// Object-storage key the chunk payload was written under
    pub s3_key: String,
}

/// Payload of a snippet frame
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnippetPayload {
    /// Base64-encoded snippet video
    pub video_data: String,
    pub metadata: SnippetMetadata,
}

/// Payload of a chunk frame
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkPayload {
    pub metadata: StoredChunkMetadata,
}

/// Frame sent to subscriber connections
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    /// Highlight snippet with the video inlined
    Snippet { data: SnippetPayload },
    /// Commentary chunk, metadata only
    LiveCommentaryChunk { data: ChunkPayload },
    /// Terminal or parameter error
    Error {
        message: String,
        metadata: ErrorMetadata,
    },
}

/// Metadata attached to error frames
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorMetadata {
    pub src_video_url: String,
}

impl ClientFrame {
    /// Build a snippet frame
    pub fn snippet(video_data: String, metadata: SnippetMetadata) -> Self {
        Self::Snippet {
            data: SnippetPayload {
                video_data,
                metadata,
            },
        }
    }

    /// Build a chunk frame referencing a stored payload
    pub fn chunk(chunk: ChunkMetadata, s3_key: String) -> Self {
        Self::LiveCommentaryChunk {
            data: ChunkPayload {
                metadata: StoredChunkMetadata { chunk, s3_key },
            },
        }
    }

    /// Build an error frame
    pub fn error(message: impl Into<String>, src_video_url: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
            metadata: ErrorMetadata {
                src_video_url: src_video_url.into(),
            },
        }
    }

    /// Serialize into a broadcastable message
    pub fn encode(&self) -> Result<OutgoingMessage, serde_json::Error> {
        Ok(OutgoingMessage::text(serde_json::to_string(self)?))
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn chunk_metadata() -> ChunkMetadata {
        ChunkMetadata {
            source_url: "https://example.com/game.mp4".into(),
            chunk_number: 7,
            format: "mp4".into(),
            audio_sample_rate: 24_000,
            commentary_length_bytes: 4_096,
            video_length_bytes: 1_048_576,
            chunks_processed: Some(8),
        }
    }

    #[test]
    fn test_snippet_frame_shape() {
        let frame = ClientFrame::snippet(
            "QUJD".into(),
            SnippetMetadata {
                src_video_url: "https://example.com/game.mp4".into(),
                title: Some("Match point".into()),
                description: None,
            },
        );

        let value: serde_json::Value =
            serde_json::from_str(frame.encode().unwrap().as_text().unwrap()).unwrap();
        assert_eq!(
            value,
            json!({
                "type": "snippet",
                "data": {
                    "video_data": "QUJD",
                    "metadata": {
                        "src_video_url": "https://example.com/game.mp4",
                        "title": "Match point"
                    }
                }
            })
        );
    }

    #[test]
    fn test_chunk_frame_shape() {
        let frame = ClientFrame::chunk(chunk_metadata(), "chunks/ab12/000007.mp4".into());

        let value: serde_json::Value =
            serde_json::from_str(frame.encode().unwrap().as_text().unwrap()).unwrap();
        assert_eq!(
            value,
            json!({
                "type": "live_commentary_chunk",
                "data": {
                    "metadata": {
                        "src_video_url": "https://example.com/game.mp4",
                        "chunk_number": 7,
                        "format": "mp4",
                        "audio_sample_rate": 24000,
                        "commentary_length_bytes": 4096,
                        "video_length_bytes": 1048576,
                        "num_chunks_processed": 8,
                        "s3_key": "chunks/ab12/000007.mp4"
                    }
                }
            })
        );
    }

    #[test]
    fn test_chunk_frame_omits_missing_progress() {
        let mut metadata = chunk_metadata();
        metadata.chunks_processed = None;
        let frame = ClientFrame::chunk(metadata, "chunks/ab12/000007.mp4".into());

        let text = frame.encode().unwrap().as_text().unwrap().to_string();
        assert!(!text.contains("num_chunks_processed"));
    }

    #[test]
    fn test_error_frame_shape() {
        let frame = ClientFrame::error("upstream gone", "https://example.com/game.mp4");

        let value: serde_json::Value =
            serde_json::from_str(frame.encode().unwrap().as_text().unwrap()).unwrap();
        assert_eq!(
            value,
            json!({
                "type": "error",
                "message": "upstream gone",
                "metadata": { "src_video_url": "https://example.com/game.mp4" }
            })
        );
    }

    #[test]
    fn test_frame_round_trip() {
        let frame = ClientFrame::chunk(chunk_metadata(), "chunks/ab12/000007.mp4".into());
        let text = frame.encode().unwrap().as_text().unwrap().to_string();

        let parsed: ClientFrame = serde_json::from_str(&text).unwrap();
        assert_eq!(parsed, frame);
    }
}
