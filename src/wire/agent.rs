//! Wire frames exchanged with the external analysis process
//!
//! The agent speaks the same message family as the subscriber edge, except
//! that payloads travel inline as base64: snippets carry their video and
//! commentary chunks carry the chunk bytes the relay later persists.

use serde::{Deserialize, Serialize};

use super::client::{ChunkMetadata, SnippetMetadata};

/// Request sent once after connecting, asking the agent to start analysis
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentRequest {
    StartAnalysis { source_url: String, is_live: bool },
}

/// Inline snippet payload from the agent
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentSnippet {
    /// Base64-encoded snippet video
    pub video_data: String,
    pub metadata: SnippetMetadata,
}

/// Inline chunk payload from the agent
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentChunk {
    /// Base64-encoded chunk bytes (commentary muxed over source video)
    pub payload: String,
    pub metadata: ChunkMetadata,
}

/// Frame received from the analysis process
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentFrame {
    /// Highlight snippet, video inline
    Snippet { data: AgentSnippet },
    /// Commentary chunk, payload inline
    LiveCommentaryChunk { data: AgentChunk },
    /// Analysis finished cleanly
    SnippetComplete,
    /// Analysis failed
    Error { message: String },
}
