//! Wire message vocabularies
//!
//! Two JSON message families share the same metadata types: the frames
//! relayed to subscriber connections and the frames exchanged with the
//! external analysis process.

pub mod agent;
pub mod client;

pub use agent::{AgentChunk, AgentFrame, AgentRequest, AgentSnippet};
pub use client::{
    ChunkMetadata, ClientFrame, ErrorMetadata, SnippetMetadata, SnippetPayload,
    StoredChunkMetadata,
};
