//! Durable side-effect collaborators
//!
//! Chunk persistence runs off the publish path: producers hand bytes and
//! progress rows to a [`SideEffectSink`] and move on. The trait is the
//! whole contract; real object-storage and metadata-store clients live in
//! other services.

use async_trait::async_trait;
use bytes::Bytes;
use sha2::{Digest, Sha256};

use crate::wire::ChunkMetadata;

/// Error from a storage or metadata write
#[derive(Debug, Clone, thiserror::Error)]
pub enum SinkError {
    #[error("object storage: {0}")]
    Storage(String),

    #[error("metadata store: {0}")]
    Metadata(String),
}

/// Object-storage and metadata-store writes, as the relay consumes them
#[async_trait]
pub trait SideEffectSink: Send + Sync {
    /// Persist chunk bytes under the given storage key
    async fn put(&self, key: &str, bytes: Bytes) -> Result<(), SinkError>;

    /// Record per-source chunk progress in the metadata store
    async fn upsert_progress(&self, chunk: &ChunkMetadata) -> Result<(), SinkError>;
}

/// Sink that logs writes and discards them
///
/// Useful for demos and local runs without storage credentials.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

#[async_trait]
impl SideEffectSink for LogSink {
    async fn put(&self, key: &str, bytes: Bytes) -> Result<(), SinkError> {
        tracing::debug!(key, len = bytes.len(), "discarding chunk payload");
        Ok(())
    }

    async fn upsert_progress(&self, chunk: &ChunkMetadata) -> Result<(), SinkError> {
        tracing::debug!(
            source_url = %chunk.source_url,
            chunk_number = chunk.chunk_number,
            "discarding chunk progress"
        );
        Ok(())
    }
}

/// Storage key for a chunk payload
///
/// Deterministic so retries and the metadata row agree on the location:
/// the source URL is folded into a short hash prefix, the chunk number
/// keeps keys sortable within a source.
pub fn chunk_storage_key(source_url: &str, chunk_number: u64, format: &str) -> String {
    let digest = Sha256::digest(source_url.as_bytes());
    format!(
        "chunks/{}/{:06}.{}",
        hex::encode(&digest[..8]),
        chunk_number,
        format
    )
}
