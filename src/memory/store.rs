//! External collaborator traits and the embedded in-memory store.
//!
//! The decay manager talks to whatever implements [`MemoryStore`]; vector
//! stores, embedding providers, and transports live outside the core.

use crate::memory::chunk::ConversationChunk;
use crate::memory::{MemoryError, Result};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;

/// Chunk persistence the decay engine drives
#[async_trait]
pub trait MemoryStore: Send + Sync {
    /// Fetch all chunks, optionally filtered to a repository.
    ///
    /// An empty `repository` means all chunks.
    async fn get_all_chunks(&self, repository: &str) -> Result<Vec<ConversationChunk>>;

    /// Persist a new chunk
    async fn store_chunk(&self, chunk: &ConversationChunk) -> Result<()>;

    /// Replace an existing chunk
    async fn update_chunk(&self, chunk: &ConversationChunk) -> Result<()>;

    /// Remove a chunk by id
    async fn delete_chunk(&self, chunk_id: &str) -> Result<()>;
}

/// Optional embedding provider used for semantic grouping
#[async_trait]
pub trait EmbeddingGenerator: Send + Sync {
    /// Embed a piece of text into a dense vector
    async fn generate(&self, text: &str) -> Result<Vec<f32>>;
}

/// In-process chunk store
///
/// Backs tests and embedded deployments; production deployments inject a
/// store backed by their vector database.
#[derive(Default)]
pub struct InMemoryStore {
    chunks: RwLock<HashMap<String, ConversationChunk>>,
}

impl InMemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of chunks currently held
    pub fn len(&self) -> usize {
        self.chunks.read().len()
    }

    /// Whether the store holds no chunks
    pub fn is_empty(&self) -> bool {
        self.chunks.read().is_empty()
    }

    /// Fetch a single chunk by id
    pub fn get(&self, chunk_id: &str) -> Option<ConversationChunk> {
        self.chunks.read().get(chunk_id).cloned()
    }
}

#[async_trait]
impl MemoryStore for InMemoryStore {
    async fn get_all_chunks(&self, repository: &str) -> Result<Vec<ConversationChunk>> {
        let chunks = self.chunks.read();
        let mut result: Vec<ConversationChunk> = if repository.is_empty() {
            chunks.values().cloned().collect()
        } else {
            chunks
                .values()
                .filter(|c| c.metadata.repository.as_deref() == Some(repository))
                .cloned()
                .collect()
        };
        // Deterministic order for callers that partition the result.
        result.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then(a.id.cmp(&b.id)));
        Ok(result)
    }

    async fn store_chunk(&self, chunk: &ConversationChunk) -> Result<()> {
        self.chunks
            .write()
            .insert(chunk.id.clone(), chunk.clone());
        Ok(())
    }

    async fn update_chunk(&self, chunk: &ConversationChunk) -> Result<()> {
        let mut chunks = self.chunks.write();
        if !chunks.contains_key(&chunk.id) {
            return Err(MemoryError::NotFound(chunk.id.clone()));
        }
        chunks.insert(chunk.id.clone(), chunk.clone());
        Ok(())
    }

    async fn delete_chunk(&self, chunk_id: &str) -> Result<()> {
        let mut chunks = self.chunks.write();
        if chunks.remove(chunk_id).is_none() {
            return Err(MemoryError::NotFound(chunk_id.to_string()));
        }
        Ok(())
    }
}
