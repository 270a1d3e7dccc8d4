//! # Memory Decay & Summarization Engine
//!
//! This module decides what the runtime remembers and what it lets go:
//! - Relevance scoring with configurable time-decay strategies
//! - Rule-based summarization of related chunk groups
//! - Narrative summarization with phase detection and semantic clustering
//! - A periodic decay manager that scores, summarizes, and evicts
//!
//! ## Architecture
//!
//! Chunks live in an external [`MemoryStore`]; this module only reads the
//! fields it scores on and writes back summaries, relevance updates, and
//! deletions. Scoring is a pure function so a decay pass is reproducible
//! for a fixed `now`.

use thiserror::Error;

/// Memory engine error types
#[derive(Error, Debug)]
pub enum MemoryError {
    /// A summarizer was handed an empty chunk group
    #[error("cannot summarize an empty chunk group")]
    EmptyInput,

    /// The decay manager was started twice
    #[error("decay manager is already running")]
    AlreadyRunning,

    /// Chunk lookup failed
    #[error("chunk not found: {0}")]
    NotFound(String),

    /// Store operation error
    #[error("memory store error: {0}")]
    Store(String),

    /// Embedding provider error
    #[error("embedding error: {0}")]
    Embedding(String),

    /// Configuration rejected by validation
    #[error("invalid decay configuration: {0}")]
    InvalidConfig(String),
}

/// Result type for memory operations
pub type Result<T> = std::result::Result<T, MemoryError>;

pub mod chunk;
pub mod decay;
pub mod narrative;
pub mod scoring;
pub mod store;
pub mod summarizer;

pub use chunk::{
    ChunkMetadata, ChunkType, ConversationChunk, DecayConfig, DecayStrategy, Difficulty, Outcome,
    ScoredChunk, TaskPriority, TaskStatus,
};
pub use decay::{DecayManager, DecayReport};
pub use narrative::{NarrativePhase, NarrativeSummarizer};
pub use scoring::relevance_score;
pub use store::{EmbeddingGenerator, InMemoryStore, MemoryStore};
pub use summarizer::{RuleBasedSummarizer, Summarizer};
