//! Conversational chunk model and decay configuration.
//!
//! A chunk is one conversational memory item: textual content plus the
//! structured metadata the decay engine scores on. The store owns chunks;
//! this module only defines the shape the runtime reads and writes.

use crate::memory::{MemoryError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use uuid::Uuid;

/// Kind of conversational memory a chunk captures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkType {
    Problem,
    Solution,
    Verification,
    Discussion,
    Analysis,
    Question,
    ArchitectureDecision,
    CodeChange,
    Task,
    TaskUpdate,
    TaskProgress,
    SessionSummary,
}

/// Outcome recorded against a chunk
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Success,
    Failure,
    Partial,
}

impl Outcome {
    /// Lowercase label used when rendering summaries
    pub fn label(&self) -> &'static str {
        match self {
            Outcome::Success => "success",
            Outcome::Failure => "failure",
            Outcome::Partial => "partial",
        }
    }
}

/// Difficulty recorded against a chunk
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Difficulty {
    Simple,
    Moderate,
    Complex,
}

/// Task lifecycle state carried on task chunks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Todo,
    InProgress,
    Blocked,
    Completed,
}

/// Task priority carried on task chunks
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskPriority {
    Low,
    Medium,
    High,
    Critical,
}

/// Structured chunk metadata
///
/// All fields are optional; absent fields simply contribute nothing to
/// scoring or summarization.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChunkMetadata {
    /// Repository the conversation was scoped to
    pub repository: Option<String>,

    /// Recorded outcome of the work the chunk describes
    pub outcome: Option<Outcome>,

    /// Recorded difficulty
    pub difficulty: Option<Difficulty>,

    /// Free-form tags
    pub tags: Vec<String>,

    /// Tools that were used while producing the chunk
    pub tools_used: Vec<String>,

    /// Minutes spent on the work the chunk describes
    pub time_spent_minutes: Option<u32>,

    /// Task state, for task-flavored chunks
    pub task_status: Option<TaskStatus>,

    /// Task priority, for task-flavored chunks
    pub task_priority: Option<TaskPriority>,

    /// Task progress percentage (0-100)
    pub task_progress: Option<u8>,

    /// Last relevance score the decay engine wrote back
    pub relevance_score: Option<f64>,
}

/// A single conversational memory item
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationChunk {
    /// Opaque stable identifier
    pub id: String,

    /// Groups chunks produced in one conversation
    pub session_id: String,

    /// When the chunk was produced
    pub timestamp: DateTime<Utc>,

    /// Kind of memory
    pub chunk_type: ChunkType,

    /// Full textual payload
    pub content: String,

    /// Short textual payload; may be empty
    pub summary: String,

    /// Structured metadata
    pub metadata: ChunkMetadata,

    /// Ids of previously linked chunks (weak references)
    pub related_chunks: Vec<String>,
}

impl ConversationChunk {
    /// Create a new chunk with a fresh id, stamped now
    pub fn new(
        session_id: impl Into<String>,
        chunk_type: ChunkType,
        content: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            session_id: session_id.into(),
            timestamp: Utc::now(),
            chunk_type,
            content: content.into(),
            summary: String::new(),
            metadata: ChunkMetadata::default(),
            related_chunks: Vec::new(),
        }
    }

    /// Set the summary text
    pub fn with_summary(mut self, summary: impl Into<String>) -> Self {
        self.summary = summary.into();
        self
    }

    /// Set the timestamp
    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Replace the metadata record
    pub fn with_metadata(mut self, metadata: ChunkMetadata) -> Self {
        self.metadata = metadata;
        self
    }

    /// Add a related chunk id
    pub fn with_related(mut self, chunk_id: impl Into<String>) -> Self {
        self.related_chunks.push(chunk_id.into());
        self
    }

    /// Age of the chunk relative to `now`
    pub fn age(&self, now: DateTime<Utc>) -> chrono::Duration {
        now - self.timestamp
    }

    /// Content and summary joined for keyword scans
    pub fn searchable_text(&self) -> String {
        let mut text = String::with_capacity(self.content.len() + self.summary.len() + 1);
        text.push_str(&self.content);
        text.push(' ');
        text.push_str(&self.summary);
        text.to_lowercase()
    }
}

/// A chunk paired with its computed relevance score
#[derive(Debug, Clone)]
pub struct ScoredChunk {
    /// The scored chunk
    pub chunk: ConversationChunk,

    /// Relevance in `[0, 1]`
    pub score: f64,
}

/// Time-decay strategy applied while scoring
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecayStrategy {
    /// Linear falloff, hits zero at `30 / base_decay_rate` days
    Linear,
    /// Half-life of 30 days
    Exponential,
    /// Piecewise: gentle in week one, steeper to day 30, exponential after
    Adaptive,
}

/// Decay engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecayConfig {
    /// Decay strategy
    pub strategy: DecayStrategy,

    /// Base decay rate in `[0, 1]`
    pub base_decay_rate: f64,

    /// Scores below this mark a chunk for a relevance update
    pub min_relevance: f64,

    /// Scores below this mark a chunk for summarization
    pub summarization_threshold: f64,

    /// Scores below this mark a chunk for deletion
    pub deletion_threshold: f64,

    /// Per-type score multipliers
    pub importance_boost: HashMap<ChunkType, f64>,

    /// Interval between decay passes
    pub decay_interval: Duration,

    /// Minimum age below which a chunk is never destroyed
    pub retention_period: Duration,
}

impl Default for DecayConfig {
    fn default() -> Self {
        let mut importance_boost = HashMap::new();
        importance_boost.insert(ChunkType::ArchitectureDecision, 2.0);
        importance_boost.insert(ChunkType::Problem, 1.5);
        importance_boost.insert(ChunkType::Solution, 1.8);
        importance_boost.insert(ChunkType::Analysis, 1.6);
        importance_boost.insert(ChunkType::Verification, 1.7);

        Self {
            strategy: DecayStrategy::Adaptive,
            base_decay_rate: 0.1,
            min_relevance: 0.7,
            summarization_threshold: 0.4,
            deletion_threshold: 0.1,
            importance_boost,
            decay_interval: Duration::from_secs(24 * 60 * 60),
            retention_period: Duration::from_secs(7 * 24 * 60 * 60),
        }
    }
}

impl DecayConfig {
    /// Validate threshold ordering and rate bounds
    ///
    /// Invariant: `deletion < summarization < min_relevance <= 1`.
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.base_decay_rate) {
            return Err(MemoryError::InvalidConfig(format!(
                "base_decay_rate {} outside [0, 1]",
                self.base_decay_rate
            )));
        }
        if self.deletion_threshold >= self.summarization_threshold {
            return Err(MemoryError::InvalidConfig(format!(
                "deletion_threshold {} must be below summarization_threshold {}",
                self.deletion_threshold, self.summarization_threshold
            )));
        }
        if self.summarization_threshold >= self.min_relevance {
            return Err(MemoryError::InvalidConfig(format!(
                "summarization_threshold {} must be below min_relevance {}",
                self.summarization_threshold, self.min_relevance
            )));
        }
        if self.min_relevance > 1.0 {
            return Err(MemoryError::InvalidConfig(format!(
                "min_relevance {} must not exceed 1.0",
                self.min_relevance
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunk_builder() {
        let chunk = ConversationChunk::new("session-1", ChunkType::Problem, "the build fails")
            .with_summary("build failure")
            .with_related("earlier-chunk");

        assert_eq!(chunk.session_id, "session-1");
        assert_eq!(chunk.chunk_type, ChunkType::Problem);
        assert_eq!(chunk.related_chunks, vec!["earlier-chunk".to_string()]);
        assert!(!chunk.id.is_empty());
    }

    #[test]
    fn test_searchable_text_is_lowercased() {
        let chunk = ConversationChunk::new("s", ChunkType::Discussion, "Fixed the BUG")
            .with_summary("Bug Fix");
        let text = chunk.searchable_text();
        assert!(text.contains("fixed the bug"));
        assert!(text.contains("bug fix"));
    }

    #[test]
    fn test_default_config_is_valid() {
        assert!(DecayConfig::default().validate().is_ok());
    }

    #[test]
    fn test_threshold_ordering_enforced() {
        let config = DecayConfig {
            deletion_threshold: 0.5,
            summarization_threshold: 0.4,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = DecayConfig {
            summarization_threshold: 0.8,
            min_relevance: 0.7,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_chunk_type_serde_names() {
        let json = serde_json::to_string(&ChunkType::ArchitectureDecision).unwrap();
        assert_eq!(json, "\"architecture_decision\"");
        let back: ChunkType = serde_json::from_str("\"session_summary\"").unwrap();
        assert_eq!(back, ChunkType::SessionSummary);
    }
}
