//! Rule-based summarization of chunk groups.
//!
//! Deterministic aggregation: a group of related chunks collapses into one
//! sentence covering time range, type counts, key topics, outcomes, and
//! tools. Anything smarter (LLM-backed, narrative) composes on top of this.

use crate::memory::chunk::{ChunkMetadata, ChunkType, ConversationChunk};
use crate::memory::{MemoryError, Result};
use async_trait::async_trait;
use chrono::Utc;
use once_cell::sync::Lazy;
use std::collections::{BTreeSet, HashMap, HashSet};

/// Words too common to count as topics
static STOPWORDS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        "about", "after", "again", "before", "being", "between", "could", "during", "every",
        "first", "found", "however", "other", "should", "since", "still", "their", "there",
        "these", "thing", "things", "those", "through", "under", "until", "using", "where",
        "which", "while", "would", "really", "because", "something",
    ]
    .into_iter()
    .collect()
});

/// Aggregates a chunk group into derived text or a derived chunk
#[async_trait]
pub trait Summarizer: Send + Sync {
    /// Summarize a group into one piece of text.
    ///
    /// Fails with [`MemoryError::EmptyInput`] when the group is empty.
    async fn summarize(&self, chunks: &[ConversationChunk]) -> Result<String>;

    /// Summarize a group into a derived chunk carrying provenance.
    ///
    /// The derived chunk gets a fresh id, the session id of the first
    /// chunk, and `related_chunks` listing every original id.
    async fn summarize_chain(&self, chunks: &[ConversationChunk]) -> Result<ConversationChunk>;
}

/// Deterministic rule-based summarizer
#[derive(Debug, Default, Clone)]
pub struct RuleBasedSummarizer;

impl RuleBasedSummarizer {
    /// Create a new summarizer
    pub fn new() -> Self {
        Self
    }

    fn compose(&self, chunks: &[ConversationChunk]) -> Result<String> {
        if chunks.is_empty() {
            return Err(MemoryError::EmptyInput);
        }

        let mut ordered: Vec<&ConversationChunk> = chunks.iter().collect();
        ordered.sort_by_key(|c| c.timestamp);

        let start = ordered.first().map(|c| c.timestamp).unwrap_or_else(Utc::now);
        let end = ordered.last().map(|c| c.timestamp).unwrap_or(start);

        let mut type_counts: HashMap<ChunkType, usize> = HashMap::new();
        for chunk in &ordered {
            *type_counts.entry(chunk.chunk_type).or_insert(0) += 1;
        }
        let mut type_parts: Vec<String> = type_counts
            .iter()
            .map(|(t, n)| format!("{n} {}", type_label(*t)))
            .collect();
        type_parts.sort();

        let topics = key_topics(&ordered, 5);

        let outcomes: BTreeSet<&'static str> = ordered
            .iter()
            .filter_map(|c| c.metadata.outcome.map(|o| o.label()))
            .collect();

        let tools: BTreeSet<&str> = ordered
            .iter()
            .flat_map(|c| c.metadata.tools_used.iter().map(|t| t.as_str()))
            .collect();

        let mut sentence = format!(
            "Between {} and {}, {} memories were recorded ({})",
            start.format("%Y-%m-%d %H:%M"),
            end.format("%Y-%m-%d %H:%M"),
            ordered.len(),
            type_parts.join(", "),
        );

        if !topics.is_empty() {
            sentence.push_str(&format!(". Key topics: {}", topics.join(", ")));
        }
        if !outcomes.is_empty() {
            sentence.push_str(&format!(
                ". Outcomes: {}",
                outcomes.into_iter().collect::<Vec<_>>().join(", ")
            ));
        }
        if !tools.is_empty() {
            sentence.push_str(&format!(
                ". Tools used: {}",
                tools.into_iter().collect::<Vec<_>>().join(", ")
            ));
        }
        sentence.push('.');

        Ok(sentence)
    }
}

/// Derive the summary chunk for a group, reusing `text` as its content
pub(crate) fn build_summary_chunk(
    chunks: &[ConversationChunk],
    text: String,
) -> Result<ConversationChunk> {
    let first = chunks.first().ok_or(MemoryError::EmptyInput)?;

    let mut tags: BTreeSet<String> = BTreeSet::new();
    let mut tools: BTreeSet<String> = BTreeSet::new();
    let mut repositories: BTreeSet<String> = BTreeSet::new();
    let mut time_spent: u32 = 0;

    for chunk in chunks {
        tags.extend(chunk.metadata.tags.iter().cloned());
        tools.extend(chunk.metadata.tools_used.iter().cloned());
        if let Some(repo) = &chunk.metadata.repository {
            repositories.insert(repo.clone());
        }
        time_spent = time_spent.saturating_add(chunk.metadata.time_spent_minutes.unwrap_or(0));
    }

    let metadata = ChunkMetadata {
        // Repository survives only when unambiguous across the group.
        repository: if repositories.len() == 1 {
            repositories.into_iter().next()
        } else {
            None
        },
        tags: tags.into_iter().collect(),
        tools_used: tools.into_iter().collect(),
        time_spent_minutes: if time_spent > 0 { Some(time_spent) } else { None },
        ..Default::default()
    };

    let mut summary = ConversationChunk::new(&first.session_id, ChunkType::SessionSummary, text);
    summary.summary = format!("Summary of {} memories", chunks.len());
    summary.metadata = metadata;
    summary.related_chunks = chunks.iter().map(|c| c.id.clone()).collect();
    Ok(summary)
}

#[async_trait]
impl Summarizer for RuleBasedSummarizer {
    async fn summarize(&self, chunks: &[ConversationChunk]) -> Result<String> {
        self.compose(chunks)
    }

    async fn summarize_chain(&self, chunks: &[ConversationChunk]) -> Result<ConversationChunk> {
        let text = self.compose(chunks)?;
        build_summary_chunk(chunks, text)
    }
}

/// Top-N weighted topics: tags count double, long summary tokens count once
fn key_topics(chunks: &[&ConversationChunk], limit: usize) -> Vec<String> {
    let mut weights: HashMap<String, usize> = HashMap::new();

    for chunk in chunks {
        for tag in &chunk.metadata.tags {
            *weights.entry(tag.to_lowercase()).or_insert(0) += 2;
        }
        for token in chunk.summary.split_whitespace() {
            let token: String = token
                .chars()
                .filter(|c| c.is_alphanumeric())
                .collect::<String>()
                .to_lowercase();
            if token.len() > 5 && !STOPWORDS.contains(token.as_str()) {
                *weights.entry(token).or_insert(0) += 1;
            }
        }
    }

    let mut ranked: Vec<(String, usize)> = weights.into_iter().collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
    ranked.into_iter().take(limit).map(|(t, _)| t).collect()
}

fn type_label(chunk_type: ChunkType) -> &'static str {
    match chunk_type {
        ChunkType::Problem => "problem",
        ChunkType::Solution => "solution",
        ChunkType::Verification => "verification",
        ChunkType::Discussion => "discussion",
        ChunkType::Analysis => "analysis",
        ChunkType::Question => "question",
        ChunkType::ArchitectureDecision => "architecture decision",
        ChunkType::CodeChange => "code change",
        ChunkType::Task => "task",
        ChunkType::TaskUpdate => "task update",
        ChunkType::TaskProgress => "task progress",
        ChunkType::SessionSummary => "session summary",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::chunk::Outcome;
    use chrono::Duration;

    fn group() -> Vec<ConversationChunk> {
        let base = Utc::now() - Duration::days(10);
        let mut chunks = Vec::new();
        for i in 0..3 {
            let mut chunk = ConversationChunk::new(
                "session-a",
                if i == 0 { ChunkType::Problem } else { ChunkType::Solution },
                format!("content {i}"),
            )
            .with_summary("refactored authentication middleware");
            chunk.timestamp = base + Duration::hours(i);
            chunk.metadata.tags = vec!["auth".to_string()];
            chunk.metadata.tools_used = vec!["editor".to_string()];
            chunk.metadata.outcome = Some(Outcome::Success);
            chunk.metadata.time_spent_minutes = Some(30);
            chunks.push(chunk);
        }
        chunks
    }

    #[tokio::test]
    async fn test_empty_group_rejected() {
        let summarizer = RuleBasedSummarizer::new();
        assert!(matches!(
            summarizer.summarize(&[]).await,
            Err(MemoryError::EmptyInput)
        ));
        assert!(matches!(
            summarizer.summarize_chain(&[]).await,
            Err(MemoryError::EmptyInput)
        ));
    }

    #[tokio::test]
    async fn test_summary_mentions_counts_and_topics() {
        let summarizer = RuleBasedSummarizer::new();
        let text = summarizer.summarize(&group()).await.unwrap();

        assert!(text.contains("3 memories"));
        assert!(text.contains("1 problem"));
        assert!(text.contains("2 solution"));
        assert!(text.contains("auth"));
        assert!(text.contains("success"));
        assert!(text.contains("editor"));
    }

    #[tokio::test]
    async fn test_chain_carries_provenance() {
        let summarizer = RuleBasedSummarizer::new();
        let chunks = group();
        let ids: HashSet<String> = chunks.iter().map(|c| c.id.clone()).collect();

        let derived = summarizer.summarize_chain(&chunks).await.unwrap();

        assert_eq!(derived.chunk_type, ChunkType::SessionSummary);
        assert_eq!(derived.session_id, "session-a");
        assert_eq!(derived.summary, "Summary of 3 memories");
        assert_eq!(
            derived.related_chunks.iter().cloned().collect::<HashSet<_>>(),
            ids
        );
        assert_eq!(derived.metadata.time_spent_minutes, Some(90));
        assert!(!ids.contains(&derived.id));
    }

    #[tokio::test]
    async fn test_repository_only_when_unique() {
        let summarizer = RuleBasedSummarizer::new();
        let mut chunks = group();
        for chunk in &mut chunks {
            chunk.metadata.repository = Some("acme/api".to_string());
        }
        let derived = summarizer.summarize_chain(&chunks).await.unwrap();
        assert_eq!(derived.metadata.repository.as_deref(), Some("acme/api"));

        chunks[0].metadata.repository = Some("acme/web".to_string());
        let derived = summarizer.summarize_chain(&chunks).await.unwrap();
        assert_eq!(derived.metadata.repository, None);
    }

    #[test]
    fn test_key_topics_weighting() {
        let mut chunk = ConversationChunk::new("s", ChunkType::Discussion, "x")
            .with_summary("deployment pipeline deployment");
        chunk.metadata.tags = vec!["caching".to_string()];
        let chunks = vec![chunk];
        let refs: Vec<&ConversationChunk> = chunks.iter().collect();

        let topics = key_topics(&refs, 5);
        // Tag weight 2 equals the doubled token; order falls back to alpha.
        assert_eq!(topics[0], "caching");
        assert!(topics.contains(&"deployment".to_string()));
        assert!(topics.contains(&"pipeline".to_string()));
    }
}
