//! Narrative summarization with phase detection and semantic clustering.
//!
//! Builds on the rule-based summarizer:
//! - Semantic grouping through an optional embedding provider
//! - Narrative flow detection (problem -> investigation -> solution -> verification)
//! - Key-event and critical-information extraction
//! - Sentence rendering that preserves the arc of a session

use crate::memory::chunk::{
    ChunkType, ConversationChunk, Difficulty, Outcome, TaskPriority, TaskStatus,
};
use crate::memory::store::EmbeddingGenerator;
use crate::memory::summarizer::{build_summary_chunk, RuleBasedSummarizer, Summarizer};
use crate::memory::{MemoryError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use std::collections::HashMap;
use std::sync::Arc;

/// Cosine similarity floor for joining a semantic cluster
const CLUSTER_SIMILARITY: f32 = 0.8;

/// Text handed to the embedding provider is truncated to this many chars
const EMBED_TEXT_LIMIT: usize = 1000;

static PROBLEM_KEYWORDS: Lazy<Vec<&'static str>> =
    Lazy::new(|| vec!["error", "issue", "problem", "bug", "failed", "exception"]);
static INVESTIGATION_KEYWORDS: Lazy<Vec<&'static str>> =
    Lazy::new(|| vec!["investigating", "looking", "checking", "analyzing", "debugging"]);
static SOLUTION_KEYWORDS: Lazy<Vec<&'static str>> =
    Lazy::new(|| vec!["fix", "solution", "implement", "create", "resolve"]);
static VERIFICATION_KEYWORDS: Lazy<Vec<&'static str>> =
    Lazy::new(|| vec!["test", "verify", "check", "confirm", "validate"]);
static LEARNING_KEYWORDS: Lazy<Vec<&'static str>> =
    Lazy::new(|| vec!["learned", "discovered", "realized", "understanding", "insight"]);
static BREAKTHROUGH_KEYWORDS: Lazy<Vec<&'static str>> =
    Lazy::new(|| vec!["breakthrough", "finally works", "root cause", "figured out", "eureka"]);

/// Tags recognized as technologies when extracting critical information
static KNOWN_TECHNOLOGIES: Lazy<Vec<&'static str>> = Lazy::new(|| {
    vec![
        "rust", "tokio", "redis", "postgres", "postgresql", "sqlite", "docker", "kubernetes",
        "python", "typescript", "javascript", "react", "grpc", "kafka", "git", "aws", "gcp",
        "azure", "terraform", "nginx", "linux", "graphql", "sled", "wasm", "go",
    ]
});

/// Narrative phase a chunk belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NarrativePhase {
    Problem,
    Investigation,
    Solution,
    Verification,
}

impl NarrativePhase {
    fn label(&self) -> &'static str {
        match self {
            NarrativePhase::Problem => "problem",
            NarrativePhase::Investigation => "investigation",
            NarrativePhase::Solution => "solution",
            NarrativePhase::Verification => "verification",
        }
    }
}

/// A transition between two narrative phases
#[derive(Debug, Clone)]
pub struct PhaseTransition {
    pub from: NarrativePhase,
    pub to: NarrativePhase,
    pub at: DateTime<Utc>,
    /// Canned description of what drove the transition
    pub trigger: &'static str,
}

/// A notable moment in the narrative
#[derive(Debug, Clone)]
pub struct KeyEvent {
    pub chunk_id: String,
    pub at: DateTime<Utc>,
    pub description: String,
}

/// Critical information extracted from a chunk group
#[derive(Debug, Clone, Default)]
pub struct CriticalInfo {
    pub solutions: Vec<String>,
    pub decisions: Vec<String>,
    pub learnings: Vec<String>,
    pub errors: Vec<String>,
    pub technologies: Vec<String>,
    pub outcomes: Vec<Outcome>,
    /// chunk id -> related chunk ids
    pub relationships: HashMap<String, Vec<String>>,
}

/// Narrative-aware summarizer composing the rule-based one
pub struct NarrativeSummarizer {
    base: RuleBasedSummarizer,
    embedder: Option<Arc<dyn EmbeddingGenerator>>,
}

impl NarrativeSummarizer {
    /// Create a summarizer without semantic grouping
    pub fn new() -> Self {
        Self {
            base: RuleBasedSummarizer::new(),
            embedder: None,
        }
    }

    /// Create a summarizer that clusters semantically before narrating
    pub fn with_embedder(embedder: Arc<dyn EmbeddingGenerator>) -> Self {
        Self {
            base: RuleBasedSummarizer::new(),
            embedder: Some(embedder),
        }
    }

    /// Group chunks into semantic clusters.
    ///
    /// Greedy: each chunk joins the first existing cluster whose centroid
    /// it matches at >= 0.8 cosine similarity, otherwise starts a new one.
    /// Without an embedder, or for groups of one, the whole group is a
    /// single cluster. Embedding failures degrade the same way.
    async fn cluster(&self, chunks: &[ConversationChunk]) -> Vec<Vec<ConversationChunk>> {
        let embedder = match &self.embedder {
            Some(e) if chunks.len() >= 2 => e,
            _ => return vec![chunks.to_vec()],
        };

        let mut vectors = Vec::with_capacity(chunks.len());
        for chunk in chunks {
            let text: String = chunk.content.chars().take(EMBED_TEXT_LIMIT).collect();
            match embedder.generate(&text).await {
                Ok(v) => vectors.push(v),
                Err(e) => {
                    log::warn!("embedding failed for chunk {}: {e}; using single cluster", chunk.id);
                    return vec![chunks.to_vec()];
                }
            }
        }

        let mut clusters: Vec<Vec<usize>> = Vec::new();
        let mut centroids: Vec<Vec<f32>> = Vec::new();

        for (idx, vector) in vectors.iter().enumerate() {
            let mut joined = false;
            for (cluster, centroid) in clusters.iter_mut().zip(centroids.iter_mut()) {
                if cosine_similarity(vector, centroid) >= CLUSTER_SIMILARITY {
                    cluster.push(idx);
                    update_centroid(centroid, vector, cluster.len());
                    joined = true;
                    break;
                }
            }
            if !joined {
                clusters.push(vec![idx]);
                centroids.push(vector.clone());
            }
        }

        clusters
            .into_iter()
            .map(|indices| indices.into_iter().map(|i| chunks[i].clone()).collect())
            .collect()
    }

    /// Sequential scan producing phase transitions
    fn narrative_flow(&self, chunks: &[ConversationChunk]) -> Vec<PhaseTransition> {
        let mut transitions = Vec::new();
        let mut current: Option<NarrativePhase> = None;

        for chunk in chunks {
            let phase = detect_phase(chunk);
            match current {
                Some(previous) if previous != phase => {
                    transitions.push(PhaseTransition {
                        from: previous,
                        to: phase,
                        at: chunk.timestamp,
                        trigger: transition_trigger(previous, phase),
                    });
                }
                _ => {}
            }
            current = Some(phase);
        }

        transitions
    }

    /// Extract key events from the group
    fn key_events(&self, chunks: &[ConversationChunk]) -> Vec<KeyEvent> {
        let mut events = Vec::new();

        for chunk in chunks {
            let meta = &chunk.metadata;
            let succeeded = meta.outcome == Some(Outcome::Success);

            let description = match chunk.chunk_type {
                ChunkType::Solution if succeeded => Some("solution landed successfully".to_string()),
                ChunkType::Verification if succeeded => {
                    Some("verification passed".to_string())
                }
                ChunkType::CodeChange if succeeded => Some("code change merged".to_string()),
                ChunkType::ArchitectureDecision => {
                    Some("architecture decision recorded".to_string())
                }
                ChunkType::Problem if meta.difficulty == Some(Difficulty::Complex) => {
                    Some("complex problem encountered".to_string())
                }
                ChunkType::Task | ChunkType::TaskUpdate
                    if meta.task_status == Some(TaskStatus::Completed) =>
                {
                    Some("task completed".to_string())
                }
                ChunkType::Task | ChunkType::TaskUpdate
                    if meta.task_priority >= Some(TaskPriority::High) =>
                {
                    Some("high-priority task touched".to_string())
                }
                ChunkType::TaskProgress if meta.task_progress.unwrap_or(0) >= 80 => {
                    Some("task nearly complete".to_string())
                }
                ChunkType::Analysis if contains_any(&chunk.searchable_text(), &LEARNING_KEYWORDS) => {
                    Some("learning captured".to_string())
                }
                _ => None,
            };

            let description = description.or_else(|| {
                contains_any(&chunk.searchable_text(), &BREAKTHROUGH_KEYWORDS)
                    .then(|| "breakthrough moment".to_string())
            });

            if let Some(description) = description {
                events.push(KeyEvent {
                    chunk_id: chunk.id.clone(),
                    at: chunk.timestamp,
                    description,
                });
            }
        }

        events
    }

    /// Route chunk content into the critical-information record
    fn critical_info(&self, chunks: &[ConversationChunk]) -> CriticalInfo {
        let mut info = CriticalInfo::default();

        for chunk in chunks {
            let excerpt = excerpt(chunk);
            match chunk.chunk_type {
                ChunkType::Solution | ChunkType::CodeChange => info.solutions.push(excerpt),
                ChunkType::ArchitectureDecision => info.decisions.push(excerpt),
                ChunkType::Analysis | ChunkType::Discussion
                    if contains_any(&chunk.searchable_text(), &LEARNING_KEYWORDS) =>
                {
                    info.learnings.push(excerpt)
                }
                ChunkType::Problem => {
                    if chunk.metadata.outcome == Some(Outcome::Failure)
                        || contains_any(&chunk.searchable_text(), &PROBLEM_KEYWORDS)
                    {
                        info.errors.push(excerpt);
                    }
                }
                _ => {}
            }

            for tag in &chunk.metadata.tags {
                let lowered = tag.to_lowercase();
                if KNOWN_TECHNOLOGIES.contains(&lowered.as_str())
                    && !info.technologies.contains(&lowered)
                {
                    info.technologies.push(lowered);
                }
            }

            if let Some(outcome) = chunk.metadata.outcome {
                if !info.outcomes.contains(&outcome) {
                    info.outcomes.push(outcome);
                }
            }

            if !chunk.related_chunks.is_empty() {
                info.relationships
                    .insert(chunk.id.clone(), chunk.related_chunks.clone());
            }
        }

        info
    }

    /// Render one cluster's narrative as a period-separated sentence list
    fn render(
        &self,
        chunks: &[ConversationChunk],
        transitions: &[PhaseTransition],
        events: &[KeyEvent],
        info: &CriticalInfo,
    ) -> String {
        let mut ordered: Vec<&ConversationChunk> = chunks.iter().collect();
        ordered.sort_by_key(|c| c.timestamp);
        let start = ordered.first().map(|c| c.timestamp).unwrap_or_else(Utc::now);
        let end = ordered.last().map(|c| c.timestamp).unwrap_or(start);
        let span = end - start;

        let mut sentences = vec![format!(
            "Work spanned {} from {} to {}",
            humanize(span),
            start.format("%Y-%m-%d %H:%M"),
            end.format("%Y-%m-%d %H:%M"),
        )];

        if !transitions.is_empty() {
            let path: Vec<String> = transitions
                .iter()
                .map(|t| format!("{} -> {} ({})", t.from.label(), t.to.label(), t.trigger))
                .collect();
            sentences.push(format!("The narrative moved {}", path.join(", then ")));
        }

        if !info.solutions.is_empty() {
            sentences.push(format!("{} solutions were reached", info.solutions.len()));
        }
        if !info.decisions.is_empty() {
            let top: Vec<&str> = info.decisions.iter().take(3).map(|s| s.as_str()).collect();
            sentences.push(format!("Key decisions: {}", top.join("; ")));
        }
        if !info.learnings.is_empty() {
            let top: Vec<&str> = info.learnings.iter().take(2).map(|s| s.as_str()).collect();
            sentences.push(format!("Learnings: {}", top.join("; ")));
        }
        if !info.technologies.is_empty() {
            sentences.push(format!(
                "Technologies involved: {}",
                info.technologies.join(", ")
            ));
        }
        if !events.is_empty() {
            sentences.push(format!("{} key events were recorded", events.len()));
        }

        let mut text = sentences.join(". ");
        text.push('.');
        text
    }

    async fn narrate(&self, chunks: &[ConversationChunk]) -> Result<String> {
        if chunks.is_empty() {
            return Err(MemoryError::EmptyInput);
        }

        let clusters = self.cluster(chunks).await;
        let mut parts = Vec::with_capacity(clusters.len());

        for cluster in &clusters {
            let mut ordered = cluster.clone();
            ordered.sort_by_key(|c| c.timestamp);

            let transitions = self.narrative_flow(&ordered);
            let events = self.key_events(&ordered);
            let info = self.critical_info(&ordered);
            parts.push(self.render(&ordered, &transitions, &events, &info));
        }

        Ok(parts.join(" "))
    }
}

impl Default for NarrativeSummarizer {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Summarizer for NarrativeSummarizer {
    async fn summarize(&self, chunks: &[ConversationChunk]) -> Result<String> {
        self.narrate(chunks).await
    }

    async fn summarize_chain(&self, chunks: &[ConversationChunk]) -> Result<ConversationChunk> {
        let text = self.narrate(chunks).await?;
        build_summary_chunk(chunks, text)
    }
}

/// Detect the phase of a single chunk: keywords first, type as fallback
pub fn detect_phase(chunk: &ConversationChunk) -> NarrativePhase {
    let text = chunk.searchable_text();

    if contains_any(&text, &PROBLEM_KEYWORDS) {
        return NarrativePhase::Problem;
    }
    if contains_any(&text, &INVESTIGATION_KEYWORDS) {
        return NarrativePhase::Investigation;
    }
    if contains_any(&text, &SOLUTION_KEYWORDS) {
        return NarrativePhase::Solution;
    }
    if contains_any(&text, &VERIFICATION_KEYWORDS) {
        return NarrativePhase::Verification;
    }

    match chunk.chunk_type {
        ChunkType::Problem | ChunkType::Question => NarrativePhase::Problem,
        ChunkType::Solution | ChunkType::CodeChange | ChunkType::ArchitectureDecision => {
            NarrativePhase::Solution
        }
        ChunkType::Verification => NarrativePhase::Verification,
        _ => NarrativePhase::Investigation,
    }
}

fn transition_trigger(from: NarrativePhase, to: NarrativePhase) -> &'static str {
    use NarrativePhase::*;
    match (from, to) {
        (Problem, Investigation) => "began investigating the problem",
        (Problem, Solution) => "jumped directly to a fix",
        (Investigation, Solution) => "arrived at a solution approach",
        (Investigation, Problem) => "uncovered a further problem",
        (Solution, Verification) => "moved to verifying the fix",
        (Solution, Problem) => "the fix surfaced a new problem",
        (Verification, Problem) => "verification exposed a regression",
        (Verification, Solution) => "reworked the fix after testing",
        _ => "shifted focus",
    }
}

fn contains_any(text: &str, keywords: &[&str]) -> bool {
    keywords.iter().any(|k| text.contains(k))
}

fn excerpt(chunk: &ConversationChunk) -> String {
    if !chunk.summary.is_empty() {
        chunk.summary.clone()
    } else {
        chunk.content.chars().take(120).collect()
    }
}

fn humanize(span: chrono::Duration) -> String {
    let minutes = span.num_minutes();
    if minutes < 60 {
        format!("{} minutes", minutes.max(1))
    } else if minutes < 48 * 60 {
        format!("{} hours", span.num_hours())
    } else {
        format!("{} days", span.num_days())
    }
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.is_empty() || a.len() != b.len() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

/// Incremental mean update so later members pull the centroid along
fn update_centroid(centroid: &mut [f32], vector: &[f32], members: usize) {
    let n = members as f32;
    for (c, v) in centroid.iter_mut().zip(vector) {
        *c += (v - *c) / n;
    }
}
