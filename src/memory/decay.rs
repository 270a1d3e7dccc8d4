//! Periodic decay manager: score, partition, summarize, evict.
//!
//! One pass pulls every chunk in scope, scores it, and routes it by
//! threshold: recent chunks are untouchable, the lowest scores are
//! deleted, mid-range scores are collapsed into session summaries, and
//! scores just under the relevance floor get their stored relevance
//! refreshed. Per-chunk failures are logged and skipped so a single bad
//! record never aborts a pass.

use crate::memory::chunk::{ConversationChunk, DecayConfig, ScoredChunk};
use crate::memory::scoring::relevance_score;
use crate::memory::store::MemoryStore;
use crate::memory::summarizer::Summarizer;
use crate::memory::{MemoryError, Result};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

/// Adjacent chunks further apart than this split into separate summary groups
const SESSION_GAP_HOURS: i64 = 4;

/// Outcome of one decay pass
#[derive(Debug, Clone, Default)]
pub struct DecayReport {
    /// Chunks fetched and scored
    pub scored: usize,

    /// Chunks skipped because they are younger than the retention period
    pub retained: usize,

    /// Chunks whose stored relevance was refreshed
    pub updated: usize,

    /// Summary chunks written
    pub summaries_written: usize,

    /// Original chunks replaced by a summary
    pub summarized: usize,

    /// Chunks deleted for falling below the deletion threshold
    pub deleted: usize,

    /// Per-chunk errors that were logged and skipped
    pub errors: usize,
}

/// Periodic decay executor
pub struct DecayManager {
    store: Arc<dyn MemoryStore>,
    summarizer: Arc<dyn Summarizer>,
    config: DecayConfig,
    running: Arc<AtomicBool>,
    shutdown_tx: watch::Sender<bool>,
}

impl DecayManager {
    /// Create a manager; the config is validated up front
    pub fn new(
        store: Arc<dyn MemoryStore>,
        summarizer: Arc<dyn Summarizer>,
        config: DecayConfig,
    ) -> Result<Self> {
        config.validate()?;
        let (shutdown_tx, _) = watch::channel(false);
        Ok(Self {
            store,
            summarizer,
            config,
            running: Arc::new(AtomicBool::new(false)),
            shutdown_tx,
        })
    }

    /// Whether the driver task is active
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Start the periodic driver.
    ///
    /// Runs one pass immediately, then one per `decay_interval`. Fails
    /// with [`MemoryError::AlreadyRunning`] on a second start.
    pub fn start(&self) -> Result<()> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(MemoryError::AlreadyRunning);
        }

        let store = Arc::clone(&self.store);
        let summarizer = Arc::clone(&self.summarizer);
        let config = self.config.clone();
        let running = Arc::clone(&self.running);
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        tokio::spawn(async move {
            if let Err(e) = run_pass(&*store, &*summarizer, &config, "").await {
                log::error!("decay pass failed: {e}");
            }

            let interval = config.decay_interval.max(Duration::from_secs(1));
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await; // first tick resolves immediately

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if !running.load(Ordering::SeqCst) {
                            break;
                        }
                        match run_pass(&*store, &*summarizer, &config, "").await {
                            Ok(report) => log::info!(
                                "decay pass: {} scored, {} updated, {} summarized, {} deleted",
                                report.scored, report.updated, report.summarized, report.deleted
                            ),
                            Err(e) => log::error!("decay pass failed: {e}"),
                        }
                    }
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            break;
                        }
                    }
                }
            }

            running.store(false, Ordering::SeqCst);
        });

        Ok(())
    }

    /// Stop the driver; safe to call repeatedly
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        let _ = self.shutdown_tx.send(true);
    }

    /// Run one decay pass over `scope` (empty scope means all chunks)
    pub async fn run_decay(&self, scope: &str) -> Result<DecayReport> {
        run_pass(&*self.store, &*self.summarizer, &self.config, scope).await
    }
}

impl Drop for DecayManager {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Which bucket the partition step routed a chunk into
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Disposition {
    Retain,
    Keep,
    Update,
    Summarize,
    Delete,
}

fn partition(scored: &ScoredChunk, now: DateTime<Utc>, config: &DecayConfig) -> Disposition {
    let age = now - scored.chunk.timestamp;
    let retention =
        ChronoDuration::from_std(config.retention_period).unwrap_or_else(|_| ChronoDuration::days(7));

    // Recent chunks are never deleted or summarized, whatever their score.
    if age < retention {
        return Disposition::Retain;
    }
    if scored.score < config.deletion_threshold {
        return Disposition::Delete;
    }
    if scored.score < config.summarization_threshold {
        return Disposition::Summarize;
    }
    if scored.score < config.min_relevance {
        return Disposition::Update;
    }
    Disposition::Keep
}

async fn run_pass(
    store: &dyn MemoryStore,
    summarizer: &dyn Summarizer,
    config: &DecayConfig,
    scope: &str,
) -> Result<DecayReport> {
    // A fetch failure aborts the whole pass; everything after is per-chunk.
    let chunks = store.get_all_chunks(scope).await?;
    let now = Utc::now();

    let mut report = DecayReport {
        scored: chunks.len(),
        ..Default::default()
    };

    let mut scored: Vec<ScoredChunk> = chunks
        .into_iter()
        .map(|chunk| {
            let score = relevance_score(&chunk, now, config);
            ScoredChunk { chunk, score }
        })
        .collect();
    scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));

    let mut to_update = Vec::new();
    let mut to_summarize = Vec::new();
    let mut to_delete = Vec::new();

    for item in scored {
        match partition(&item, now, config) {
            Disposition::Retain => report.retained += 1,
            Disposition::Keep => {}
            Disposition::Update => to_update.push(item),
            Disposition::Summarize => to_summarize.push(item.chunk),
            Disposition::Delete => to_delete.push(item.chunk),
        }
    }

    summarize_groups(store, summarizer, to_summarize, &mut report).await;

    for mut item in to_update {
        item.chunk.metadata.relevance_score = Some(item.score);
        match store.update_chunk(&item.chunk).await {
            Ok(()) => report.updated += 1,
            Err(e) => {
                log::warn!("relevance update for chunk {} failed: {e}", item.chunk.id);
                report.errors += 1;
            }
        }
    }

    for chunk in to_delete {
        match store.delete_chunk(&chunk.id).await {
            Ok(()) => report.deleted += 1,
            Err(e) => {
                log::warn!("delete of chunk {} failed: {e}", chunk.id);
                report.errors += 1;
            }
        }
    }

    Ok(report)
}

/// Group summarize-marked chunks by session, split on 4-hour gaps, and
/// replace each group of two or more with a derived summary.
async fn summarize_groups(
    store: &dyn MemoryStore,
    summarizer: &dyn Summarizer,
    chunks: Vec<ConversationChunk>,
    report: &mut DecayReport,
) {
    let mut sessions: BTreeMap<String, Vec<ConversationChunk>> = BTreeMap::new();
    for chunk in chunks {
        sessions.entry(chunk.session_id.clone()).or_default().push(chunk);
    }

    for (session_id, mut session_chunks) in sessions {
        session_chunks.sort_by_key(|c| c.timestamp);

        let mut groups: Vec<Vec<ConversationChunk>> = Vec::new();
        for chunk in session_chunks {
            match groups.last_mut() {
                Some(group)
                    if chunk.timestamp - group.last().unwrap().timestamp
                        <= ChronoDuration::hours(SESSION_GAP_HOURS) =>
                {
                    group.push(chunk)
                }
                _ => groups.push(vec![chunk]),
            }
        }

        for group in groups {
            // Singleton groups stay in place; only real groups collapse.
            if group.len() < 2 {
                continue;
            }

            let summary = match summarizer.summarize_chain(&group).await {
                Ok(summary) => summary,
                Err(e) => {
                    log::warn!("summarization for session {session_id} failed: {e}");
                    report.errors += 1;
                    continue;
                }
            };

            // Originals are only removed once their summary is durable.
            if let Err(e) = store.store_chunk(&summary).await {
                log::warn!("summary write for session {session_id} failed: {e}");
                report.errors += 1;
                continue;
            }
            report.summaries_written += 1;

            for original in &group {
                match store.delete_chunk(&original.id).await {
                    Ok(()) => report.summarized += 1,
                    Err(e) => {
                        log::warn!("delete of summarized chunk {} failed: {e}", original.id);
                        report.errors += 1;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::chunk::{ChunkType, DecayStrategy};
    use crate::memory::store::InMemoryStore;
    use crate::memory::summarizer::RuleBasedSummarizer;
    use std::time::Duration;

    fn manager_with(config: DecayConfig) -> (Arc<InMemoryStore>, DecayManager) {
        let store = Arc::new(InMemoryStore::new());
        let manager = DecayManager::new(
            store.clone() as Arc<dyn MemoryStore>,
            Arc::new(RuleBasedSummarizer::new()),
            config,
        )
        .unwrap();
        (store, manager)
    }

    fn aged_chunk(session: &str, days: i64, chunk_type: ChunkType) -> ConversationChunk {
        let mut chunk = ConversationChunk::new(session, chunk_type, "some discussion text");
        chunk.timestamp = Utc::now() - ChronoDuration::days(days);
        chunk
    }

    #[tokio::test]
    async fn test_retention_protects_recent_chunks() {
        let config = DecayConfig {
            strategy: DecayStrategy::Adaptive,
            retention_period: Duration::from_secs(3600),
            importance_boost: Default::default(),
            ..Default::default()
        };
        let (store, manager) = manager_with(config);

        let mut fresh = ConversationChunk::new("s", ChunkType::Discussion, "new work");
        fresh.timestamp = Utc::now() - ChronoDuration::minutes(30);
        let ancient = aged_chunk("s", 180, ChunkType::Discussion);

        store.store_chunk(&fresh).await.unwrap();
        store.store_chunk(&ancient).await.unwrap();

        let report = manager.run_decay("").await.unwrap();

        assert_eq!(report.deleted, 1);
        assert!(store.get(&fresh.id).is_some());
        assert!(store.get(&ancient.id).is_none());
    }

    #[tokio::test]
    async fn test_session_summarization_replaces_group() {
        let config = DecayConfig {
            importance_boost: Default::default(),
            ..Default::default()
        };
        let (store, manager) = manager_with(config);

        // Five 100-day-old chunks, an hour apart, land in the summarize band.
        let base = Utc::now() - ChronoDuration::days(100);
        let mut ids = Vec::new();
        for i in 0..5 {
            let mut chunk = ConversationChunk::new("S", ChunkType::Discussion, format!("part {i}"));
            chunk.timestamp = base + ChronoDuration::hours(i);
            ids.push(chunk.id.clone());
            store.store_chunk(&chunk).await.unwrap();
        }

        let report = manager.run_decay("").await.unwrap();

        assert_eq!(report.summaries_written, 1);
        assert_eq!(report.summarized, 5);
        for id in &ids {
            assert!(store.get(id).is_none());
        }

        let remaining = store.get_all_chunks("").await.unwrap();
        assert_eq!(remaining.len(), 1);
        let summary = &remaining[0];
        assert_eq!(summary.chunk_type, ChunkType::SessionSummary);
        assert_eq!(summary.session_id, "S");
        assert_eq!(summary.related_chunks.len(), 5);
    }

    #[tokio::test]
    async fn test_gap_splits_summary_groups() {
        let config = DecayConfig {
            importance_boost: Default::default(),
            ..Default::default()
        };
        let (store, manager) = manager_with(config);

        let base = Utc::now() - ChronoDuration::days(100);
        for (i, offset_hours) in [0i64, 1, 2, 10, 11].iter().enumerate() {
            let mut chunk = ConversationChunk::new("S", ChunkType::Discussion, format!("part {i}"));
            chunk.timestamp = base + ChronoDuration::hours(*offset_hours);
            store.store_chunk(&chunk).await.unwrap();
        }

        let report = manager.run_decay("").await.unwrap();

        // 0/1/2 form one group, 10/11 another: two summaries.
        assert_eq!(report.summaries_written, 2);
        assert_eq!(report.summarized, 5);
    }

    #[tokio::test]
    async fn test_singleton_groups_not_summarized() {
        let config = DecayConfig {
            importance_boost: Default::default(),
            ..Default::default()
        };
        let (store, manager) = manager_with(config);

        let chunk = aged_chunk("solo", 100, ChunkType::Discussion);
        store.store_chunk(&chunk).await.unwrap();

        let report = manager.run_decay("").await.unwrap();
        assert_eq!(report.summaries_written, 0);
        assert!(store.get(&chunk.id).is_some());
    }

    #[tokio::test]
    async fn test_update_band_writes_relevance() {
        let config = DecayConfig {
            importance_boost: Default::default(),
            ..Default::default()
        };
        let (store, manager) = manager_with(config);

        // Adaptive decay at 60 days gives 0.6, inside the update band.
        let chunk = aged_chunk("s", 60, ChunkType::Discussion);
        store.store_chunk(&chunk).await.unwrap();

        let report = manager.run_decay("").await.unwrap();
        assert_eq!(report.updated, 1);

        let stored = store.get(&chunk.id).unwrap();
        let relevance = stored.metadata.relevance_score.unwrap();
        assert!((0.4..0.7).contains(&relevance), "got {relevance}");
    }

    #[tokio::test]
    async fn test_start_twice_fails_and_stop_is_idempotent() {
        let (_, manager) = manager_with(DecayConfig::default());

        manager.start().unwrap();
        assert!(matches!(manager.start(), Err(MemoryError::AlreadyRunning)));

        manager.stop();
        manager.stop();
    }
}
