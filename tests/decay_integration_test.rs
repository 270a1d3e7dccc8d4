//! End-to-end decay engine scenarios against the in-memory store.

use chrono::{Duration as ChronoDuration, Utc};
use mnemo::memory::{
    ChunkType, ConversationChunk, DecayConfig, DecayManager, MemoryStore, NarrativeSummarizer,
    RuleBasedSummarizer, Summarizer,
};
use mnemo::memory::InMemoryStore;
use std::sync::Arc;
use std::time::Duration;

fn manager(
    store: Arc<InMemoryStore>,
    summarizer: Arc<dyn Summarizer>,
    config: DecayConfig,
) -> DecayManager {
    let _ = env_logger::builder().is_test(true).try_init();
    DecayManager::new(store as Arc<dyn MemoryStore>, summarizer, config).unwrap()
}

fn chunk_aged(session: &str, days: i64, hours: i64) -> ConversationChunk {
    let mut chunk = ConversationChunk::new(session, ChunkType::Discussion, "routine discussion");
    chunk.timestamp = Utc::now() - ChronoDuration::days(days) + ChronoDuration::hours(hours);
    chunk
}

fn boost_free_config() -> DecayConfig {
    DecayConfig {
        importance_boost: Default::default(),
        ..Default::default()
    }
}

#[tokio::test]
async fn retention_protects_recent_chunks_end_to_end() {
    let store = Arc::new(InMemoryStore::new());
    let config = DecayConfig {
        retention_period: Duration::from_secs(3600),
        importance_boost: Default::default(),
        ..Default::default()
    };
    let manager = manager(store.clone(), Arc::new(RuleBasedSummarizer::new()), config);

    let mut fresh = ConversationChunk::new("s", ChunkType::Discussion, "just happened");
    fresh.timestamp = Utc::now() - ChronoDuration::minutes(30);
    store.store_chunk(&fresh).await.unwrap();

    let ancient = chunk_aged("s", 180, 0);
    store.store_chunk(&ancient).await.unwrap();

    let report = manager.run_decay("").await.unwrap();

    assert_eq!(report.deleted, 1);
    assert!(store.get(&fresh.id).is_some());
    assert!(store.get(&ancient.id).is_none());
}

#[tokio::test]
async fn full_session_collapses_into_summary() {
    let store = Arc::new(InMemoryStore::new());
    let manager = manager(
        store.clone(),
        Arc::new(RuleBasedSummarizer::new()),
        boost_free_config(),
    );

    let mut original_ids = Vec::new();
    for hour in 0..5 {
        let chunk = chunk_aged("long-session", 100, hour);
        original_ids.push(chunk.id.clone());
        store.store_chunk(&chunk).await.unwrap();
    }

    manager.run_decay("").await.unwrap();

    let remaining = store.get_all_chunks("").await.unwrap();
    assert_eq!(remaining.len(), 1);

    let summary = &remaining[0];
    assert_eq!(summary.chunk_type, ChunkType::SessionSummary);
    assert_eq!(summary.session_id, "long-session");
    assert_eq!(summary.related_chunks.len(), 5);
    for id in &original_ids {
        assert!(summary.related_chunks.contains(id));
        assert!(store.get(id).is_none());
    }
    assert_eq!(summary.summary, "Summary of 5 memories");
}

#[tokio::test]
async fn narrative_summarizer_in_the_decay_path() {
    let store = Arc::new(InMemoryStore::new());
    let manager = manager(
        store.clone(),
        Arc::new(NarrativeSummarizer::new()),
        boost_free_config(),
    );

    let contents = [
        "hit a bug in the tier promotion",
        "investigating the promotion path",
        "implement a fix for the stale read",
        "test confirms the fix",
    ];
    for (hour, content) in contents.iter().enumerate() {
        let mut chunk = ConversationChunk::new("narrated", ChunkType::Discussion, *content);
        chunk.timestamp =
            Utc::now() - ChronoDuration::days(100) + ChronoDuration::hours(hour as i64);
        store.store_chunk(&chunk).await.unwrap();
    }

    manager.run_decay("").await.unwrap();

    let remaining = store.get_all_chunks("").await.unwrap();
    assert_eq!(remaining.len(), 1);
    assert!(remaining[0].content.contains("Work spanned"));
    assert_eq!(remaining[0].related_chunks.len(), 4);
}

#[tokio::test]
async fn scope_limits_a_pass_to_one_repository() {
    let store = Arc::new(InMemoryStore::new());
    let manager = manager(
        store.clone(),
        Arc::new(RuleBasedSummarizer::new()),
        boost_free_config(),
    );

    let mut scoped = chunk_aged("s1", 180, 0);
    scoped.metadata.repository = Some("acme/api".to_string());
    store.store_chunk(&scoped).await.unwrap();

    let unscoped = chunk_aged("s2", 180, 0);
    store.store_chunk(&unscoped).await.unwrap();

    let report = manager.run_decay("acme/api").await.unwrap();

    assert_eq!(report.deleted, 1);
    assert!(store.get(&scoped.id).is_none());
    assert!(store.get(&unscoped.id).is_some());
}

#[tokio::test]
async fn driver_runs_and_stops() {
    let store = Arc::new(InMemoryStore::new());
    let config = DecayConfig {
        decay_interval: Duration::from_secs(3600),
        importance_boost: Default::default(),
        ..Default::default()
    };
    let manager = manager(store.clone(), Arc::new(RuleBasedSummarizer::new()), config);

    let doomed = chunk_aged("s", 180, 0);
    store.store_chunk(&doomed).await.unwrap();

    manager.start().unwrap();
    // The driver runs one pass immediately.
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(store.get(&doomed.id).is_none());

    manager.stop();
    manager.stop();
    assert!(!manager.is_running());
}
