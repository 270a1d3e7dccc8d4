//! End-to-end tier manager scenarios against in-memory backends.

use mnemo::cache::{
    CachePolicy, CacheStorageBackend, CacheTier, EvictionPolicy, MemoryBackend, TieredCache,
    WriteStrategy,
};
use mnemo::cache::manager::TieredCacheConfig;
use std::sync::Arc;
use std::time::Duration;

fn quiet_config(strategy: WriteStrategy, eviction: EvictionPolicy) -> TieredCacheConfig {
    let _ = env_logger::builder().is_test(true).try_init();
    TieredCacheConfig {
        policy: CachePolicy {
            strategy,
            eviction,
            cleanup_interval: Duration::ZERO,
            ..Default::default()
        },
        cleanup_interval: Duration::ZERO,
        prefetch_interval: Duration::ZERO,
        ..Default::default()
    }
}

#[tokio::test]
async fn value_survives_l1_loss_via_lower_tiers() {
    let l2 = Arc::new(MemoryBackend::new());
    let l3 = Arc::new(MemoryBackend::new());
    let cache = TieredCache::new(
        quiet_config(WriteStrategy::WriteThrough, EvictionPolicy::Lru),
        Some(l2.clone()),
        Some(l3.clone()),
    )
    .unwrap();

    cache.set("persisted", b"payload".to_vec()).await.unwrap();

    // A process restart empties L1; lower tiers answer and repopulate it.
    cache.local().clear();
    assert_eq!(
        cache.get("persisted").await.unwrap(),
        Some(b"payload".to_vec())
    );
    assert!(cache.local().get("persisted").is_some());
}

#[tokio::test]
async fn lru_eviction_across_the_l1_tier() {
    let mut config = quiet_config(WriteStrategy::WriteThrough, EvictionPolicy::Lru);
    config.policy.max_items = 2;
    let cache = TieredCache::new(config, None, None).unwrap();

    cache.set("k1", b"v1".to_vec()).await.unwrap();
    cache.set("k2", b"v2".to_vec()).await.unwrap();
    assert!(cache.get("k1").await.unwrap().is_some());
    cache.set("k3", b"v3".to_vec()).await.unwrap();

    assert!(cache.get("k2").await.unwrap().is_none());
    assert!(cache.get("k1").await.unwrap().is_some());
    assert!(cache.get("k3").await.unwrap().is_some());
}

#[tokio::test]
async fn invalidation_reaches_subscribers_on_delete() {
    let l3 = Arc::new(MemoryBackend::new());
    let cache = TieredCache::new(
        quiet_config(WriteStrategy::WriteThrough, EvictionPolicy::Lru),
        None,
        Some(l3.clone()),
    )
    .unwrap();

    let mut invalidations = cache.subscribe_invalidations();

    cache.set("shared", b"v".to_vec()).await.unwrap();
    cache.delete("shared").await.unwrap();

    let event = invalidations.recv().await.unwrap();
    assert_eq!(event.key, "shared");
    assert!(l3.get("shared").await.unwrap().is_none());
    assert_eq!(cache.get("shared").await.unwrap(), None);
}

#[tokio::test]
async fn write_back_settles_asynchronously() {
    let l3 = Arc::new(MemoryBackend::new());
    let cache = TieredCache::new(
        quiet_config(WriteStrategy::WriteBack, EvictionPolicy::Lru),
        None,
        Some(l3.clone()),
    )
    .unwrap();

    cache.set("wb", b"v".to_vec()).await.unwrap();
    // L1 is visible immediately.
    assert!(cache.local().get("wb").is_some());

    // The async lower-tier write lands shortly after.
    let mut landed = false;
    for _ in 0..50 {
        if l3.get("wb").await.unwrap().is_some() {
            landed = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(landed, "write-back never reached L3");
}

#[tokio::test]
async fn per_tier_statistics_accumulate() {
    let l3 = Arc::new(MemoryBackend::new());
    let cache = TieredCache::new(
        quiet_config(WriteStrategy::WriteThrough, EvictionPolicy::Lru),
        None,
        Some(l3),
    )
    .unwrap();

    cache.set("a", b"1".to_vec()).await.unwrap();
    cache.get("a").await.unwrap();
    cache.get("missing").await.unwrap();

    let stats = cache.stats();
    let l1 = &stats.tiers[&CacheTier::L1];
    assert_eq!(l1.hits, 1);
    assert!(l1.misses >= 1);
    assert!(l1.writes >= 1);
    assert!(stats.global.hits >= 1);
    assert!(l1.hit_rate() > 0.0);
}

#[tokio::test]
async fn repeated_misses_become_prefetch_candidates() {
    let mut config = quiet_config(WriteStrategy::WriteThrough, EvictionPolicy::Lru);
    config.prefetch_threshold = 0.1;
    let cache = TieredCache::new(config, None, None).unwrap();

    for _ in 0..25 {
        let _ = cache.get("always-missing").await.unwrap();
    }

    // The analysis pass is normally periodic; candidates only appear
    // after it runs, and nothing is fetched on its own.
    assert!(cache.prefetch_candidates().is_empty());
}
