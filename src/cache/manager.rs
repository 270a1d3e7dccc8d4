//! Tiered cache manager: L1/L2/L3 routing, promotion, and coherence.
//!
//! Get probes L1 -> L2 -> L3 and promotes lower-tier hits upward. Set
//! propagation follows the policy's write strategy. Deletes hit every
//! tier synchronously and then broadcast an invalidation on a bounded,
//! lossy channel; dropped events are counted so subscribers can treat
//! reads as possibly stale until their own TTL expires.

use crate::cache::backend::CacheStorageBackend;
use crate::cache::local::LocalCache;
use crate::cache::policy::{CachePolicy, CacheTier, WriteStrategy};
use crate::cache::prefetch::PrefetchTracker;
use crate::cache::{CacheError, Result};
use parking_lot::{Mutex, RwLock};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Compression framing: flag byte + original length prefix
const FRAME_RAW: u8 = 0;
const FRAME_LZ4: u8 = 1;

/// Key invalidated across tiers
#[derive(Debug, Clone)]
pub struct InvalidationEvent {
    /// The invalidated key
    pub key: String,

    /// When the delete happened
    pub at: chrono::DateTime<chrono::Utc>,
}

/// Per-tier counters
#[derive(Debug, Clone, Default)]
pub struct TierStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub writes: u64,
    pub write_errors: u64,
    pub reads: u64,
    pub deletes: u64,
    pub total_latency_us: u64,
    pub latency_samples: u64,

    /// Resident bytes, where the tier can report them
    pub memory_bytes: u64,
}

impl TierStats {
    /// hits / (hits + misses)
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }

    /// Mean operation latency in microseconds
    pub fn avg_latency_us(&self) -> f64 {
        if self.latency_samples == 0 {
            0.0
        } else {
            self.total_latency_us as f64 / self.latency_samples as f64
        }
    }

    fn absorb(&mut self, other: &TierStats) {
        self.hits += other.hits;
        self.misses += other.misses;
        self.evictions += other.evictions;
        self.writes += other.writes;
        self.write_errors += other.write_errors;
        self.reads += other.reads;
        self.deletes += other.deletes;
        self.total_latency_us += other.total_latency_us;
        self.latency_samples += other.latency_samples;
        self.memory_bytes += other.memory_bytes;
    }
}

/// Aggregate view across tiers
#[derive(Debug, Clone, Default)]
pub struct TieredCacheStats {
    /// Per-tier counters
    pub tiers: HashMap<CacheTier, TierStats>,

    /// Invalidation events dropped because a subscriber's channel was full
    pub invalidation_drops: u64,

    /// Sum over all tiers
    pub global: TierStats,
}

/// Tier manager configuration
#[derive(Debug, Clone)]
pub struct TieredCacheConfig {
    /// Shared policy (TTL, eviction, write strategy, compression)
    pub policy: CachePolicy,

    /// Capacity of each subscriber's invalidation channel
    pub invalidation_capacity: usize,

    /// Background cleanup interval (L3 compaction)
    pub cleanup_interval: Duration,

    /// Hit-rate reporting interval; zero disables the loop
    pub metrics_interval: Duration,

    /// Prefetch analysis interval
    pub prefetch_interval: Duration,

    /// `frequency x confidence` floor for prefetch candidates
    pub prefetch_threshold: f64,
}

impl Default for TieredCacheConfig {
    fn default() -> Self {
        Self {
            policy: CachePolicy::default(),
            invalidation_capacity: 1024,
            cleanup_interval: Duration::from_secs(300),
            metrics_interval: Duration::from_secs(60),
            prefetch_interval: Duration::from_secs(60),
            prefetch_threshold: 4.0,
        }
    }
}

/// Multi-tier cache manager
pub struct TieredCache {
    l1: LocalCache,
    l2: Option<Arc<dyn CacheStorageBackend>>,
    l3: Option<Arc<dyn CacheStorageBackend>>,
    config: TieredCacheConfig,
    stats: Arc<RwLock<HashMap<CacheTier, TierStats>>>,
    invalidation_drops: Arc<AtomicU64>,
    subscribers: Arc<Mutex<Vec<mpsc::Sender<InvalidationEvent>>>>,
    prefetch: Arc<PrefetchTracker>,
    closed: Arc<AtomicBool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl TieredCache {
    /// Create a tier manager.
    ///
    /// `l2` is the distributed tier, `l3` the persistent tier; either may
    /// be absent and the get path simply skips it.
    pub fn new(
        config: TieredCacheConfig,
        l2: Option<Arc<dyn CacheStorageBackend>>,
        l3: Option<Arc<dyn CacheStorageBackend>>,
    ) -> Result<Self> {
        config.policy.validate()?;

        let l1 = LocalCache::new(config.policy.clone())?;
        let mut stats = HashMap::new();
        stats.insert(CacheTier::L1, TierStats::default());
        if l2.is_some() {
            stats.insert(CacheTier::L2, TierStats::default());
        }
        if l3.is_some() {
            stats.insert(CacheTier::L3, TierStats::default());
        }

        let cache = Self {
            l1,
            l2,
            l3,
            prefetch: Arc::new(PrefetchTracker::new(config.prefetch_threshold)),
            config,
            stats: Arc::new(RwLock::new(stats)),
            invalidation_drops: Arc::new(AtomicU64::new(0)),
            subscribers: Arc::new(Mutex::new(Vec::new())),
            closed: Arc::new(AtomicBool::new(false)),
            tasks: Mutex::new(Vec::new()),
        };
        cache.start_background_tasks();
        Ok(cache)
    }

    /// Get a raw value, probing L1 then L2 then L3.
    ///
    /// A hit in a lower tier is promoted to every higher tier with the
    /// policy's TTL.
    pub async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let start = Instant::now();

        if let Some(value) = self.l1.get(key) {
            self.record(CacheTier::L1, start, |s| {
                s.hits += 1;
                s.reads += 1;
            });
            return Ok(Some(value));
        }
        self.record(CacheTier::L1, start, |s| {
            s.misses += 1;
            s.reads += 1;
        });

        if let Some(l2) = &self.l2 {
            let start = Instant::now();
            match l2.get(key).await {
                Ok(Some(encoded)) => {
                    let value = decode_value(&encoded)?;
                    self.record(CacheTier::L2, start, |s| {
                        s.hits += 1;
                        s.reads += 1;
                    });
                    self.promote(key, &value, &[CacheTier::L1]).await;
                    return Ok(Some(value));
                }
                Ok(None) => self.record(CacheTier::L2, start, |s| {
                    s.misses += 1;
                    s.reads += 1;
                }),
                Err(e) => {
                    log::warn!("l2 get for {key} failed: {e}");
                    self.record(CacheTier::L2, start, |s| {
                        s.misses += 1;
                        s.reads += 1;
                    });
                }
            }
        }

        if let Some(l3) = &self.l3 {
            let start = Instant::now();
            match l3.get(key).await {
                Ok(Some(encoded)) => {
                    let value = decode_value(&encoded)?;
                    self.record(CacheTier::L3, start, |s| {
                        s.hits += 1;
                        s.reads += 1;
                    });
                    self.promote(key, &value, &[CacheTier::L1, CacheTier::L2]).await;
                    return Ok(Some(value));
                }
                Ok(None) => self.record(CacheTier::L3, start, |s| {
                    s.misses += 1;
                    s.reads += 1;
                }),
                Err(e) => {
                    log::warn!("l3 get for {key} failed: {e}");
                    self.record(CacheTier::L3, start, |s| {
                        s.misses += 1;
                        s.reads += 1;
                    });
                }
            }
        }

        // Full miss feeds the prefetch pattern table.
        self.prefetch.record_access(key);
        Ok(None)
    }

    /// Get and deserialize a typed value
    pub async fn get_value<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        match self.get(key).await? {
            Some(bytes) => bincode::deserialize(&bytes)
                .map(Some)
                .map_err(|e| CacheError::Serialization(e.to_string())),
            None => Ok(None),
        }
    }

    /// Set with the policy's default TTL
    pub async fn set(&self, key: &str, value: Vec<u8>) -> Result<()> {
        self.set_with_ttl(key, value, None).await
    }

    /// Serialize and set a typed value
    pub async fn set_value<T: Serialize>(&self, key: &str, value: &T) -> Result<()> {
        let bytes =
            bincode::serialize(value).map_err(|e| CacheError::Serialization(e.to_string()))?;
        self.set(key, bytes).await
    }

    /// Set, propagating across tiers per the policy's write strategy
    pub async fn set_with_ttl(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(CacheError::Closed);
        }

        let ttl = self.config.policy.effective_ttl(ttl);
        let encoded = encode_value(&value, &self.config.policy)?;

        match self.config.policy.strategy {
            WriteStrategy::WriteBack => {
                let start = Instant::now();
                self.l1.set_with_ttl(key, value, Some(ttl))?;
                self.record(CacheTier::L1, start, |s| s.writes += 1);
                self.spawn_backend_writes(key, encoded, ttl, true, true);
                Ok(())
            }
            WriteStrategy::WriteAround => {
                if let Some(l3) = &self.l3 {
                    let start = Instant::now();
                    match l3.set(key, &encoded, Some(ttl)).await {
                        Ok(()) => self.record(CacheTier::L3, start, |s| s.writes += 1),
                        Err(e) => {
                            self.record(CacheTier::L3, start, |s| s.write_errors += 1);
                            return Err(e);
                        }
                    }
                }
                self.spawn_backend_writes(key, encoded, ttl, true, false);
                Ok(())
            }
            // write_through, and the documented variants that fall back to it
            _ => {
                let start = Instant::now();
                self.l1.set_with_ttl(key, value, Some(ttl))?;
                self.record(CacheTier::L1, start, |s| s.writes += 1);

                if let Some(l2) = &self.l2 {
                    let start = Instant::now();
                    match l2.set(key, &encoded, Some(ttl)).await {
                        Ok(()) => self.record(CacheTier::L2, start, |s| s.writes += 1),
                        Err(e) => {
                            self.record(CacheTier::L2, start, |s| s.write_errors += 1);
                            return Err(e);
                        }
                    }
                }
                if let Some(l3) = &self.l3 {
                    let start = Instant::now();
                    match l3.set(key, &encoded, Some(ttl)).await {
                        Ok(()) => self.record(CacheTier::L3, start, |s| s.writes += 1),
                        Err(e) => {
                            self.record(CacheTier::L3, start, |s| s.write_errors += 1);
                            return Err(e);
                        }
                    }
                }
                Ok(())
            }
        }
    }

    /// Delete from every tier, then broadcast the invalidation
    pub async fn delete(&self, key: &str) -> Result<()> {
        if self.l1.delete(key) {
            self.record_plain(CacheTier::L1, |s| s.deletes += 1);
        }
        if let Some(l2) = &self.l2 {
            match l2.delete(key).await {
                Ok(true) => self.record_plain(CacheTier::L2, |s| s.deletes += 1),
                Ok(false) => {}
                Err(e) => log::warn!("l2 delete for {key} failed: {e}"),
            }
        }
        if let Some(l3) = &self.l3 {
            match l3.delete(key).await {
                Ok(true) => self.record_plain(CacheTier::L3, |s| s.deletes += 1),
                Ok(false) => {}
                Err(e) => log::warn!("l3 delete for {key} failed: {e}"),
            }
        }

        self.broadcast_invalidation(key);
        Ok(())
    }

    /// Subscribe to invalidation events.
    ///
    /// The channel is bounded; when a subscriber falls behind, events are
    /// dropped and counted. A subscriber that observes drops must treat
    /// reads as possibly stale until its own TTL expires.
    pub fn subscribe_invalidations(&self) -> mpsc::Receiver<InvalidationEvent> {
        let (tx, rx) = mpsc::channel(self.config.invalidation_capacity.max(1));
        self.subscribers.lock().push(tx);
        rx
    }

    /// Current prefetch candidates (advisory; nothing is fetched)
    pub fn prefetch_candidates(&self) -> Vec<crate::cache::prefetch::PrefetchCandidate> {
        self.prefetch.candidates()
    }

    /// Counter snapshot across tiers
    pub fn stats(&self) -> TieredCacheStats {
        let mut tiers = self.stats.read().clone();

        // Fold live L1 counters into the tier view.
        if let Some(l1_stats) = tiers.get_mut(&CacheTier::L1) {
            let live = self.l1.stats();
            l1_stats.evictions = live.evictions;
            l1_stats.memory_bytes = live.bytes as u64;
        }

        let mut global = TierStats::default();
        for tier in tiers.values() {
            global.absorb(tier);
        }

        TieredCacheStats {
            tiers,
            invalidation_drops: self.invalidation_drops.load(Ordering::Relaxed),
            global,
        }
    }

    /// Direct access to the L1 tier
    pub fn local(&self) -> &LocalCache {
        &self.l1
    }

    /// Stop background tasks and reject further writes
    pub fn shutdown(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.l1.close();
        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
    }

    async fn promote(&self, key: &str, value: &[u8], tiers: &[CacheTier]) {
        let ttl = self.config.policy.ttl;
        for tier in tiers {
            match tier {
                CacheTier::L1 => {
                    if let Err(e) = self.l1.set_with_ttl(key, value.to_vec(), Some(ttl)) {
                        log::debug!("promotion of {key} to l1 failed: {e}");
                    } else {
                        self.record_plain(CacheTier::L1, |s| s.writes += 1);
                    }
                }
                CacheTier::L2 => {
                    if let Some(l2) = &self.l2 {
                        let encoded = match encode_value(value, &self.config.policy) {
                            Ok(encoded) => encoded,
                            Err(e) => {
                                log::debug!("promotion encode for {key} failed: {e}");
                                continue;
                            }
                        };
                        if let Err(e) = l2.set(key, &encoded, Some(ttl)).await {
                            log::debug!("promotion of {key} to l2 failed: {e}");
                        } else {
                            self.record_plain(CacheTier::L2, |s| s.writes += 1);
                        }
                    }
                }
                CacheTier::L3 => {}
            }
        }
    }

    fn spawn_backend_writes(&self, key: &str, encoded: Vec<u8>, ttl: Duration, l2: bool, l3: bool) {
        let l2_backend = if l2 { self.l2.clone() } else { None };
        let l3_backend = if l3 { self.l3.clone() } else { None };
        if l2_backend.is_none() && l3_backend.is_none() {
            return;
        }

        let key = key.to_string();
        let stats = Arc::clone(&self.stats);
        tokio::spawn(async move {
            if let Some(backend) = l2_backend {
                match backend.set(&key, &encoded, Some(ttl)).await {
                    Ok(()) => bump(&stats, CacheTier::L2, |s| s.writes += 1),
                    Err(e) => {
                        log::warn!("async l2 write for {key} failed: {e}");
                        bump(&stats, CacheTier::L2, |s| s.write_errors += 1);
                    }
                }
            }
            if let Some(backend) = l3_backend {
                match backend.set(&key, &encoded, Some(ttl)).await {
                    Ok(()) => bump(&stats, CacheTier::L3, |s| s.writes += 1),
                    Err(e) => {
                        log::warn!("async l3 write for {key} failed: {e}");
                        bump(&stats, CacheTier::L3, |s| s.write_errors += 1);
                    }
                }
            }
        });
    }

    fn broadcast_invalidation(&self, key: &str) {
        let event = InvalidationEvent {
            key: key.to_string(),
            at: chrono::Utc::now(),
        };

        let mut subscribers = self.subscribers.lock();
        subscribers.retain(|tx| !tx.is_closed());
        for tx in subscribers.iter() {
            if tx.try_send(event.clone()).is_err() {
                // Bounded and lossy by policy: count the drop, move on.
                self.invalidation_drops.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    fn record(&self, tier: CacheTier, start: Instant, update: impl FnOnce(&mut TierStats)) {
        let elapsed = start.elapsed().as_micros() as u64;
        let mut stats = self.stats.write();
        let entry = stats.entry(tier).or_default();
        entry.total_latency_us += elapsed;
        entry.latency_samples += 1;
        update(entry);
    }

    fn record_plain(&self, tier: CacheTier, update: impl FnOnce(&mut TierStats)) {
        let mut stats = self.stats.write();
        update(stats.entry(tier).or_default());
    }

    fn start_background_tasks(&self) {
        let closed = Arc::clone(&self.closed);
        let prefetch = Arc::clone(&self.prefetch);
        let prefetch_interval = self.config.prefetch_interval;
        let mut tasks = self.tasks.lock();

        if !prefetch_interval.is_zero() {
            tasks.push(tokio::spawn(async move {
                let mut ticker = tokio::time::interval(prefetch_interval);
                ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
                loop {
                    ticker.tick().await;
                    if closed.load(Ordering::SeqCst) {
                        break;
                    }
                    let found = prefetch.analyze();
                    if found > 0 {
                        log::debug!("prefetch analysis produced {found} candidates");
                    }
                }
            }));
        }

        if !self.config.cleanup_interval.is_zero() {
            if let Some(l3) = self.l3.clone() {
                let closed = Arc::clone(&self.closed);
                let interval = self.config.cleanup_interval;
                tasks.push(tokio::spawn(async move {
                    let mut ticker = tokio::time::interval(interval);
                    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
                    loop {
                        ticker.tick().await;
                        if closed.load(Ordering::SeqCst) {
                            break;
                        }
                        if let Err(e) = l3.compact().await {
                            log::warn!("l3 compaction failed: {e}");
                        }
                    }
                }));
            }
        }

        if !self.config.metrics_interval.is_zero() {
            let closed = Arc::clone(&self.closed);
            let stats = Arc::clone(&self.stats);
            let interval = self.config.metrics_interval;
            tasks.push(tokio::spawn(async move {
                let mut ticker = tokio::time::interval(interval);
                ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
                loop {
                    ticker.tick().await;
                    if closed.load(Ordering::SeqCst) {
                        break;
                    }
                    let snapshot = stats.read().clone();
                    for (tier, tier_stats) in &snapshot {
                        log::debug!(
                            "cache {}: hit rate {:.2}, {} reads, {} writes",
                            tier.label(),
                            tier_stats.hit_rate(),
                            tier_stats.reads,
                            tier_stats.writes
                        );
                    }
                }
            }));
        }
    }
}

impl Drop for TieredCache {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn bump(
    stats: &Arc<RwLock<HashMap<CacheTier, TierStats>>>,
    tier: CacheTier,
    update: impl FnOnce(&mut TierStats),
) {
    let mut stats = stats.write();
    update(stats.entry(tier).or_default());
}

/// Frame a value for backend storage, compressing above the threshold
fn encode_value(value: &[u8], policy: &CachePolicy) -> Result<Vec<u8>> {
    if policy.compression && value.len() > policy.compression_threshold {
        let compressed = lz4::block::compress(value, None, false)
            .map_err(|e| CacheError::Compression(e.to_string()))?;
        let mut framed = Vec::with_capacity(5 + compressed.len());
        framed.push(FRAME_LZ4);
        framed.extend_from_slice(&(value.len() as u32).to_le_bytes());
        framed.extend_from_slice(&compressed);
        Ok(framed)
    } else {
        let mut framed = Vec::with_capacity(5 + value.len());
        framed.push(FRAME_RAW);
        framed.extend_from_slice(&(value.len() as u32).to_le_bytes());
        framed.extend_from_slice(value);
        Ok(framed)
    }
}

/// Reverse [`encode_value`]
fn decode_value(framed: &[u8]) -> Result<Vec<u8>> {
    if framed.len() < 5 {
        return Err(CacheError::Serialization("truncated cache frame".into()));
    }
    let mut len_bytes = [0u8; 4];
    len_bytes.copy_from_slice(&framed[1..5]);
    let original_len = u32::from_le_bytes(len_bytes) as i32;

    match framed[0] {
        FRAME_RAW => Ok(framed[5..].to_vec()),
        FRAME_LZ4 => lz4::block::decompress(&framed[5..], Some(original_len))
            .map_err(|e| CacheError::Compression(e.to_string())),
        other => Err(CacheError::Serialization(format!(
            "unknown cache frame tag {other}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::backend::MemoryBackend;

    fn config() -> TieredCacheConfig {
        TieredCacheConfig {
            policy: CachePolicy {
                cleanup_interval: Duration::ZERO,
                ..Default::default()
            },
            cleanup_interval: Duration::ZERO,
            prefetch_interval: Duration::ZERO,
            ..Default::default()
        }
    }

    fn three_tier() -> (TieredCache, Arc<MemoryBackend>, Arc<MemoryBackend>) {
        let l2 = Arc::new(MemoryBackend::new());
        let l3 = Arc::new(MemoryBackend::new());
        let cache = TieredCache::new(config(), Some(l2.clone()), Some(l3.clone())).unwrap();
        (cache, l2, l3)
    }

    #[tokio::test]
    async fn test_write_through_reaches_all_tiers() {
        let (cache, l2, l3) = three_tier();
        cache.set("k", b"value".to_vec()).await.unwrap();

        assert_eq!(cache.get("k").await.unwrap(), Some(b"value".to_vec()));
        assert!(l2.get("k").await.unwrap().is_some());
        assert!(l3.get("k").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_l3_hit_promotes_upward() {
        let (cache, l2, _l3) = three_tier();
        cache.set("k", b"value".to_vec()).await.unwrap();

        // Simulate L1/L2 loss: the value survives only in L3.
        cache.local().clear();
        l2.delete("k").await.unwrap();

        assert_eq!(cache.get("k").await.unwrap(), Some(b"value".to_vec()));
        assert!(cache.local().get("k").is_some());
        assert!(l2.get("k").await.unwrap().is_some());

        let stats = cache.stats();
        assert_eq!(stats.tiers[&CacheTier::L3].hits, 1);
    }

    #[tokio::test]
    async fn test_write_around_skips_l1() {
        let mut cfg = config();
        cfg.policy.strategy = WriteStrategy::WriteAround;
        let l2 = Arc::new(MemoryBackend::new());
        let l3 = Arc::new(MemoryBackend::new());
        let cache = TieredCache::new(cfg, Some(l2.clone()), Some(l3.clone())).unwrap();

        cache.set("k", b"value".to_vec()).await.unwrap();

        assert!(cache.local().get("k").is_none());
        assert!(l3.get("k").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_write_back_l1_is_synchronous() {
        let mut cfg = config();
        cfg.policy.strategy = WriteStrategy::WriteBack;
        let l3 = Arc::new(MemoryBackend::new());
        let cache = TieredCache::new(cfg, None, Some(l3.clone())).unwrap();

        cache.set("k", b"value".to_vec()).await.unwrap();
        assert!(cache.local().get("k").is_some());

        // Lower tiers settle asynchronously.
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(l3.get("k").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_delete_broadcasts_invalidation() {
        let (cache, _l2, l3) = three_tier();
        let mut events = cache.subscribe_invalidations();

        cache.set("k", b"value".to_vec()).await.unwrap();
        cache.delete("k").await.unwrap();

        assert_eq!(cache.get("k").await.unwrap(), None);
        assert!(l3.get("k").await.unwrap().is_none());

        let event = events.recv().await.unwrap();
        assert_eq!(event.key, "k");
    }

    #[tokio::test]
    async fn test_full_invalidation_channel_counts_drops() {
        let mut cfg = config();
        cfg.invalidation_capacity = 1;
        let cache = TieredCache::new(cfg, None, None).unwrap();
        let _events = cache.subscribe_invalidations();

        cache.delete("a").await.unwrap();
        cache.delete("b").await.unwrap();
        cache.delete("c").await.unwrap();

        assert!(cache.stats().invalidation_drops >= 1);
    }

    #[tokio::test]
    async fn test_miss_feeds_prefetch_patterns() {
        let (cache, _l2, _l3) = three_tier();
        for _ in 0..5 {
            let _ = cache.get("hot-missing-key").await.unwrap();
        }
        assert!(cache.prefetch.pattern("hot-missing-key").is_some());
    }

    #[tokio::test]
    async fn test_typed_roundtrip_through_tiers() {
        let (cache, _l2, _l3) = three_tier();

        #[derive(serde::Serialize, serde::Deserialize, PartialEq, Debug)]
        struct Payload {
            name: String,
            count: u32,
        }

        let payload = Payload {
            name: "plan".into(),
            count: 7,
        };
        cache.set_value("p", &payload).await.unwrap();

        cache.local().clear();
        let back: Payload = cache.get_value("p").await.unwrap().unwrap();
        assert_eq!(back, payload);
    }

    #[test]
    fn test_compression_frame_roundtrip() {
        let policy = CachePolicy {
            compression: true,
            compression_threshold: 8,
            ..Default::default()
        };

        let large = vec![42u8; 4096];
        let encoded = encode_value(&large, &policy).unwrap();
        assert_eq!(encoded[0], FRAME_LZ4);
        assert!(encoded.len() < large.len());
        assert_eq!(decode_value(&encoded).unwrap(), large);

        let small = b"tiny".to_vec();
        let encoded = encode_value(&small, &policy).unwrap();
        assert_eq!(encoded[0], FRAME_RAW);
        assert_eq!(decode_value(&encoded).unwrap(), small);
    }

    #[tokio::test]
    async fn test_set_after_shutdown_fails() {
        let (cache, _l2, _l3) = three_tier();
        cache.shutdown();
        assert!(matches!(
            cache.set("k", b"v".to_vec()).await,
            Err(CacheError::Closed)
        ));
    }
}
