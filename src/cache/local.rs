//! Single-tier cache with TTL expiry and policy-driven eviction.
//!
//! Backs the L1 tier of [`crate::cache::TieredCache`] and is usable on its
//! own. A background janitor sweeps expired entries in batches; reads of
//! expired entries report a miss and remove the entry inline.

use crate::cache::entry::CacheEntry;
use crate::cache::policy::{CachePolicy, CacheTier, EvictionPolicy};
use crate::cache::{CacheError, Result};
use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

/// Counters for a single tier
///
/// Monotonic except across [`LocalCache::clear`], which resets them.
#[derive(Debug, Clone, Default)]
pub struct LocalCacheStats {
    pub hits: u64,
    pub misses: u64,
    pub inserts: u64,
    pub evictions: u64,
    pub expirations: u64,
    pub deletes: u64,

    /// Current number of live entries
    pub items: usize,

    /// Current total value bytes
    pub bytes: usize,
}

impl LocalCacheStats {
    /// hits / (hits + misses); zero before any reads
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// In-process cache with lru/lfu/fifo/ttl eviction
pub struct LocalCache {
    entries: Arc<RwLock<HashMap<String, CacheEntry>>>,
    policy: CachePolicy,
    stats: Arc<RwLock<LocalCacheStats>>,
    closed: Arc<AtomicBool>,
    janitor: Mutex<Option<JoinHandle<()>>>,
}

impl LocalCache {
    /// Create a cache and start its janitor (if the policy enables one)
    pub fn new(policy: CachePolicy) -> Result<Self> {
        policy.validate()?;

        let cache = Self {
            entries: Arc::new(RwLock::new(HashMap::new())),
            policy,
            stats: Arc::new(RwLock::new(LocalCacheStats::default())),
            closed: Arc::new(AtomicBool::new(false)),
            janitor: Mutex::new(None),
        };
        cache.start_janitor();
        Ok(cache)
    }

    /// Get raw value bytes; expired entries report a miss and are removed
    pub fn get(&self, key: &str) -> Option<Vec<u8>> {
        let now = Utc::now();

        {
            let mut entries = self.entries.write();
            if let Some(entry) = entries.get_mut(key) {
                if entry.is_expired(now) {
                    let removed = entries.remove(key).unwrap();
                    let mut stats = self.stats.write();
                    stats.expirations += 1;
                    stats.misses += 1;
                    stats.items = entries.len();
                    stats.bytes -= removed.size_bytes.min(stats.bytes);
                    return None;
                }
                entry.touch(now);
                let value = entry.value.clone();
                self.stats.write().hits += 1;
                return Some(value);
            }
        }

        self.stats.write().misses += 1;
        None
    }

    /// Deserialize a typed value
    pub fn get_value<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        match self.get(key) {
            Some(bytes) => bincode::deserialize(&bytes)
                .map(Some)
                .map_err(|e| CacheError::Serialization(e.to_string())),
            None => Ok(None),
        }
    }

    /// Insert with the policy's default TTL
    pub fn set(&self, key: &str, value: Vec<u8>) -> Result<()> {
        self.set_with_ttl(key, value, None)
    }

    /// Serialize and insert a typed value
    pub fn set_value<T: Serialize>(&self, key: &str, value: &T) -> Result<()> {
        let bytes =
            bincode::serialize(value).map_err(|e| CacheError::Serialization(e.to_string()))?;
        self.set(key, bytes)
    }

    /// Insert with an explicit TTL (clamped to the policy's max)
    pub fn set_with_ttl(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(CacheError::Closed);
        }

        let ttl = self.policy.effective_ttl(ttl);
        let now = Utc::now();
        let incoming = value.len();

        let mut entries = self.entries.write();
        let mut stats = self.stats.write();

        if let Some(existing) = entries.get_mut(key) {
            stats.bytes = stats.bytes - existing.size_bytes.min(stats.bytes) + incoming;
            existing.replace_value(value, ttl, now);
            stats.inserts += 1;
            return Ok(());
        }

        // Exactly one eviction when the item budget is full.
        if entries.len() >= self.policy.max_items {
            if let Some(victim) = select_victim(&entries, self.policy.eviction) {
                if let Some(evicted) = entries.remove(&victim) {
                    stats.evictions += 1;
                    stats.bytes -= evicted.size_bytes.min(stats.bytes);
                }
            }
        }

        // Evict until the new entry fits the byte budget.
        while stats.bytes + incoming > self.policy.max_bytes && !entries.is_empty() {
            match select_victim(&entries, self.policy.eviction) {
                Some(victim) => {
                    if let Some(evicted) = entries.remove(&victim) {
                        stats.evictions += 1;
                        stats.bytes -= evicted.size_bytes.min(stats.bytes);
                    }
                }
                None => break,
            }
        }

        let entry = CacheEntry::new(key, value, ttl, CacheTier::L1);
        stats.bytes += entry.size_bytes;
        entries.insert(key.to_string(), entry);
        stats.inserts += 1;
        stats.items = entries.len();
        Ok(())
    }

    /// Remove a key; returns whether it was present
    pub fn delete(&self, key: &str) -> bool {
        let mut entries = self.entries.write();
        match entries.remove(key) {
            Some(removed) => {
                let mut stats = self.stats.write();
                stats.deletes += 1;
                stats.items = entries.len();
                stats.bytes -= removed.size_bytes.min(stats.bytes);
                true
            }
            None => false,
        }
    }

    /// Drop every entry and reset the counters
    pub fn clear(&self) {
        self.entries.write().clear();
        *self.stats.write() = LocalCacheStats::default();
    }

    /// Snapshot of all live keys
    pub fn keys(&self) -> Vec<String> {
        self.entries.read().keys().cloned().collect()
    }

    /// Number of live entries
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Whether the cache is empty
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Counter snapshot
    pub fn stats(&self) -> LocalCacheStats {
        let mut stats = self.stats.read().clone();
        stats.items = self.entries.read().len();
        stats
    }

    /// Sweep expired entries, honoring the policy's batch size.
    ///
    /// Returns the number of entries removed.
    pub fn cleanup(&self) -> usize {
        let now = Utc::now();
        let batch = self.policy.cleanup_batch.max(1);

        let expired: Vec<String> = {
            let entries = self.entries.read();
            entries
                .iter()
                .filter(|(_, e)| e.is_expired(now))
                .take(batch)
                .map(|(k, _)| k.clone())
                .collect()
        };

        if expired.is_empty() {
            return 0;
        }

        let mut entries = self.entries.write();
        let mut stats = self.stats.write();
        let mut removed = 0;
        for key in expired {
            if let Some(entry) = entries.get(&key) {
                if entry.is_expired(now) {
                    let gone = entries.remove(&key).unwrap();
                    stats.expirations += 1;
                    stats.bytes -= gone.size_bytes.min(stats.bytes);
                    removed += 1;
                }
            }
        }
        stats.items = entries.len();
        removed
    }

    /// Get, or compute and cache on a miss.
    ///
    /// The set after a compute is best effort: a failed set is logged and
    /// the computed value is still returned.
    pub async fn get_or_compute<F, Fut>(&self, key: &str, compute: F) -> Result<Vec<u8>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Vec<u8>>>,
    {
        if let Some(value) = self.get(key) {
            return Ok(value);
        }

        let value = compute().await?;

        // Double-check: another task may have filled the key meanwhile.
        if let Some(existing) = self.get(key) {
            return Ok(existing);
        }

        if let Err(e) = self.set(key, value.clone()) {
            log::debug!("best-effort set after compute failed for {key}: {e}");
        }
        Ok(value)
    }

    /// Stop the janitor and reject further sets
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        if let Some(handle) = self.janitor.lock().take() {
            handle.abort();
        }
    }

    fn start_janitor(&self) {
        if self.policy.cleanup_interval.is_zero() {
            return;
        }

        let entries = Arc::clone(&self.entries);
        let stats = Arc::clone(&self.stats);
        let closed = Arc::clone(&self.closed);
        let interval = self.policy.cleanup_interval;
        let batch = self.policy.cleanup_batch.max(1);

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                if closed.load(Ordering::SeqCst) {
                    break;
                }
                let now = Utc::now();
                let expired: Vec<String> = {
                    let map = entries.read();
                    map.iter()
                        .filter(|(_, e)| e.is_expired(now))
                        .take(batch)
                        .map(|(k, _)| k.clone())
                        .collect()
                };
                if expired.is_empty() {
                    continue;
                }
                let mut map = entries.write();
                let mut s = stats.write();
                for key in expired {
                    if let Some(entry) = map.get(&key) {
                        if entry.is_expired(now) {
                            let gone = map.remove(&key).unwrap();
                            s.expirations += 1;
                            s.bytes -= gone.size_bytes.min(s.bytes);
                        }
                    }
                }
                s.items = map.len();
            }
        });

        *self.janitor.lock() = Some(handle);
    }
}

impl Drop for LocalCache {
    fn drop(&mut self) {
        self.close();
    }
}

/// Pick the eviction victim under the given policy
fn select_victim(entries: &HashMap<String, CacheEntry>, policy: EvictionPolicy) -> Option<String> {
    let now = Utc::now();
    let victim = match policy {
        EvictionPolicy::Lru => entries.values().min_by_key(|e| e.last_accessed),
        EvictionPolicy::Lfu => entries.values().min_by_key(|e| e.access_count),
        EvictionPolicy::Fifo => entries.values().min_by_key(|e| e.created_at),
        EvictionPolicy::Ttl => entries.values().min_by_key(|e| e.remaining_ttl(now)),
    };
    victim.map(|e| e.key.clone())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_cache(max_items: usize, eviction: EvictionPolicy) -> LocalCache {
        LocalCache::new(CachePolicy {
            max_items,
            eviction,
            cleanup_interval: Duration::ZERO,
            ..Default::default()
        })
        .unwrap()
    }

    #[tokio::test]
    async fn test_set_then_get_roundtrip() {
        let cache = small_cache(16, EvictionPolicy::Lru);
        cache.set("k", b"value".to_vec()).unwrap();
        assert_eq!(cache.get("k"), Some(b"value".to_vec()));
    }

    #[tokio::test]
    async fn test_typed_roundtrip() {
        let cache = small_cache(16, EvictionPolicy::Lru);
        cache.set_value("answer", &42u64).unwrap();
        assert_eq!(cache.get_value::<u64>("answer").unwrap(), Some(42));
    }

    #[tokio::test]
    async fn test_lru_eviction_order() {
        let cache = small_cache(2, EvictionPolicy::Lru);
        cache.set("k1", b"v1".to_vec()).unwrap();
        cache.set("k2", b"v2".to_vec()).unwrap();
        // Touch k1 so k2 becomes the least recently used.
        assert!(cache.get("k1").is_some());
        cache.set("k3", b"v3".to_vec()).unwrap();

        assert!(cache.get("k2").is_none());
        assert!(cache.get("k1").is_some());
        assert!(cache.get("k3").is_some());
        assert_eq!(cache.len(), 2);
    }

    #[tokio::test]
    async fn test_lfu_eviction_order() {
        let cache = small_cache(2, EvictionPolicy::Lfu);
        cache.set("hot", b"v".to_vec()).unwrap();
        cache.set("cold", b"v".to_vec()).unwrap();
        cache.get("hot");
        cache.get("hot");
        cache.get("cold");
        cache.set("new", b"v".to_vec()).unwrap();

        assert!(cache.get("cold").is_none());
        assert!(cache.get("hot").is_some());
    }

    #[tokio::test]
    async fn test_fifo_eviction_order() {
        let cache = small_cache(2, EvictionPolicy::Fifo);
        cache.set("first", b"v".to_vec()).unwrap();
        cache.set("second", b"v".to_vec()).unwrap();
        // Access does not save the oldest entry under FIFO.
        cache.get("first");
        cache.set("third", b"v".to_vec()).unwrap();

        assert!(cache.get("first").is_none());
        assert!(cache.get("second").is_some());
    }

    #[tokio::test]
    async fn test_ttl_eviction_picks_shortest_remaining() {
        let cache = small_cache(2, EvictionPolicy::Ttl);
        cache
            .set_with_ttl("short", b"v".to_vec(), Some(Duration::from_secs(5)))
            .unwrap();
        cache
            .set_with_ttl("long", b"v".to_vec(), Some(Duration::from_secs(500)))
            .unwrap();
        cache.set("new", b"v".to_vec()).unwrap();

        assert!(cache.get("short").is_none());
        assert!(cache.get("long").is_some());
    }

    #[tokio::test]
    async fn test_expired_get_is_miss_and_removes() {
        let cache = small_cache(16, EvictionPolicy::Lru);
        cache
            .set_with_ttl("gone", b"v".to_vec(), Some(Duration::ZERO))
            .unwrap();
        assert!(cache.get("gone").is_none());
        assert_eq!(cache.len(), 0);
        assert_eq!(cache.stats().expirations, 1);
    }

    #[tokio::test]
    async fn test_overwrite_does_not_evict() {
        let cache = small_cache(2, EvictionPolicy::Lru);
        cache.set("k1", b"v1".to_vec()).unwrap();
        cache.set("k2", b"v2".to_vec()).unwrap();
        cache.set("k1", b"v1-updated".to_vec()).unwrap();

        assert_eq!(cache.len(), 2);
        assert_eq!(cache.stats().evictions, 0);
        assert_eq!(cache.get("k1"), Some(b"v1-updated".to_vec()));
    }

    #[tokio::test]
    async fn test_byte_budget_evicts_until_fit() {
        let cache = LocalCache::new(CachePolicy {
            max_items: 100,
            max_bytes: 10,
            cleanup_interval: Duration::ZERO,
            ..Default::default()
        })
        .unwrap();

        cache.set("a", vec![0u8; 4]).unwrap();
        cache.set("b", vec![0u8; 4]).unwrap();
        cache.set("c", vec![0u8; 8]).unwrap();

        let stats = cache.stats();
        assert!(stats.bytes <= 10);
        assert!(stats.evictions >= 1);
        assert!(cache.get("c").is_some());
    }

    #[tokio::test]
    async fn test_clear_resets_stats() {
        let cache = small_cache(16, EvictionPolicy::Lru);
        cache.set("k", b"v".to_vec()).unwrap();
        cache.get("k");
        cache.clear();

        let stats = cache.stats();
        assert_eq!(stats.items, 0);
        assert_eq!(stats.bytes, 0);
        assert_eq!(stats.hits, 0);
        assert_eq!(stats.misses, 0);
    }

    #[tokio::test]
    async fn test_set_after_close_fails() {
        let cache = small_cache(16, EvictionPolicy::Lru);
        cache.close();
        assert!(matches!(
            cache.set("k", b"v".to_vec()),
            Err(CacheError::Closed)
        ));
    }

    #[tokio::test]
    async fn test_get_or_compute() {
        let cache = small_cache(16, EvictionPolicy::Lru);

        let value = cache
            .get_or_compute("k", || async { Ok(b"computed".to_vec()) })
            .await
            .unwrap();
        assert_eq!(value, b"computed");

        // Second call is a hit; the compute closure must not run.
        let value = cache
            .get_or_compute("k", || async { panic!("should not compute on hit") })
            .await
            .unwrap();
        assert_eq!(value, b"computed");
    }

    #[tokio::test]
    async fn test_cleanup_sweeps_expired() {
        let cache = small_cache(16, EvictionPolicy::Lru);
        for i in 0..5 {
            cache
                .set_with_ttl(&format!("k{i}"), b"v".to_vec(), Some(Duration::ZERO))
                .unwrap();
        }
        cache.set("live", b"v".to_vec()).unwrap();

        let removed = cache.cleanup();
        assert_eq!(removed, 5);
        assert_eq!(cache.len(), 1);
    }
}
