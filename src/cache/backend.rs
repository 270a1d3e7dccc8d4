//! Storage backends for the distributed (L2) and persistent (L3) tiers.
//!
//! Backends move opaque bytes; entry encoding (compression framing,
//! checksums) is the tier manager's concern. The in-memory backend exists
//! for tests and single-process deployments.

use crate::cache::{CacheError, Result};
use async_trait::async_trait;
use chrono::Utc;
use redis::aio::ConnectionManager;
use sled::Db as SledDb;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock as TokioRwLock;

/// Size and entry counts reported by a backend
#[derive(Debug, Clone, Default)]
pub struct BackendStats {
    /// Live entries
    pub entries: u64,

    /// Approximate stored bytes
    pub bytes: u64,
}

/// Byte-oriented storage behind a cache tier
#[async_trait]
pub trait CacheStorageBackend: Send + Sync {
    /// Fetch a value
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Store a value with an optional TTL
    async fn set(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> Result<()>;

    /// Remove a value; returns whether it was present
    async fn delete(&self, key: &str) -> Result<bool>;

    /// List keys under a prefix
    async fn list(&self, prefix: &str) -> Result<Vec<String>>;

    /// Reclaim space (expired entries, fragmentation)
    async fn compact(&self) -> Result<()>;

    /// Current backend statistics
    async fn stats(&self) -> Result<BackendStats>;

    /// Backend name for logs and metrics
    fn name(&self) -> &'static str;
}

// ============================================================================
// In-memory backend
// ============================================================================

/// Process-local backend for tests and embedded use
#[derive(Default)]
pub struct MemoryBackend {
    entries: TokioRwLock<HashMap<String, (Vec<u8>, Option<i64>)>>,
}

impl MemoryBackend {
    /// Create an empty backend
    pub fn new() -> Self {
        Self::default()
    }

    fn expired(deadline: &Option<i64>) -> bool {
        matches!(deadline, Some(at) if *at <= Utc::now().timestamp_millis())
    }
}

#[async_trait]
impl CacheStorageBackend for MemoryBackend {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let mut entries = self.entries.write().await;
        match entries.get(key) {
            Some((_, deadline)) if Self::expired(deadline) => {
                entries.remove(key);
                Ok(None)
            }
            Some((value, _)) => Ok(Some(value.clone())),
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> Result<()> {
        let deadline = ttl.map(|t| Utc::now().timestamp_millis() + t.as_millis() as i64);
        self.entries
            .write()
            .await
            .insert(key.to_string(), (value.to_vec(), deadline));
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        Ok(self.entries.write().await.remove(key).is_some())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        Ok(self
            .entries
            .read()
            .await
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect())
    }

    async fn compact(&self) -> Result<()> {
        self.entries
            .write()
            .await
            .retain(|_, (_, deadline)| !Self::expired(deadline));
        Ok(())
    }

    async fn stats(&self) -> Result<BackendStats> {
        let entries = self.entries.read().await;
        Ok(BackendStats {
            entries: entries.len() as u64,
            bytes: entries.values().map(|(v, _)| v.len() as u64).sum(),
        })
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

// ============================================================================
// Redis backend (distributed L2)
// ============================================================================

/// Distributed tier backed by Redis
pub struct RedisBackend {
    conn: Arc<TokioRwLock<ConnectionManager>>,
    prefix: String,
}

impl RedisBackend {
    /// Connect to Redis; `prefix` namespaces all keys
    pub async fn connect(url: &str, prefix: impl Into<String>) -> Result<Self> {
        let client = redis::Client::open(url)
            .map_err(|e| CacheError::Backend(format!("redis client: {e}")))?;
        let conn = ConnectionManager::new(client)
            .await
            .map_err(|e| CacheError::Backend(format!("redis connect: {e}")))?;
        Ok(Self {
            conn: Arc::new(TokioRwLock::new(conn)),
            prefix: prefix.into(),
        })
    }

    fn full_key(&self, key: &str) -> String {
        format!("{}:{}", self.prefix, key)
    }
}

#[async_trait]
impl CacheStorageBackend for RedisBackend {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let mut conn = self.conn.write().await;
        redis::cmd("GET")
            .arg(self.full_key(key))
            .query_async(&mut *conn)
            .await
            .map_err(|e| CacheError::Backend(format!("redis GET failed: {e}")))
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> Result<()> {
        let mut conn = self.conn.write().await;
        match ttl {
            Some(ttl) if !ttl.is_zero() => redis::cmd("SETEX")
                .arg(self.full_key(key))
                .arg(ttl.as_secs().max(1))
                .arg(value)
                .query_async(&mut *conn)
                .await
                .map_err(|e| CacheError::Backend(format!("redis SETEX failed: {e}"))),
            _ => redis::cmd("SET")
                .arg(self.full_key(key))
                .arg(value)
                .query_async(&mut *conn)
                .await
                .map_err(|e| CacheError::Backend(format!("redis SET failed: {e}"))),
        }
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let mut conn = self.conn.write().await;
        let removed: i64 = redis::cmd("DEL")
            .arg(self.full_key(key))
            .query_async(&mut *conn)
            .await
            .map_err(|e| CacheError::Backend(format!("redis DEL failed: {e}")))?;
        Ok(removed > 0)
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        let mut conn = self.conn.write().await;
        let pattern = format!("{}:{}*", self.prefix, prefix);
        let keys: Vec<String> = redis::cmd("KEYS")
            .arg(pattern)
            .query_async(&mut *conn)
            .await
            .map_err(|e| CacheError::Backend(format!("redis KEYS failed: {e}")))?;
        let strip = format!("{}:", self.prefix);
        Ok(keys
            .into_iter()
            .filter_map(|k| k.strip_prefix(&strip).map(|s| s.to_string()))
            .collect())
    }

    async fn compact(&self) -> Result<()> {
        // Redis expires keys on its own.
        Ok(())
    }

    async fn stats(&self) -> Result<BackendStats> {
        let mut conn = self.conn.write().await;
        let entries: u64 = redis::cmd("DBSIZE")
            .query_async(&mut *conn)
            .await
            .map_err(|e| CacheError::Backend(format!("redis DBSIZE failed: {e}")))?;
        Ok(BackendStats { entries, bytes: 0 })
    }

    fn name(&self) -> &'static str {
        "redis"
    }
}

// ============================================================================
// Sled backend (persistent L3)
// ============================================================================

/// Expiry deadline is framed ahead of the value as millis since the epoch;
/// zero means no expiry.
const DEADLINE_FRAME: usize = 8;

/// Persistent tier backed by an embedded sled database
pub struct SledBackend {
    db: Arc<SledDb>,
}

impl SledBackend {
    /// Open (or create) the database at `path`
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let db = sled::open(path).map_err(|e| CacheError::Backend(format!("sled open: {e}")))?;
        Ok(Self { db: Arc::new(db) })
    }

    fn encode(value: &[u8], ttl: Option<Duration>) -> Vec<u8> {
        let deadline: i64 = match ttl {
            Some(t) if !t.is_zero() => Utc::now().timestamp_millis() + t.as_millis() as i64,
            _ => 0,
        };
        let mut framed = Vec::with_capacity(DEADLINE_FRAME + value.len());
        framed.extend_from_slice(&deadline.to_le_bytes());
        framed.extend_from_slice(value);
        framed
    }

    fn decode(framed: &[u8]) -> Option<Vec<u8>> {
        if framed.len() < DEADLINE_FRAME {
            return None;
        }
        let mut deadline_bytes = [0u8; DEADLINE_FRAME];
        deadline_bytes.copy_from_slice(&framed[..DEADLINE_FRAME]);
        let deadline = i64::from_le_bytes(deadline_bytes);
        if deadline != 0 && deadline <= Utc::now().timestamp_millis() {
            return None;
        }
        Some(framed[DEADLINE_FRAME..].to_vec())
    }
}

#[async_trait]
impl CacheStorageBackend for SledBackend {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let framed = self
            .db
            .get(key.as_bytes())
            .map_err(|e| CacheError::Backend(format!("sled get: {e}")))?;

        match framed {
            Some(bytes) => match Self::decode(&bytes) {
                Some(value) => Ok(Some(value)),
                None => {
                    let _ = self.db.remove(key.as_bytes());
                    Ok(None)
                }
            },
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> Result<()> {
        self.db
            .insert(key.as_bytes(), Self::encode(value, ttl))
            .map_err(|e| CacheError::Backend(format!("sled insert: {e}")))?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let removed = self
            .db
            .remove(key.as_bytes())
            .map_err(|e| CacheError::Backend(format!("sled remove: {e}")))?;
        Ok(removed.is_some())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        let mut keys = Vec::new();
        for item in self.db.scan_prefix(prefix.as_bytes()) {
            let (key, _) = item.map_err(|e| CacheError::Backend(format!("sled scan: {e}")))?;
            if let Ok(key) = String::from_utf8(key.to_vec()) {
                keys.push(key);
            }
        }
        Ok(keys)
    }

    async fn compact(&self) -> Result<()> {
        // Sweep entries whose embedded deadline has passed.
        let mut expired = Vec::new();
        for item in self.db.iter() {
            let (key, value) = item.map_err(|e| CacheError::Backend(format!("sled iter: {e}")))?;
            if Self::decode(&value).is_none() {
                expired.push(key);
            }
        }
        for key in expired {
            let _ = self.db.remove(key);
        }
        self.db
            .flush_async()
            .await
            .map_err(|e| CacheError::Backend(format!("sled flush: {e}")))?;
        Ok(())
    }

    async fn stats(&self) -> Result<BackendStats> {
        Ok(BackendStats {
            entries: self.db.len() as u64,
            bytes: self.db.size_on_disk().unwrap_or(0),
        })
    }

    fn name(&self) -> &'static str {
        "sled"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_backend_roundtrip() {
        let backend = MemoryBackend::new();
        backend.set("k", b"value", None).await.unwrap();
        assert_eq!(backend.get("k").await.unwrap(), Some(b"value".to_vec()));
        assert!(backend.delete("k").await.unwrap());
        assert_eq!(backend.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_memory_backend_ttl() {
        let backend = MemoryBackend::new();
        backend
            .set("k", b"value", Some(Duration::ZERO))
            .await
            .unwrap();
        assert_eq!(backend.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_memory_backend_list_and_compact() {
        let backend = MemoryBackend::new();
        backend.set("plan:a", b"1", None).await.unwrap();
        backend.set("plan:b", b"2", None).await.unwrap();
        backend.set("other", b"3", Some(Duration::ZERO)).await.unwrap();

        let mut keys = backend.list("plan:").await.unwrap();
        keys.sort();
        assert_eq!(keys, vec!["plan:a".to_string(), "plan:b".to_string()]);

        backend.compact().await.unwrap();
        assert_eq!(backend.stats().await.unwrap().entries, 2);
    }

    #[test]
    fn test_sled_frame_roundtrip() {
        let framed = SledBackend::encode(b"payload", Some(Duration::from_secs(60)));
        assert_eq!(SledBackend::decode(&framed), Some(b"payload".to_vec()));

        let expired = SledBackend::encode(b"payload", Some(Duration::from_millis(1)));
        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(SledBackend::decode(&expired), None);

        let eternal = SledBackend::encode(b"payload", None);
        assert_eq!(SledBackend::decode(&eternal), Some(b"payload".to_vec()));
    }
}
