//! Cache entry metadata.

use crate::cache::policy::CacheTier;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::time::Duration;

/// A stored cache entry with its bookkeeping fields
///
/// Invariant: `created_at <= last_accessed`; the expiry instant is
/// `created_at + ttl`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    /// Entry key
    pub key: String,

    /// Serialized value bytes
    pub value: Vec<u8>,

    /// When the entry was created
    pub created_at: DateTime<Utc>,

    /// Last read
    pub last_accessed: DateTime<Utc>,

    /// Last write
    pub last_modified: DateTime<Utc>,

    /// Number of reads served
    pub access_count: u64,

    /// Value size in bytes
    pub size_bytes: usize,

    /// Time to live from creation
    pub ttl: Duration,

    /// Tier the entry currently lives in
    pub tier: CacheTier,

    /// Free-form tags
    pub tags: Vec<String>,

    /// Eviction priority hint (higher survives longer under ties)
    pub priority: u8,

    /// Bumped on every overwrite of the same key
    pub version: u64,

    /// Checksum of the value bytes
    pub checksum: u64,
}

impl CacheEntry {
    /// Create an entry stamped now
    pub fn new(key: impl Into<String>, value: Vec<u8>, ttl: Duration, tier: CacheTier) -> Self {
        let now = Utc::now();
        let checksum = value_checksum(&value);
        let size_bytes = value.len();
        Self {
            key: key.into(),
            value,
            created_at: now,
            last_accessed: now,
            last_modified: now,
            access_count: 0,
            size_bytes,
            ttl,
            tier,
            tags: Vec::new(),
            priority: 0,
            version: 1,
            checksum,
        }
    }

    /// Expiry instant
    pub fn expires_at(&self) -> DateTime<Utc> {
        self.created_at + chrono::Duration::from_std(self.ttl).unwrap_or_else(|_| chrono::Duration::days(365))
    }

    /// Whether the entry is past its expiry at `now`
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at()
    }

    /// Remaining lifetime at `now`; zero when expired
    pub fn remaining_ttl(&self, now: DateTime<Utc>) -> Duration {
        (self.expires_at() - now).to_std().unwrap_or(Duration::ZERO)
    }

    /// Record a read
    pub fn touch(&mut self, now: DateTime<Utc>) {
        self.last_accessed = now;
        self.access_count += 1;
    }

    /// Replace the value, bumping version and checksum
    pub fn replace_value(&mut self, value: Vec<u8>, ttl: Duration, now: DateTime<Utc>) {
        self.checksum = value_checksum(&value);
        self.size_bytes = value.len();
        self.value = value;
        self.ttl = ttl;
        self.created_at = now;
        self.last_modified = now;
        self.last_accessed = now;
        self.version += 1;
    }

    /// Verify the stored checksum against the value bytes
    pub fn checksum_ok(&self) -> bool {
        value_checksum(&self.value) == self.checksum
    }
}

/// Hash value bytes for integrity checks
pub fn value_checksum(value: &[u8]) -> u64 {
    let mut hasher = DefaultHasher::new();
    value.hash(&mut hasher);
    hasher.finish()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_entry_invariants() {
        let entry = CacheEntry::new("k", vec![1, 2, 3], Duration::from_secs(60), CacheTier::L1);
        assert_eq!(entry.size_bytes, 3);
        assert_eq!(entry.version, 1);
        assert!(entry.created_at <= entry.last_accessed);
        assert!(entry.checksum_ok());
        assert!(!entry.is_expired(Utc::now()));
    }

    #[test]
    fn test_expiry() {
        let entry = CacheEntry::new("k", vec![], Duration::from_secs(60), CacheTier::L1);
        let later = Utc::now() + chrono::Duration::seconds(120);
        assert!(entry.is_expired(later));
        assert_eq!(entry.remaining_ttl(later), Duration::ZERO);
    }

    #[test]
    fn test_replace_bumps_version_and_checksum() {
        let mut entry = CacheEntry::new("k", vec![1], Duration::from_secs(60), CacheTier::L1);
        let old_checksum = entry.checksum;
        entry.replace_value(vec![9, 9], Duration::from_secs(30), Utc::now());
        assert_eq!(entry.version, 2);
        assert_eq!(entry.size_bytes, 2);
        assert_ne!(entry.checksum, old_checksum);
        assert!(entry.checksum_ok());
    }

    #[test]
    fn test_touch_counts_reads() {
        let mut entry = CacheEntry::new("k", vec![], Duration::from_secs(60), CacheTier::L1);
        entry.touch(Utc::now());
        entry.touch(Utc::now());
        assert_eq!(entry.access_count, 2);
    }
}
