//! Cache policy: capacity, TTL, eviction, and write-strategy knobs.

use crate::cache::{CacheError, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Cache tier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CacheTier {
    /// In-process memory
    L1,
    /// Distributed (shared across instances)
    L2,
    /// Persistent (survives restarts)
    L3,
}

impl CacheTier {
    /// Tier label used in stats and metric tags
    pub fn label(&self) -> &'static str {
        match self {
            CacheTier::L1 => "l1",
            CacheTier::L2 => "l2",
            CacheTier::L3 => "l3",
        }
    }
}

/// Eviction policy for a full tier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvictionPolicy {
    /// Evict the entry with the oldest last access
    Lru,
    /// Evict the entry with the lowest access count
    Lfu,
    /// Evict the entry created first
    Fifo,
    /// Evict the entry with the shortest remaining lifetime
    Ttl,
}

/// Write propagation strategy across tiers
///
/// Under `WriteBack` and `WriteAround` a successful set does not imply the
/// value is durable in lower tiers yet; callers that need durability use
/// `WriteThrough`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WriteStrategy {
    /// Synchronous write to every enabled tier
    WriteThrough,
    /// L1 synchronous, lower tiers asynchronous
    WriteBack,
    /// L3 only (plus async L2); L1 untouched
    WriteAround,
    /// Falls back to write-through
    ReadThrough,
    /// Falls back to write-through
    RefreshAhead,
    /// Falls back to write-through
    Adaptive,
}

/// Cache configuration shared by the local tier and the tier manager
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachePolicy {
    /// Default entry TTL
    pub ttl: Duration,

    /// Hard cap on entry TTL
    pub max_ttl: Duration,

    /// Maximum number of entries per tier
    pub max_items: usize,

    /// Maximum total value bytes per tier
    pub max_bytes: usize,

    /// Eviction policy applied when a tier is full
    pub eviction: EvictionPolicy,

    /// Write propagation strategy
    pub strategy: WriteStrategy,

    /// Desired replica count for the distributed tier
    pub replication_factor: u32,

    /// Compress values above the threshold before they leave L1
    pub compression: bool,

    /// Compression kicks in above this many bytes
    pub compression_threshold: usize,

    /// Encrypt values at rest (interface-level flag; the encryption
    /// utility itself is an external collaborator)
    pub encryption: bool,

    /// Janitor sweep interval; zero disables the janitor
    pub cleanup_interval: Duration,

    /// Expired entries removed per janitor sweep
    pub cleanup_batch: usize,
}

impl Default for CachePolicy {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(300),
            max_ttl: Duration::from_secs(24 * 60 * 60),
            max_items: 10_000,
            max_bytes: 256 * 1024 * 1024,
            eviction: EvictionPolicy::Lru,
            strategy: WriteStrategy::WriteThrough,
            replication_factor: 1,
            compression: true,
            compression_threshold: 1024,
            encryption: false,
            cleanup_interval: Duration::from_secs(60),
            cleanup_batch: 256,
        }
    }
}

impl CachePolicy {
    /// Validate capacity and TTL bounds
    pub fn validate(&self) -> Result<()> {
        if self.max_items == 0 {
            return Err(CacheError::InvalidPolicy("max_items must be positive".into()));
        }
        if self.max_bytes == 0 {
            return Err(CacheError::InvalidPolicy("max_bytes must be positive".into()));
        }
        if self.ttl > self.max_ttl {
            return Err(CacheError::InvalidPolicy(format!(
                "default ttl {:?} exceeds max_ttl {:?}",
                self.ttl, self.max_ttl
            )));
        }
        Ok(())
    }

    /// Clamp a requested TTL to the policy's maximum
    pub fn effective_ttl(&self, requested: Option<Duration>) -> Duration {
        requested.unwrap_or(self.ttl).min(self.max_ttl)
    }
}
