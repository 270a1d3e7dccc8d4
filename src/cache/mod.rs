//! # Multi-Tier Caching System
//!
//! Provides a comprehensive multi-tier caching system:
//! - L1: In-process policy cache (fastest, smallest capacity)
//! - L2: Distributed Redis cache (shared across instances)
//! - L3: Persistent embedded KV store (survives restarts)
//!
//! The single-tier [`LocalCache`] implements TTL expiry with lru/lfu/fifo/ttl
//! eviction and a background janitor; [`TieredCache`] routes gets and sets
//! across tiers according to the configured write strategy, promotes
//! lower-tier hits, and broadcasts invalidations on a bounded, lossy channel.

use thiserror::Error;

/// Cache error types
#[derive(Error, Debug)]
pub enum CacheError {
    /// Operation attempted after the cache was closed
    #[error("cache is closed")]
    Closed,

    /// Tier backend error
    #[error("cache backend error: {0}")]
    Backend(String),

    /// Entry encoding/decoding error
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Compression error
    #[error("compression error: {0}")]
    Compression(String),

    /// Policy rejected by validation
    #[error("invalid cache policy: {0}")]
    InvalidPolicy(String),
}

/// Result type for cache operations
pub type Result<T> = std::result::Result<T, CacheError>;

pub mod backend;
pub mod entry;
pub mod local;
pub mod manager;
pub mod policy;
pub mod prefetch;

pub use backend::{BackendStats, CacheStorageBackend, MemoryBackend, RedisBackend, SledBackend};
pub use entry::CacheEntry;
pub use local::{LocalCache, LocalCacheStats};
pub use manager::{InvalidationEvent, TierStats, TieredCache, TieredCacheConfig, TieredCacheStats};
pub use policy::{CachePolicy, CacheTier, EvictionPolicy, WriteStrategy};
pub use prefetch::{AccessPattern, PrefetchCandidate, PrefetchTracker};
