//! # Mnemo - Conversational Memory Runtime
//!
//! A performance substrate for conversational memory built in Rust.
//!
//! ## Architecture
//!
//! - `memory`: Decay scoring, summarization, and the periodic decay manager
//! - `cache`: Single-tier policy cache and the L1/L2/L3 tier manager
//! - `dispatch`: Priority work queue with a fixed worker pool
//! - `pool`: Typed resource pools with circuit breaking and autoscaling
//! - `query`: Query plan synthesis, caching, and statistics feedback
//! - `metrics`: Time-series collection, alerting, and analysis
//! - `config`: Aggregated configuration with environment overrides
//! - `runtime`: The facade wiring the subsystems together

#![warn(missing_docs)]
#![warn(clippy::all)]

// Memory decay and summarization engine
pub mod memory;

// Multi-tier caching
pub mod cache;

// Async work dispatch
pub mod dispatch;

// Resource pooling
pub mod pool;

// Query planning
pub mod query;

// Metrics collection
pub mod metrics;

// Configuration
pub mod config;

// Runtime facade
pub mod runtime;

// Re-export commonly used types
pub use cache::{CachePolicy, CacheTier, EvictionPolicy, TieredCache, WriteStrategy};
pub use config::RuntimeConfig;
pub use dispatch::{Dispatcher, WorkItem, WorkPriority, WorkResult};
pub use memory::{
    ChunkType, ConversationChunk, DecayConfig, DecayManager, DecayStrategy, MemoryStore,
    ScoredChunk, Summarizer,
};
pub use metrics::{Metric, MetricsCollector};
pub use pool::{PoolManager, ResourcePool};
pub use query::{QueryOptimizer, QueryPlan, QueryType};
pub use runtime::MemoryRuntime;

/// Re-export version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Re-export crate name
pub const NAME: &str = env!("CARGO_PKG_NAME");
