//! # Resource Pool Management
//!
//! Typed pools of reusable external handles with:
//! - Validator-gated acquisition and ownership-checked release
//! - Background health checks and idle/lifetime cleanup
//! - A three-state circuit breaker guarding acquisition
//! - Optional utilization autoscaling and failover routing

use thiserror::Error;

/// Resource pool error types
#[derive(Error, Debug)]
pub enum PoolError {
    /// Acquisition exceeded its timeout
    #[error("resource acquisition timed out")]
    Timeout,

    /// Nothing available and the pool is at max size
    #[error("pool exhausted")]
    Exhausted,

    /// The circuit breaker is open
    #[error("circuit breaker is open")]
    CircuitOpen,

    /// A resource failed validation
    #[error("unhealthy resource: {0}")]
    Unhealthy(String),

    /// Configuration or release-ownership validation failed
    #[error("validation failed: {0}")]
    ValidationFailed(String),

    /// A pool for the type is already registered
    #[error("pool already exists: {0}")]
    AlreadyExists(String),

    /// No pool registered for the type
    #[error("pool not found: {0}")]
    NotFound(String),

    /// Operation on a closed pool
    #[error("pool is closed")]
    Closed,

    /// Resource factory failure
    #[error("resource factory error: {0}")]
    Factory(String),
}

/// Result type for pool operations
pub type Result<T> = std::result::Result<T, PoolError>;

pub mod autoscale;
pub mod breaker;
pub mod manager;
pub mod resource;

pub use autoscale::{AutoscalePolicy, Autoscaler, FailoverEvent, FailoverMonitor};
pub use breaker::{BreakerConfig, BreakerState, CircuitBreaker};
pub use manager::{PoolConfig, PoolManager, PoolStats, ResourcePool};
pub use resource::{
    ManagedResource, PooledResource, ResourceFactory, ResourceMeta, ResourceStatus,
    ResourceValidator,
};
