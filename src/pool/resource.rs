//! Resource lifecycle model and the factory/validator seams.

use crate::pool::manager::PoolConfig;
use crate::pool::Result;
use async_trait::async_trait;
use std::any::Any;
use std::time::{Duration, Instant};
use uuid::Uuid;

/// Resource lifecycle state
///
/// `created -> available -> (in_use <-> available) -> (retiring | error) -> closed`;
/// `Closed` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceStatus {
    Available,
    InUse,
    Maintenance,
    Error,
    Retiring,
    Closed,
}

impl ResourceStatus {
    /// Whether a transition to `next` is legal
    pub fn can_transition(self, next: ResourceStatus) -> bool {
        use ResourceStatus::*;
        match (self, next) {
            (Closed, _) => false,
            (_, Closed) => true,
            (Available, InUse) | (InUse, Available) => true,
            (Available, Maintenance) | (Maintenance, Available) => true,
            (_, Error) | (_, Retiring) => true,
            (Error, Available) => false,
            (Retiring, _) => false,
            _ => false,
        }
    }
}

/// Bookkeeping carried alongside every pooled handle
#[derive(Debug, Clone)]
pub struct ResourceMeta {
    /// Resource id
    pub id: String,

    /// Owning pool's resource type
    pub resource_type: String,

    /// Lifecycle state
    pub status: ResourceStatus,

    /// When the resource was created
    pub created_at: Instant,

    /// Last acquisition
    pub last_used: Instant,

    /// Completed acquisitions
    pub usage_count: u64,

    /// Observed errors across the resource's lifetime
    pub error_count: u32,

    /// Health-check failures in a row
    pub consecutive_failures: u32,

    /// Scheduling hint for weighted pools
    pub priority: u8,

    /// Scheduling weight for weighted pools
    pub weight: u32,
}

impl ResourceMeta {
    /// Fresh metadata for a newly created resource
    pub fn new(resource_type: impl Into<String>) -> Self {
        let now = Instant::now();
        Self {
            id: Uuid::new_v4().to_string(),
            resource_type: resource_type.into(),
            status: ResourceStatus::Available,
            created_at: now,
            last_used: now,
            usage_count: 0,
            error_count: 0,
            consecutive_failures: 0,
            priority: 0,
            weight: 1,
        }
    }

    /// Age of the resource
    pub fn lifetime(&self) -> Duration {
        self.created_at.elapsed()
    }

    /// Time since the last acquisition
    pub fn idle_for(&self) -> Duration {
        self.last_used.elapsed()
    }
}

/// The actual external handle a pool manages
#[async_trait]
pub trait ManagedResource: Send + Sync {
    /// Release the underlying handle
    async fn close(&mut self) -> Result<()>;

    /// Downcast support for validators that inspect concrete types
    fn as_any(&self) -> &dyn Any;
}

/// A handle plus its bookkeeping, as held by callers between acquire and
/// release. The borrow must not outlive the release back to the pool.
pub struct PooledResource {
    /// Bookkeeping
    pub meta: ResourceMeta,

    /// The managed handle
    pub inner: Box<dyn ManagedResource>,
}

/// Creates resources for one pool type
#[async_trait]
pub trait ResourceFactory: Send + Sync {
    /// Create a new resource handle
    async fn create(&self) -> Result<Box<dyn ManagedResource>>;

    /// Validate a pool configuration before the pool starts
    fn validate_config(&self, config: &PoolConfig) -> Result<()> {
        let _ = config;
        Ok(())
    }

    /// The resource type this factory produces
    fn resource_type(&self) -> &str;

    /// Factory-recommended pool configuration
    fn default_config(&self) -> PoolConfig {
        PoolConfig::default()
    }
}

/// Validates resources at acquisition and during health checks
#[async_trait]
pub trait ResourceValidator: Send + Sync {
    /// Deep validation run at acquisition; an error destroys the resource
    async fn validate(&self, resource: &dyn ManagedResource) -> Result<()>;

    /// Cheap liveness probe run by the health-check loop
    async fn is_healthy(&self, resource: &dyn ManagedResource) -> bool;

    /// Budget for one validation call
    fn validation_timeout(&self) -> Duration {
        Duration::from_secs(5)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_closed_is_terminal() {
        assert!(!ResourceStatus::Closed.can_transition(ResourceStatus::Available));
        assert!(!ResourceStatus::Closed.can_transition(ResourceStatus::InUse));
        assert!(ResourceStatus::Error.can_transition(ResourceStatus::Closed));
        assert!(ResourceStatus::Retiring.can_transition(ResourceStatus::Closed));
    }

    #[test]
    fn test_borrow_cycle_transitions() {
        assert!(ResourceStatus::Available.can_transition(ResourceStatus::InUse));
        assert!(ResourceStatus::InUse.can_transition(ResourceStatus::Available));
        assert!(!ResourceStatus::Error.can_transition(ResourceStatus::Available));
    }

    #[test]
    fn test_meta_tracks_idle_time() {
        let meta = ResourceMeta::new("db");
        assert_eq!(meta.usage_count, 0);
        assert!(meta.idle_for() < Duration::from_secs(1));
        assert_eq!(meta.status, ResourceStatus::Available);
    }
}
