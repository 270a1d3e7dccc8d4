//! Utilization-driven autoscaling and failover routing for pools.

use crate::pool::manager::ResourcePool;
use crate::pool::resource::PooledResource;
use crate::pool::{PoolError, Result};
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;

/// Per-pool autoscaling policy
#[derive(Debug, Clone)]
pub struct AutoscalePolicy {
    /// Floor the scaler never goes below
    pub min: usize,

    /// Ceiling the scaler never goes above
    pub max: usize,

    /// Utilization that triggers a scale-up; half of it triggers scale-down
    pub target_utilization: f64,

    /// Resources added per scale-up
    pub scale_up_step: usize,

    /// Resources removed per scale-down
    pub scale_down_step: usize,

    /// Minimum time between scale-ups
    pub scale_up_cooldown: Duration,

    /// Minimum time between scale-downs
    pub scale_down_cooldown: Duration,

    /// Evaluation interval
    pub interval: Duration,
}

impl Default for AutoscalePolicy {
    fn default() -> Self {
        Self {
            min: 2,
            max: 20,
            target_utilization: 0.75,
            scale_up_step: 2,
            scale_down_step: 1,
            scale_up_cooldown: Duration::from_secs(30),
            scale_down_cooldown: Duration::from_secs(120),
            interval: Duration::from_secs(10),
        }
    }
}

/// Background autoscaler for one pool
pub struct Autoscaler {
    pool: Arc<ResourcePool>,
    policy: AutoscalePolicy,
    last_scale_up: Mutex<Option<Instant>>,
    last_scale_down: Mutex<Option<Instant>>,
    stopped: Arc<AtomicBool>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl Autoscaler {
    /// Create an autoscaler (not yet running)
    pub fn new(pool: Arc<ResourcePool>, policy: AutoscalePolicy) -> Arc<Self> {
        Arc::new(Self {
            pool,
            policy,
            last_scale_up: Mutex::new(None),
            last_scale_down: Mutex::new(None),
            stopped: Arc::new(AtomicBool::new(false)),
            task: Mutex::new(None),
        })
    }

    /// Start the evaluation loop
    pub fn start(self: &Arc<Self>) {
        let scaler = Arc::clone(self);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(scaler.policy.interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                if scaler.stopped.load(Ordering::SeqCst) {
                    break;
                }
                scaler.evaluate().await;
            }
        });
        *self.task.lock() = Some(handle);
    }

    /// Stop the evaluation loop
    pub fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
        if let Some(task) = self.task.lock().take() {
            task.abort();
        }
    }

    /// One evaluation: scale up above target, down below target/2,
    /// both gated by their cooldowns
    pub async fn evaluate(&self) {
        let stats = self.pool.stats();
        let utilization = stats.utilization();

        if utilization > self.policy.target_utilization && stats.total < self.policy.max {
            let cooled = self
                .last_scale_up
                .lock()
                .map_or(true, |at| at.elapsed() >= self.policy.scale_up_cooldown);
            if cooled {
                let added = self.pool.scale_up(self.policy.scale_up_step).await;
                if added > 0 {
                    log::info!(
                        "autoscaler grew pool {} by {added} (utilization {utilization:.2})",
                        stats.resource_type
                    );
                    *self.last_scale_up.lock() = Some(Instant::now());
                }
            }
        } else if utilization < self.policy.target_utilization / 2.0 && stats.total > self.policy.min
        {
            let cooled = self
                .last_scale_down
                .lock()
                .map_or(true, |at| at.elapsed() >= self.policy.scale_down_cooldown);
            if cooled {
                let removed = self.pool.scale_down(self.policy.scale_down_step).await;
                if removed > 0 {
                    log::info!(
                        "autoscaler shrank pool {} by {removed} (utilization {utilization:.2})",
                        stats.resource_type
                    );
                    *self.last_scale_down.lock() = Some(Instant::now());
                }
            }
        }
    }
}

/// A recorded failover between pools
#[derive(Debug, Clone)]
pub struct FailoverEvent {
    /// When the routing flipped
    pub at: DateTime<Utc>,

    /// Pool the traffic left
    pub from: String,

    /// Pool the traffic moved to
    pub to: String,

    /// What drove the flip
    pub reason: String,
}

/// Routes acquisitions to a backup pool after repeated primary failures
pub struct FailoverMonitor {
    primary: Arc<ResourcePool>,
    backup: Arc<ResourcePool>,
    failure_threshold: u32,
    consecutive_failures: AtomicU32,
    failed_over: AtomicBool,
    events: RwLock<Vec<FailoverEvent>>,
}

impl FailoverMonitor {
    /// Create a monitor; routing starts on the primary
    pub fn new(primary: Arc<ResourcePool>, backup: Arc<ResourcePool>, failure_threshold: u32) -> Self {
        Self {
            primary,
            backup,
            failure_threshold: failure_threshold.max(1),
            consecutive_failures: AtomicU32::new(0),
            failed_over: AtomicBool::new(false),
            events: RwLock::new(Vec::new()),
        }
    }

    /// Acquire through the active pool, flipping to the backup after
    /// repeated primary failures
    pub async fn acquire(&self) -> Result<PooledResource> {
        if self.failed_over.load(Ordering::SeqCst) {
            return self.backup.acquire().await;
        }

        match self.primary.acquire().await {
            Ok(resource) => {
                self.consecutive_failures.store(0, Ordering::SeqCst);
                Ok(resource)
            }
            Err(e) => {
                let failures = self.consecutive_failures.fetch_add(1, Ordering::SeqCst) + 1;
                if failures >= self.failure_threshold {
                    self.record_failover(&e);
                    self.backup.acquire().await
                } else {
                    Err(e)
                }
            }
        }
    }

    /// Release back to whichever pool owns the resource
    pub async fn release(&self, resource: PooledResource) -> Result<()> {
        if resource.meta.resource_type == self.primary.resource_type() {
            self.primary.release(resource).await
        } else if resource.meta.resource_type == self.backup.resource_type() {
            self.backup.release(resource).await
        } else {
            Err(PoolError::ValidationFailed(format!(
                "resource type {} belongs to neither pool",
                resource.meta.resource_type
            )))
        }
    }

    /// Route traffic back to the primary
    pub fn recover(&self) {
        if self.failed_over.swap(false, Ordering::SeqCst) {
            self.consecutive_failures.store(0, Ordering::SeqCst);
            self.events.write().push(FailoverEvent {
                at: Utc::now(),
                from: self.backup.resource_type().to_string(),
                to: self.primary.resource_type().to_string(),
                reason: "primary recovered".to_string(),
            });
        }
    }

    /// Whether traffic is currently on the backup
    pub fn is_failed_over(&self) -> bool {
        self.failed_over.load(Ordering::SeqCst)
    }

    /// Failover history
    pub fn events(&self) -> Vec<FailoverEvent> {
        self.events.read().clone()
    }

    fn record_failover(&self, error: &PoolError) {
        if !self.failed_over.swap(true, Ordering::SeqCst) {
            log::warn!(
                "failing over from pool {} to {}: {error}",
                self.primary.resource_type(),
                self.backup.resource_type()
            );
            self.events.write().push(FailoverEvent {
                at: Utc::now(),
                from: self.primary.resource_type().to_string(),
                to: self.backup.resource_type().to_string(),
                reason: error.to_string(),
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::manager::PoolConfig;
    use crate::pool::resource::{ManagedResource, ResourceFactory};
    use async_trait::async_trait;
    use std::any::Any;

    struct Conn;

    #[async_trait]
    impl ManagedResource for Conn {
        async fn close(&mut self) -> Result<()> {
            Ok(())
        }

        fn as_any(&self) -> &dyn Any {
            self
        }
    }

    struct Factory {
        name: &'static str,
        fail: AtomicBool,
    }

    #[async_trait]
    impl ResourceFactory for Factory {
        async fn create(&self) -> Result<Box<dyn ManagedResource>> {
            if self.fail.load(Ordering::SeqCst) {
                Err(PoolError::Factory("create refused".into()))
            } else {
                Ok(Box::new(Conn))
            }
        }

        fn resource_type(&self) -> &str {
            self.name
        }
    }

    fn config(min: usize, max: usize) -> PoolConfig {
        PoolConfig {
            min_size: min,
            max_size: max,
            acquisition_timeout: Duration::from_millis(50),
            health_check_interval: Duration::ZERO,
            cleanup_interval: Duration::ZERO,
            circuit_breaker: None,
            ..Default::default()
        }
    }

    async fn pool(name: &'static str, fail: bool, min: usize, max: usize) -> Arc<ResourcePool> {
        ResourcePool::new(
            Arc::new(Factory {
                name,
                fail: AtomicBool::new(fail),
            }),
            None,
            config(min, max),
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn test_autoscaler_scales_up_under_load() {
        let pool = pool("scaled", false, 1, 10).await;
        let scaler = Autoscaler::new(
            pool.clone(),
            AutoscalePolicy {
                min: 1,
                max: 10,
                target_utilization: 0.5,
                scale_up_step: 2,
                scale_up_cooldown: Duration::ZERO,
                ..Default::default()
            },
        );

        // Full utilization: the single resource is borrowed.
        let borrowed = pool.acquire().await.unwrap();
        scaler.evaluate().await;

        assert!(pool.stats().total > 1);
        pool.release(borrowed).await.unwrap();
    }

    #[tokio::test]
    async fn test_autoscaler_scales_down_when_idle() {
        let pool = pool("idle-pool", false, 1, 10).await;
        pool.scale_up(4).await;
        assert_eq!(pool.stats().total, 5);

        let scaler = Autoscaler::new(
            pool.clone(),
            AutoscalePolicy {
                min: 1,
                max: 10,
                target_utilization: 0.5,
                scale_down_step: 2,
                scale_down_cooldown: Duration::ZERO,
                ..Default::default()
            },
        );

        // Zero utilization is far below target/2.
        scaler.evaluate().await;
        assert_eq!(pool.stats().total, 3);
    }

    #[tokio::test]
    async fn test_failover_after_threshold() {
        let primary = pool("primary", true, 0, 2).await;
        let backup = pool("backup", false, 1, 2).await;
        let monitor = FailoverMonitor::new(primary, backup, 2);

        assert!(monitor.acquire().await.is_err());
        assert!(!monitor.is_failed_over());

        // Second failure crosses the threshold and routes to backup.
        let resource = monitor.acquire().await.unwrap();
        assert!(monitor.is_failed_over());
        assert_eq!(resource.meta.resource_type, "backup");
        monitor.release(resource).await.unwrap();

        let events = monitor.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].from, "primary");
        assert_eq!(events[0].to, "backup");
    }

    #[tokio::test]
    async fn test_recover_routes_back() {
        let primary = pool("prim", false, 1, 2).await;
        let backup = pool("back", false, 1, 2).await;
        let monitor = FailoverMonitor::new(primary, backup, 1);

        monitor.failed_over.store(true, Ordering::SeqCst);
        monitor.recover();
        assert!(!monitor.is_failed_over());

        let resource = monitor.acquire().await.unwrap();
        assert_eq!(resource.meta.resource_type, "prim");
        monitor.release(resource).await.unwrap();
    }
}
