//! Resource pools and the typed pool manager.
//!
//! Each pool owns its resources exclusively; callers hold temporary
//! borrows between acquire and release. Background loops keep the pool
//! healthy: a health check probes idle resources, and a cleanup loop
//! retires idle or over-age resources while the pool stays above its
//! minimum size.

use crate::pool::breaker::{BreakerConfig, CircuitBreaker};
use crate::pool::resource::{
    ManagedResource, PooledResource, ResourceFactory, ResourceMeta, ResourceStatus,
    ResourceValidator,
};
use crate::pool::{PoolError, Result};
use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Notify;
use tokio::task::JoinHandle;

/// Release destroys a resource whose lifetime error count passed this
const RELEASE_ERROR_LIMIT: u32 = 10;

/// Health-check failures in a row that destroy a resource
const HEALTH_FAILURE_LIMIT: u32 = 5;

/// Per-pool configuration
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Resources kept alive even when idle
    pub min_size: usize,

    /// Hard cap on resources
    pub max_size: usize,

    /// How long acquire waits before failing with `Timeout`
    pub acquisition_timeout: Duration,

    /// Idle resources beyond this are retired by the cleanup loop
    pub idle_timeout: Duration,

    /// Resources older than this are retired regardless of use
    pub max_lifetime: Duration,

    /// Health-check loop interval; zero disables the loop
    pub health_check_interval: Duration,

    /// Cleanup loop interval; zero disables the loop
    pub cleanup_interval: Duration,

    /// Utilization reporting interval; zero disables the loop
    pub metrics_interval: Duration,

    /// Circuit breaker configuration; `None` disables the breaker
    pub circuit_breaker: Option<BreakerConfig>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            min_size: 2,
            max_size: 10,
            acquisition_timeout: Duration::from_secs(5),
            idle_timeout: Duration::from_secs(600),
            max_lifetime: Duration::from_secs(3600),
            health_check_interval: Duration::from_secs(60),
            cleanup_interval: Duration::from_secs(60),
            metrics_interval: Duration::from_secs(60),
            circuit_breaker: Some(BreakerConfig::default()),
        }
    }
}

/// Pool counters
#[derive(Debug, Clone, Default)]
pub struct PoolStats {
    pub resource_type: String,
    pub total: usize,
    pub available: usize,
    pub in_use: usize,
    pub created_total: u64,
    pub destroyed_total: u64,
    pub acquired_total: u64,
    pub released_total: u64,
    pub timeouts: u64,
    pub validation_failures: u64,
}

impl PoolStats {
    /// in_use / total; zero for an empty pool
    pub fn utilization(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.in_use as f64 / self.total as f64
        }
    }
}

/// A typed pool of reusable resources
pub struct ResourcePool {
    factory: Arc<dyn ResourceFactory>,
    validator: Option<Arc<dyn ResourceValidator>>,
    config: PoolConfig,
    available: Mutex<VecDeque<PooledResource>>,
    in_use: Mutex<HashSet<String>>,
    total: AtomicUsize,
    release_notify: Notify,
    breaker: Option<CircuitBreaker>,
    closed: AtomicBool,
    created_total: AtomicU64,
    destroyed_total: AtomicU64,
    acquired_total: AtomicU64,
    released_total: AtomicU64,
    timeouts: AtomicU64,
    validation_failures: AtomicU64,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl ResourcePool {
    /// Create a pool, pre-warm it to `min_size`, and start its loops
    pub async fn new(
        factory: Arc<dyn ResourceFactory>,
        validator: Option<Arc<dyn ResourceValidator>>,
        config: PoolConfig,
    ) -> Result<Arc<Self>> {
        factory.validate_config(&config)?;
        if config.min_size > config.max_size {
            return Err(PoolError::ValidationFailed(format!(
                "min_size {} exceeds max_size {}",
                config.min_size, config.max_size
            )));
        }

        let breaker = config.circuit_breaker.clone().map(CircuitBreaker::new);
        let pool = Arc::new(Self {
            factory,
            validator,
            config,
            available: Mutex::new(VecDeque::new()),
            in_use: Mutex::new(HashSet::new()),
            total: AtomicUsize::new(0),
            release_notify: Notify::new(),
            breaker,
            closed: AtomicBool::new(false),
            created_total: AtomicU64::new(0),
            destroyed_total: AtomicU64::new(0),
            acquired_total: AtomicU64::new(0),
            released_total: AtomicU64::new(0),
            timeouts: AtomicU64::new(0),
            validation_failures: AtomicU64::new(0),
            tasks: Mutex::new(Vec::new()),
        });

        for _ in 0..pool.config.min_size {
            if let Err(e) = pool.create_resource().await {
                log::warn!(
                    "pre-warm create for pool {} failed: {e}",
                    pool.factory.resource_type()
                );
                break;
            }
        }

        pool.start_loops();
        Ok(pool)
    }

    /// The resource type this pool serves
    pub fn resource_type(&self) -> &str {
        self.factory.resource_type()
    }

    /// Acquire a resource, waiting up to the configured timeout.
    ///
    /// The circuit breaker (when enabled) gates entry; unhealthy
    /// resources are destroyed and replaced transparently.
    pub async fn acquire(&self) -> Result<PooledResource> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(PoolError::Closed);
        }
        if let Some(breaker) = &self.breaker {
            breaker.allow()?;
        }

        let deadline = Instant::now() + self.config.acquisition_timeout;
        let outcome = self.acquire_until(deadline).await;

        if let Some(breaker) = &self.breaker {
            match &outcome {
                Ok(_) => breaker.record_success(),
                Err(PoolError::Timeout) | Err(PoolError::Factory(_)) => breaker.record_failure(),
                Err(_) => {}
            }
        }
        outcome
    }

    /// Acquire without waiting; fails with `Exhausted` when nothing is
    /// available and the pool is at max size
    pub async fn try_acquire(&self) -> Result<PooledResource> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(PoolError::Closed);
        }
        if let Some(breaker) = &self.breaker {
            breaker.allow()?;
        }

        loop {
            match self.take_available().await? {
                Some(resource) => {
                    if let Some(breaker) = &self.breaker {
                        breaker.record_success();
                    }
                    return Ok(resource);
                }
                None => {
                    if self.total.load(Ordering::SeqCst) >= self.config.max_size {
                        return Err(PoolError::Exhausted);
                    }
                    self.create_resource().await?;
                }
            }
        }
    }

    async fn acquire_until(&self, deadline: Instant) -> Result<PooledResource> {
        loop {
            if let Some(resource) = self.take_available().await? {
                return Ok(resource);
            }

            if self.total.load(Ordering::SeqCst) < self.config.max_size {
                self.create_resource().await?;
                continue;
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                self.timeouts.fetch_add(1, Ordering::Relaxed);
                return Err(PoolError::Timeout);
            }
            // Wake on release or re-check the deadline periodically.
            let _ = tokio::time::timeout(
                remaining.min(Duration::from_millis(100)),
                self.release_notify.notified(),
            )
            .await;
        }
    }

    /// Pop an available resource, validating it first
    async fn take_available(&self) -> Result<Option<PooledResource>> {
        loop {
            let candidate = self.available.lock().pop_front();
            let mut resource = match candidate {
                Some(resource) => resource,
                None => return Ok(None),
            };

            if let Some(validator) = &self.validator {
                let check = tokio::time::timeout(
                    validator.validation_timeout(),
                    validator.validate(&*resource.inner),
                )
                .await;
                match check {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => {
                        log::debug!("resource {} failed validation: {e}", resource.meta.id);
                        self.validation_failures.fetch_add(1, Ordering::Relaxed);
                        self.destroy(resource).await;
                        continue;
                    }
                    Err(_) => {
                        self.validation_failures.fetch_add(1, Ordering::Relaxed);
                        self.destroy(resource).await;
                        continue;
                    }
                }
            }

            resource.meta.status = ResourceStatus::InUse;
            resource.meta.last_used = Instant::now();
            resource.meta.usage_count += 1;
            self.in_use.lock().insert(resource.meta.id.clone());
            self.acquired_total.fetch_add(1, Ordering::Relaxed);
            return Ok(Some(resource));
        }
    }

    /// Return a resource to the pool.
    ///
    /// The resource must have come from this pool and be in use. Over-age
    /// or error-ridden resources are destroyed instead of reused.
    pub async fn release(&self, mut resource: PooledResource) -> Result<()> {
        if resource.meta.resource_type != self.factory.resource_type() {
            return Err(PoolError::ValidationFailed(format!(
                "resource type {} does not belong to pool {}",
                resource.meta.resource_type,
                self.factory.resource_type()
            )));
        }
        if !self.in_use.lock().remove(&resource.meta.id) {
            return Err(PoolError::ValidationFailed(format!(
                "resource {} is not currently in use",
                resource.meta.id
            )));
        }
        self.released_total.fetch_add(1, Ordering::Relaxed);

        if self.closed.load(Ordering::SeqCst) {
            self.destroy(resource).await;
            return Ok(());
        }

        let worn_out = resource.meta.lifetime() > self.config.max_lifetime
            || resource.meta.error_count > RELEASE_ERROR_LIMIT;
        if worn_out {
            self.destroy(resource).await;
            // Replace up to min_size so the pool does not drain away.
            if self.total.load(Ordering::SeqCst) < self.config.min_size {
                if let Err(e) = self.create_resource().await {
                    log::warn!("replacement create failed: {e}");
                }
            }
        } else {
            resource.meta.status = ResourceStatus::Available;
            self.available.lock().push_back(resource);
        }

        self.release_notify.notify_one();
        Ok(())
    }

    /// Counter snapshot
    pub fn stats(&self) -> PoolStats {
        let available = self.available.lock().len();
        let in_use = self.in_use.lock().len();
        PoolStats {
            resource_type: self.factory.resource_type().to_string(),
            total: self.total.load(Ordering::SeqCst),
            available,
            in_use,
            created_total: self.created_total.load(Ordering::Relaxed),
            destroyed_total: self.destroyed_total.load(Ordering::Relaxed),
            acquired_total: self.acquired_total.load(Ordering::Relaxed),
            released_total: self.released_total.load(Ordering::Relaxed),
            timeouts: self.timeouts.load(Ordering::Relaxed),
            validation_failures: self.validation_failures.load(Ordering::Relaxed),
        }
    }

    /// Breaker state, when a breaker is configured
    pub fn breaker_state(&self) -> Option<crate::pool::breaker::BreakerState> {
        self.breaker.as_ref().map(|b| b.state())
    }

    /// Grow the pool by up to `step` resources, bounded by max size
    pub async fn scale_up(&self, step: usize) -> usize {
        let mut created = 0;
        for _ in 0..step {
            if self.total.load(Ordering::SeqCst) >= self.config.max_size {
                break;
            }
            match self.create_resource().await {
                Ok(()) => created += 1,
                Err(e) => {
                    log::warn!("scale-up create failed: {e}");
                    break;
                }
            }
        }
        created
    }

    /// Retire up to `step` idle resources, bounded by min size
    pub async fn scale_down(&self, step: usize) -> usize {
        let mut destroyed = 0;
        for _ in 0..step {
            if self.total.load(Ordering::SeqCst) <= self.config.min_size {
                break;
            }
            let candidate = self.available.lock().pop_back();
            match candidate {
                Some(resource) => {
                    self.destroy(resource).await;
                    destroyed += 1;
                }
                None => break,
            }
        }
        destroyed
    }

    /// Close the pool: destroy idle resources and stop the loops.
    ///
    /// Resources still borrowed are destroyed on release.
    pub async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
        loop {
            let candidate = self.available.lock().pop_front();
            match candidate {
                Some(resource) => self.destroy(resource).await,
                None => break,
            }
        }
        self.release_notify.notify_waiters();
    }

    async fn create_resource(&self) -> Result<()> {
        // Reserve the slot before the (slow) create to respect max_size.
        let reserved = self.total.fetch_add(1, Ordering::SeqCst);
        if reserved >= self.config.max_size {
            self.total.fetch_sub(1, Ordering::SeqCst);
            return Err(PoolError::Exhausted);
        }

        match self.factory.create().await {
            Ok(inner) => {
                let meta = ResourceMeta::new(self.factory.resource_type());
                self.available
                    .lock()
                    .push_back(PooledResource { meta, inner });
                self.created_total.fetch_add(1, Ordering::Relaxed);
                self.release_notify.notify_one();
                Ok(())
            }
            Err(e) => {
                self.total.fetch_sub(1, Ordering::SeqCst);
                Err(e)
            }
        }
    }

    async fn destroy(&self, mut resource: PooledResource) {
        resource.meta.status = ResourceStatus::Closed;
        if let Err(e) = resource.inner.close().await {
            log::debug!("close of resource {} failed: {e}", resource.meta.id);
        }
        self.total.fetch_sub(1, Ordering::SeqCst);
        self.destroyed_total.fetch_add(1, Ordering::Relaxed);
    }

    fn start_loops(self: &Arc<Self>) {
        let mut tasks = self.tasks.lock();

        if !self.config.health_check_interval.is_zero() {
            let pool = Arc::clone(self);
            tasks.push(tokio::spawn(async move {
                let mut ticker = tokio::time::interval(pool.config.health_check_interval);
                ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
                loop {
                    ticker.tick().await;
                    if pool.closed.load(Ordering::SeqCst) {
                        break;
                    }
                    pool.run_health_check().await;
                }
            }));
        }

        if !self.config.cleanup_interval.is_zero() {
            let pool = Arc::clone(self);
            tasks.push(tokio::spawn(async move {
                let mut ticker = tokio::time::interval(pool.config.cleanup_interval);
                ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
                loop {
                    ticker.tick().await;
                    if pool.closed.load(Ordering::SeqCst) {
                        break;
                    }
                    pool.run_cleanup().await;
                }
            }));
        }

        if !self.config.metrics_interval.is_zero() {
            let pool = Arc::clone(self);
            tasks.push(tokio::spawn(async move {
                let mut ticker = tokio::time::interval(pool.config.metrics_interval);
                ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
                loop {
                    ticker.tick().await;
                    if pool.closed.load(Ordering::SeqCst) {
                        break;
                    }
                    let stats = pool.stats();
                    log::debug!(
                        "pool {}: {}/{} in use ({} available, {:.0}% utilization)",
                        stats.resource_type,
                        stats.in_use,
                        stats.total,
                        stats.available,
                        stats.utilization() * 100.0
                    );
                }
            }));
        }
    }

    /// Probe every idle resource; repeated failures destroy it
    async fn run_health_check(&self) {
        let Some(validator) = self.validator.clone() else {
            return;
        };

        let mut drained: Vec<PooledResource> = {
            let mut available = self.available.lock();
            available.drain(..).collect()
        };

        let mut keep = VecDeque::with_capacity(drained.len());
        for mut resource in drained.drain(..) {
            let healthy = validator.is_healthy(&*resource.inner).await;
            if healthy {
                resource.meta.consecutive_failures = 0;
                keep.push_back(resource);
            } else {
                resource.meta.error_count += 1;
                resource.meta.consecutive_failures += 1;
                if resource.meta.consecutive_failures >= HEALTH_FAILURE_LIMIT {
                    log::warn!(
                        "resource {} failed {} consecutive health checks, destroying",
                        resource.meta.id,
                        resource.meta.consecutive_failures
                    );
                    self.destroy(resource).await;
                } else {
                    keep.push_back(resource);
                }
            }
        }

        let mut available = self.available.lock();
        for resource in keep {
            available.push_back(resource);
        }
    }

    /// Retire idle and over-age resources while staying above min size
    async fn run_cleanup(&self) {
        loop {
            if self.total.load(Ordering::SeqCst) <= self.config.min_size {
                break;
            }
            let victim = {
                let mut available = self.available.lock();
                let position = available.iter().position(|r| {
                    r.meta.idle_for() > self.config.idle_timeout
                        || r.meta.lifetime() > self.config.max_lifetime
                });
                position.and_then(|i| available.remove(i))
            };
            match victim {
                Some(resource) => {
                    log::debug!("cleanup retiring resource {}", resource.meta.id);
                    self.destroy(resource).await;
                }
                None => break,
            }
        }
    }
}

/// Registry of pools keyed by resource type
#[derive(Default)]
pub struct PoolManager {
    pools: RwLock<HashMap<String, Arc<ResourcePool>>>,
}

impl PoolManager {
    /// Create an empty manager
    pub fn new() -> Self {
        Self::default()
    }

    /// Create and register a pool for the factory's resource type
    pub async fn register(
        &self,
        factory: Arc<dyn ResourceFactory>,
        validator: Option<Arc<dyn ResourceValidator>>,
        config: PoolConfig,
    ) -> Result<Arc<ResourcePool>> {
        let resource_type = factory.resource_type().to_string();
        if self.pools.read().contains_key(&resource_type) {
            return Err(PoolError::AlreadyExists(resource_type));
        }

        let pool = ResourcePool::new(factory, validator, config).await?;
        self.pools.write().insert(resource_type, pool.clone());
        Ok(pool)
    }

    /// Look up a pool by resource type
    pub fn get(&self, resource_type: &str) -> Result<Arc<ResourcePool>> {
        self.pools
            .read()
            .get(resource_type)
            .cloned()
            .ok_or_else(|| PoolError::NotFound(resource_type.to_string()))
    }

    /// Acquire from the pool registered for `resource_type`
    pub async fn acquire(&self, resource_type: &str) -> Result<PooledResource> {
        self.get(resource_type)?.acquire().await
    }

    /// Stats for every registered pool
    pub fn stats(&self) -> Vec<PoolStats> {
        self.pools.read().values().map(|p| p.stats()).collect()
    }

    /// Close every pool
    pub async fn shutdown(&self) {
        let pools: Vec<Arc<ResourcePool>> = self.pools.read().values().cloned().collect();
        for pool in pools {
            pool.close().await;
        }
    }
}
