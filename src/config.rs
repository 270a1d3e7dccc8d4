//! Aggregated runtime configuration with environment overrides.
//!
//! Every knob has a `MNEMO_*` environment counterpart read at
//! construction. Malformed values are logged and ignored rather than
//! failing startup.

use crate::cache::manager::TieredCacheConfig;
use crate::cache::policy::{CachePolicy, EvictionPolicy, WriteStrategy};
use crate::dispatch::dispatcher::DispatcherConfig;
use crate::memory::chunk::{DecayConfig, DecayStrategy};
use crate::memory::Result as MemoryResult;
use crate::metrics::collector::MetricsConfig;
use crate::pool::autoscale::AutoscalePolicy;
use crate::pool::manager::PoolConfig;
use std::path::PathBuf;
use std::time::Duration;

/// Cache wiring: the shared policy plus tier backends to enable
#[derive(Debug, Clone)]
pub struct CacheSettings {
    /// Tier manager configuration (policy, invalidation, prefetch)
    pub tiered: TieredCacheConfig,

    /// Redis URL for the distributed L2 tier; `None` disables L2
    pub redis_url: Option<String>,

    /// Directory for the persistent L3 tier; `None` disables L3
    pub sled_path: Option<PathBuf>,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            tiered: TieredCacheConfig::default(),
            redis_url: None,
            sled_path: None,
        }
    }
}

/// Pool wiring: defaults applied to registered pools
#[derive(Debug, Clone, Default)]
pub struct PoolSettings {
    /// Base configuration for pools registered through the runtime
    pub default_pool: PoolConfig,

    /// Autoscaling policy; `None` disables the autoscaler
    pub autoscale: Option<AutoscalePolicy>,
}

/// Top-level runtime configuration
#[derive(Debug, Clone, Default)]
pub struct RuntimeConfig {
    /// Decay engine configuration
    pub decay: DecayConfig,

    /// Cache hierarchy configuration
    pub cache: CacheSettings,

    /// Work dispatcher configuration
    pub dispatcher: DispatcherConfig,

    /// Resource pool configuration
    pub pools: PoolSettings,

    /// Metrics collector configuration
    pub metrics: MetricsConfig,
}

impl RuntimeConfig {
    /// Defaults overridden by any `MNEMO_*` environment variables present
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env();
        config
    }

    /// Validate the cross-field invariants
    pub fn validate(&self) -> MemoryResult<()> {
        self.decay.validate()
    }

    fn apply_env(&mut self) {
        // Decay engine.
        if let Some(strategy) = env_string("MNEMO_DECAY_STRATEGY") {
            match strategy.to_lowercase().as_str() {
                "linear" => self.decay.strategy = DecayStrategy::Linear,
                "exponential" => self.decay.strategy = DecayStrategy::Exponential,
                "adaptive" => self.decay.strategy = DecayStrategy::Adaptive,
                other => log::warn!("unknown MNEMO_DECAY_STRATEGY {other:?}, keeping default"),
            }
        }
        env_f64("MNEMO_DECAY_BASE_RATE", &mut self.decay.base_decay_rate);
        env_f64("MNEMO_DECAY_MIN_RELEVANCE", &mut self.decay.min_relevance);
        env_f64(
            "MNEMO_DECAY_SUMMARIZATION_THRESHOLD",
            &mut self.decay.summarization_threshold,
        );
        env_f64(
            "MNEMO_DECAY_DELETION_THRESHOLD",
            &mut self.decay.deletion_threshold,
        );
        env_duration_secs("MNEMO_DECAY_INTERVAL_SECS", &mut self.decay.decay_interval);
        env_duration_secs(
            "MNEMO_DECAY_RETENTION_SECS",
            &mut self.decay.retention_period,
        );

        // Cache hierarchy.
        let policy: &mut CachePolicy = &mut self.cache.tiered.policy;
        env_usize("MNEMO_CACHE_MAX_ITEMS", &mut policy.max_items);
        env_usize("MNEMO_CACHE_MAX_BYTES", &mut policy.max_bytes);
        env_duration_secs("MNEMO_CACHE_TTL_SECS", &mut policy.ttl);
        env_duration_secs("MNEMO_CACHE_MAX_TTL_SECS", &mut policy.max_ttl);
        env_duration_secs(
            "MNEMO_CACHE_CLEANUP_INTERVAL_SECS",
            &mut policy.cleanup_interval,
        );
        env_usize("MNEMO_CACHE_CLEANUP_BATCH", &mut policy.cleanup_batch);
        env_bool("MNEMO_CACHE_COMPRESSION", &mut policy.compression);
        if let Some(eviction) = env_string("MNEMO_CACHE_EVICTION") {
            match eviction.to_lowercase().as_str() {
                "lru" => policy.eviction = EvictionPolicy::Lru,
                "lfu" => policy.eviction = EvictionPolicy::Lfu,
                "fifo" => policy.eviction = EvictionPolicy::Fifo,
                "ttl" => policy.eviction = EvictionPolicy::Ttl,
                other => log::warn!("unknown MNEMO_CACHE_EVICTION {other:?}, keeping default"),
            }
        }
        if let Some(strategy) = env_string("MNEMO_CACHE_STRATEGY") {
            match strategy.to_lowercase().as_str() {
                "write_through" => policy.strategy = WriteStrategy::WriteThrough,
                "write_back" => policy.strategy = WriteStrategy::WriteBack,
                "write_around" => policy.strategy = WriteStrategy::WriteAround,
                "read_through" => policy.strategy = WriteStrategy::ReadThrough,
                "refresh_ahead" => policy.strategy = WriteStrategy::RefreshAhead,
                "adaptive" => policy.strategy = WriteStrategy::Adaptive,
                other => log::warn!("unknown MNEMO_CACHE_STRATEGY {other:?}, keeping default"),
            }
        }
        if let Some(url) = env_string("MNEMO_REDIS_URL") {
            self.cache.redis_url = Some(url);
        }
        if let Some(path) = env_string("MNEMO_SLED_PATH") {
            self.cache.sled_path = Some(PathBuf::from(path));
        }

        // Dispatcher.
        env_usize("MNEMO_WORKER_COUNT", &mut self.dispatcher.worker_count);
        env_usize("MNEMO_QUEUE_SIZE", &mut self.dispatcher.queue_size);
        env_u32("MNEMO_MAX_RETRIES", &mut self.dispatcher.max_retries);
        env_duration_millis("MNEMO_RETRY_DELAY_MS", &mut self.dispatcher.retry_delay);
        env_usize("MNEMO_BATCH_SIZE", &mut self.dispatcher.batch_size);
        env_duration_secs(
            "MNEMO_PROCESS_TIMEOUT_SECS",
            &mut self.dispatcher.process_timeout,
        );

        // Pools.
        env_usize("MNEMO_POOL_MIN_SIZE", &mut self.pools.default_pool.min_size);
        env_usize("MNEMO_POOL_MAX_SIZE", &mut self.pools.default_pool.max_size);
        env_duration_secs(
            "MNEMO_POOL_ACQUIRE_TIMEOUT_SECS",
            &mut self.pools.default_pool.acquisition_timeout,
        );
        env_duration_secs(
            "MNEMO_POOL_IDLE_TIMEOUT_SECS",
            &mut self.pools.default_pool.idle_timeout,
        );
        env_duration_secs(
            "MNEMO_POOL_MAX_LIFETIME_SECS",
            &mut self.pools.default_pool.max_lifetime,
        );

        // Metrics.
        env_duration_secs(
            "MNEMO_METRICS_INTERVAL_SECS",
            &mut self.metrics.collection_interval,
        );
        env_duration_secs("MNEMO_METRICS_RETENTION_SECS", &mut self.metrics.retention);
        env_usize("MNEMO_METRICS_MAX_SERIES", &mut self.metrics.max_metrics);
        env_usize(
            "MNEMO_METRICS_SERIES_LENGTH",
            &mut self.metrics.max_series_length,
        );
        env_usize("MNEMO_METRICS_BUFFER_SIZE", &mut self.metrics.buffer_size);
        env_usize("MNEMO_METRICS_BATCH_SIZE", &mut self.metrics.batch_size);
        env_duration_secs(
            "MNEMO_METRICS_FLUSH_INTERVAL_SECS",
            &mut self.metrics.flush_interval,
        );
        env_f64("MNEMO_METRICS_SAMPLING_RATE", &mut self.metrics.sampling_rate);
        env_bool(
            "MNEMO_METRICS_ANOMALY_DETECTION",
            &mut self.metrics.enable_anomaly_detection,
        );
        env_bool(
            "MNEMO_METRICS_TREND_ANALYSIS",
            &mut self.metrics.enable_trend_analysis,
        );
        env_bool(
            "MNEMO_METRICS_CORRELATION_ANALYSIS",
            &mut self.metrics.enable_correlation_analysis,
        );
    }
}

fn env_string(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}

fn env_f64(key: &str, target: &mut f64) {
    if let Some(raw) = env_string(key) {
        match raw.parse() {
            Ok(value) => *target = value,
            Err(_) => log::warn!("ignoring malformed {key}={raw:?}"),
        }
    }
}

fn env_usize(key: &str, target: &mut usize) {
    if let Some(raw) = env_string(key) {
        match raw.parse() {
            Ok(value) => *target = value,
            Err(_) => log::warn!("ignoring malformed {key}={raw:?}"),
        }
    }
}

fn env_u32(key: &str, target: &mut u32) {
    if let Some(raw) = env_string(key) {
        match raw.parse() {
            Ok(value) => *target = value,
            Err(_) => log::warn!("ignoring malformed {key}={raw:?}"),
        }
    }
}

fn env_bool(key: &str, target: &mut bool) {
    if let Some(raw) = env_string(key) {
        match raw.to_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => *target = true,
            "0" | "false" | "no" | "off" => *target = false,
            other => log::warn!("ignoring malformed {key}={other:?}"),
        }
    }
}

fn env_duration_secs(key: &str, target: &mut Duration) {
    if let Some(raw) = env_string(key) {
        match raw.parse::<u64>() {
            Ok(secs) => *target = Duration::from_secs(secs),
            Err(_) => log::warn!("ignoring malformed {key}={raw:?}"),
        }
    }
}

fn env_duration_millis(key: &str, target: &mut Duration) {
    if let Some(raw) = env_string(key) {
        match raw.parse::<u64>() {
            Ok(millis) => *target = Duration::from_millis(millis),
            Err(_) => log::warn!("ignoring malformed {key}={raw:?}"),
        }
    }
}
