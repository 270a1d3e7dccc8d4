//! The runtime facade wiring the subsystems together.

use crate::cache::backend::{CacheStorageBackend, RedisBackend, SledBackend};
use crate::cache::manager::TieredCache;
use crate::cache::CacheError;
use crate::config::RuntimeConfig;
use crate::dispatch::dispatcher::Dispatcher;
use crate::dispatch::processor::ProcessorRegistry;
use crate::memory::decay::DecayManager;
use crate::memory::store::{EmbeddingGenerator, MemoryStore};
use crate::memory::narrative::NarrativeSummarizer;
use crate::memory::summarizer::Summarizer;
use crate::memory::MemoryError;
use crate::metrics::collector::MetricsCollector;
use crate::pool::manager::PoolManager;
use crate::query::optimizer::{OptimizerConfig, QueryOptimizer};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Runtime construction and shutdown errors
#[derive(Error, Debug)]
pub enum RuntimeError {
    /// Memory subsystem error
    #[error(transparent)]
    Memory(#[from] MemoryError),

    /// Cache subsystem error
    #[error(transparent)]
    Cache(#[from] CacheError),
}

/// Result type for runtime operations
pub type Result<T> = std::result::Result<T, RuntimeError>;

/// The assembled conversational-memory runtime.
///
/// Owns the decay manager, the cache hierarchy, the work dispatcher, the
/// resource pools, the query optimizer, and the metrics collector;
/// everything external (the chunk store, embedding provider, resource
/// factories) is injected.
pub struct MemoryRuntime {
    decay: DecayManager,
    cache: TieredCache,
    dispatcher: Dispatcher,
    registry: Arc<ProcessorRegistry>,
    pools: PoolManager,
    optimizer: QueryOptimizer,
    metrics: Arc<MetricsCollector>,
}

impl MemoryRuntime {
    /// Assemble a runtime around an injected chunk store.
    ///
    /// Uses the narrative summarizer without embeddings; see
    /// [`Self::with_summarizer`] to inject an embedding-backed one.
    pub async fn new(config: RuntimeConfig, store: Arc<dyn MemoryStore>) -> Result<Self> {
        let summarizer: Arc<dyn Summarizer> = Arc::new(NarrativeSummarizer::new());
        Self::with_summarizer(config, store, summarizer).await
    }

    /// Assemble a runtime with an embedding provider driving semantic
    /// grouping in the summarizer
    pub async fn with_embedder(
        config: RuntimeConfig,
        store: Arc<dyn MemoryStore>,
        embedder: Arc<dyn EmbeddingGenerator>,
    ) -> Result<Self> {
        let summarizer: Arc<dyn Summarizer> =
            Arc::new(NarrativeSummarizer::with_embedder(embedder));
        Self::with_summarizer(config, store, summarizer).await
    }

    /// Assemble a runtime with a custom summarizer
    pub async fn with_summarizer(
        config: RuntimeConfig,
        store: Arc<dyn MemoryStore>,
        summarizer: Arc<dyn Summarizer>,
    ) -> Result<Self> {
        config.validate()?;

        let l2: Option<Arc<dyn CacheStorageBackend>> = match &config.cache.redis_url {
            Some(url) => Some(Arc::new(RedisBackend::connect(url, "mnemo").await?)),
            None => None,
        };
        let l3: Option<Arc<dyn CacheStorageBackend>> = match &config.cache.sled_path {
            Some(path) => Some(Arc::new(SledBackend::open(path)?)),
            None => None,
        };
        let cache = TieredCache::new(config.cache.tiered.clone(), l2, l3)?;

        let registry = Arc::new(ProcessorRegistry::new());
        let dispatcher = Dispatcher::new(config.dispatcher.clone(), Arc::clone(&registry));

        let metrics = MetricsCollector::new(config.metrics.clone());
        metrics.start();

        let decay = DecayManager::new(store, summarizer, config.decay.clone())?;

        Ok(Self {
            decay,
            cache,
            dispatcher,
            registry,
            pools: PoolManager::new(),
            optimizer: QueryOptimizer::new(OptimizerConfig::default()),
            metrics,
        })
    }

    /// The decay manager
    pub fn decay(&self) -> &DecayManager {
        &self.decay
    }

    /// The cache hierarchy
    pub fn cache(&self) -> &TieredCache {
        &self.cache
    }

    /// The work dispatcher
    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// The processor registry backing the dispatcher
    pub fn processors(&self) -> &ProcessorRegistry {
        &self.registry
    }

    /// The resource pool manager
    pub fn pools(&self) -> &PoolManager {
        &self.pools
    }

    /// The query optimizer
    pub fn optimizer(&self) -> &QueryOptimizer {
        &self.optimizer
    }

    /// The metrics collector
    pub fn metrics(&self) -> &Arc<MetricsCollector> {
        &self.metrics
    }

    /// Stop every subsystem in dependency order.
    ///
    /// Drains the dispatcher up to `drain_timeout`, then stops the decay
    /// driver, closes the pools and cache tiers, and flushes metrics.
    pub async fn shutdown(&self, drain_timeout: Duration) {
        self.decay.stop();
        if let Err(e) = self.dispatcher.shutdown(drain_timeout).await {
            log::warn!("dispatcher did not drain cleanly: {e}");
        }
        self.pools.shutdown().await;
        self.cache.shutdown();
        self.metrics.shutdown().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::store::InMemoryStore;

    #[tokio::test]
    async fn test_runtime_assembles_and_shuts_down() {
        let store = Arc::new(InMemoryStore::new());
        let runtime = MemoryRuntime::new(RuntimeConfig::default(), store)
            .await
            .unwrap();

        runtime.metrics().record_gauge("boot", 1.0);
        assert!(runtime.cache().stats().tiers.len() >= 1);
        assert_eq!(runtime.optimizer().cached_plans(), 0);

        runtime.shutdown(Duration::from_secs(1)).await;
    }

    #[tokio::test]
    async fn test_runtime_decay_start_guard() {
        let store = Arc::new(InMemoryStore::new());
        let runtime = MemoryRuntime::new(RuntimeConfig::default(), store)
            .await
            .unwrap();

        runtime.decay().start().unwrap();
        assert!(runtime.decay().start().is_err());
        runtime.shutdown(Duration::from_secs(1)).await;
    }
}
