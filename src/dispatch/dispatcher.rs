//! Priority dispatcher with a fixed worker pool.
//!
//! Workers are spawned at construction and drain a bounded priority queue;
//! items of equal priority run in submit order. Results go to a bounded
//! channel that is lossy by policy: callers that must observe a result use
//! [`Dispatcher::wait_for_result`].

use crate::dispatch::processor::ProcessorRegistry;
use crate::dispatch::work::{WorkItem, WorkResult};
use crate::dispatch::{Result, WorkError};
use chrono::Utc;
use parking_lot::Mutex;
use std::cmp::Ordering as CmpOrdering;
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, Mutex as AsyncMutex, Notify};
use tokio::task::JoinHandle;
use uuid::Uuid;

/// Dispatcher configuration
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Number of worker tasks spawned at construction
    pub worker_count: usize,

    /// Queue capacity; submits beyond it fail with `QueueFull`
    pub queue_size: usize,

    /// Retries after the first failed attempt
    pub max_retries: u32,

    /// Fixed delay between attempts
    pub retry_delay: Duration,

    /// Chunk size for batch submits
    pub batch_size: usize,

    /// Default overall execution budget for items that carry none
    pub process_timeout: Duration,

    /// Result channel capacity
    pub result_buffer: usize,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            worker_count: 4,
            queue_size: 1000,
            max_retries: 3,
            retry_delay: Duration::from_millis(100),
            batch_size: 32,
            process_timeout: Duration::from_secs(30),
            result_buffer: 1000,
        }
    }
}

/// Dispatcher counters
#[derive(Debug, Clone, Default)]
pub struct DispatcherStats {
    pub submitted: u64,
    pub completed: u64,
    pub failed: u64,

    /// Total retry attempts across all items
    pub retried: u64,

    /// Results dropped because the result channel was full
    pub results_dropped: u64,

    /// Items currently queued
    pub queue_depth: usize,
}

/// Heap entry: highest priority first, FIFO inside a priority class
struct QueuedWork {
    item: WorkItem,
    seq: u64,
}

impl PartialEq for QueuedWork {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == CmpOrdering::Equal
    }
}

impl Eq for QueuedWork {}

impl PartialOrd for QueuedWork {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueuedWork {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        self.item
            .priority
            .cmp(&other.item.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

struct Inner {
    config: DispatcherConfig,
    registry: Arc<ProcessorRegistry>,
    queue: Mutex<BinaryHeap<QueuedWork>>,
    queue_notify: Notify,
    seq: AtomicU64,
    shutting_down: AtomicBool,
    result_tx: mpsc::Sender<WorkResult>,
    result_rx: AsyncMutex<mpsc::Receiver<WorkResult>>,
    submitted: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
    retried: AtomicU64,
    results_dropped: AtomicU64,
}

/// Async work dispatcher
pub struct Dispatcher {
    inner: Arc<Inner>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl Dispatcher {
    /// Create a dispatcher and spawn its worker pool
    pub fn new(config: DispatcherConfig, registry: Arc<ProcessorRegistry>) -> Self {
        let (result_tx, result_rx) = mpsc::channel(config.result_buffer.max(1));
        let worker_count = config.worker_count.max(1);

        let inner = Arc::new(Inner {
            config,
            registry,
            queue: Mutex::new(BinaryHeap::new()),
            queue_notify: Notify::new(),
            seq: AtomicU64::new(0),
            shutting_down: AtomicBool::new(false),
            result_tx,
            result_rx: AsyncMutex::new(result_rx),
            submitted: AtomicU64::new(0),
            completed: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            retried: AtomicU64::new(0),
            results_dropped: AtomicU64::new(0),
        });

        let workers = (0..worker_count)
            .map(|worker_id| {
                let inner = Arc::clone(&inner);
                tokio::spawn(async move { worker_loop(worker_id, inner).await })
            })
            .collect();

        Self {
            inner,
            workers: Mutex::new(workers),
        }
    }

    /// Submit one work item.
    ///
    /// Fills defaults (id, created_at, timeout) and enqueues. Fails with
    /// `QueueFull` at capacity and `ShuttingDown` after shutdown began.
    pub fn submit(&self, mut item: WorkItem) -> Result<String> {
        if self.inner.shutting_down.load(Ordering::SeqCst) {
            return Err(WorkError::ShuttingDown);
        }

        if item.id.is_empty() {
            item.id = Uuid::new_v4().to_string();
        }
        item.created_at = Utc::now();
        if item.timeout.is_zero() {
            item.timeout = self.inner.config.process_timeout;
        }

        let id = item.id.clone();
        {
            let mut queue = self.inner.queue.lock();
            if queue.len() >= self.inner.config.queue_size {
                return Err(WorkError::QueueFull);
            }
            let seq = self.inner.seq.fetch_add(1, Ordering::Relaxed);
            queue.push(QueuedWork { item, seq });
        }
        self.inner.submitted.fetch_add(1, Ordering::Relaxed);
        self.inner.queue_notify.notify_one();
        Ok(id)
    }

    /// Submit many items in chunks; returns the ids in submit order
    pub async fn submit_batch(&self, items: Vec<WorkItem>) -> Result<Vec<String>> {
        let chunk_size = self.inner.config.batch_size.max(1);
        let mut ids = Vec::with_capacity(items.len());

        let mut iter = items.into_iter().peekable();
        while iter.peek().is_some() {
            for item in iter.by_ref().take(chunk_size) {
                ids.push(self.submit(item)?);
            }
            tokio::task::yield_now().await;
        }
        Ok(ids)
    }

    /// Non-blocking read from the result channel
    pub fn get_result(&self) -> Option<WorkResult> {
        let mut rx = self.inner.result_rx.try_lock().ok()?;
        rx.try_recv().ok()
    }

    /// Block until the result for `id` arrives or `timeout` elapses.
    ///
    /// Results for other items seen while waiting are re-enqueued best
    /// effort; if the channel is full they are dropped and counted.
    pub async fn wait_for_result(&self, id: &str, timeout: Duration) -> Result<WorkResult> {
        let deadline = Instant::now() + timeout;
        let mut rx = self.inner.result_rx.lock().await;

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(WorkError::Timeout(timeout));
            }

            match tokio::time::timeout(remaining, rx.recv()).await {
                Ok(Some(result)) if result.work_id == id => return Ok(result),
                Ok(Some(result)) => {
                    if self.inner.result_tx.try_send(result).is_err() {
                        self.inner.results_dropped.fetch_add(1, Ordering::Relaxed);
                    }
                }
                Ok(None) => return Err(WorkError::ShuttingDown),
                Err(_) => return Err(WorkError::Timeout(timeout)),
            }
        }
    }

    /// Signal shutdown and wait up to `timeout` for workers to drain.
    ///
    /// Idempotent: a second call returns immediately. Returns `Timeout`
    /// when workers fail to drain in time; stragglers are abandoned.
    pub async fn shutdown(&self, timeout: Duration) -> Result<()> {
        self.inner.shutting_down.store(true, Ordering::SeqCst);
        self.inner.queue_notify.notify_waiters();

        let handles: Vec<JoinHandle<()>> = self.workers.lock().drain(..).collect();
        if handles.is_empty() {
            return Ok(());
        }

        let drained = tokio::time::timeout(timeout, futures::future::join_all(handles)).await;
        match drained {
            Ok(_) => Ok(()),
            Err(_) => Err(WorkError::Timeout(timeout)),
        }
    }

    /// Counter snapshot
    pub fn stats(&self) -> DispatcherStats {
        DispatcherStats {
            submitted: self.inner.submitted.load(Ordering::Relaxed),
            completed: self.inner.completed.load(Ordering::Relaxed),
            failed: self.inner.failed.load(Ordering::Relaxed),
            retried: self.inner.retried.load(Ordering::Relaxed),
            results_dropped: self.inner.results_dropped.load(Ordering::Relaxed),
            queue_depth: self.inner.queue.lock().len(),
        }
    }

    /// Items currently queued
    pub fn queue_depth(&self) -> usize {
        self.inner.queue.lock().len()
    }
}

async fn worker_loop(worker_id: usize, inner: Arc<Inner>) {
    loop {
        let next = inner.queue.lock().pop();

        match next {
            Some(queued) => execute(&inner, queued.item).await,
            None => {
                if inner.shutting_down.load(Ordering::SeqCst) {
                    break;
                }
                tokio::select! {
                    _ = inner.queue_notify.notified() => {}
                    _ = tokio::time::sleep(Duration::from_millis(50)) => {}
                }
            }
        }
    }
    log::debug!("dispatch worker {worker_id} stopped");
}

async fn execute(inner: &Inner, item: WorkItem) {
    let overall = item.timeout;
    let deadline = Instant::now() + overall;
    let started = Instant::now();
    let max_attempts = inner.config.max_retries + 1;
    let mut attempts: u32 = 0;

    let outcome = match inner.registry.get(&item.work_type) {
        None => Err(WorkError::UnknownWorkType(item.work_type.clone())),
        Some(processor) => loop {
            attempts += 1;
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break Err(WorkError::Timeout(overall));
            }

            match tokio::time::timeout(remaining, processor.process(&item)).await {
                Ok(Ok(output)) => break Ok(output),
                Ok(Err(error)) => {
                    if !error.is_retryable() || attempts >= max_attempts {
                        break Err(error);
                    }
                    // An exhausted deadline suppresses further retries.
                    if deadline.saturating_duration_since(Instant::now())
                        <= inner.config.retry_delay
                    {
                        break Err(error);
                    }
                    inner.retried.fetch_add(1, Ordering::Relaxed);
                    tokio::time::sleep(inner.config.retry_delay).await;
                }
                Err(_) => break Err(WorkError::Timeout(overall)),
            }
        },
    };

    let result = match outcome {
        Ok(output) => {
            inner.completed.fetch_add(1, Ordering::Relaxed);
            WorkResult {
                work_id: item.id.clone(),
                work_type: item.work_type.clone(),
                success: true,
                output: Some(output),
                error: None,
                attempts: attempts.max(1),
                duration: started.elapsed(),
                completed_at: Utc::now(),
            }
        }
        Err(error) => {
            inner.failed.fetch_add(1, Ordering::Relaxed);
            WorkResult {
                work_id: item.id.clone(),
                work_type: item.work_type.clone(),
                success: false,
                output: None,
                error: Some(format!("{error} (after {} attempts)", attempts.max(1))),
                attempts: attempts.max(1),
                duration: started.elapsed(),
                completed_at: Utc::now(),
            }
        }
    };

    // Result delivery is lossy by policy.
    if inner.result_tx.try_send(result).is_err() {
        inner.results_dropped.fetch_add(1, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::processor::WorkProcessor;
    use crate::dispatch::work::WorkPriority;
    use async_trait::async_trait;

    struct Echo;

    #[async_trait]
    impl WorkProcessor for Echo {
        async fn process(&self, item: &WorkItem) -> Result<serde_json::Value> {
            Ok(item.payload.clone())
        }

        fn work_type(&self) -> &str {
            "echo"
        }
    }

    /// Fails with a retryable "timeout" error a fixed number of times
    struct Flaky {
        failures: AtomicU64,
    }

    #[async_trait]
    impl WorkProcessor for Flaky {
        async fn process(&self, item: &WorkItem) -> Result<serde_json::Value> {
            if self.failures.load(Ordering::SeqCst) > 0 {
                self.failures.fetch_sub(1, Ordering::SeqCst);
                return Err(WorkError::from_message("upstream timeout"));
            }
            Ok(item.payload.clone())
        }

        fn work_type(&self) -> &str {
            "flaky"
        }
    }

    struct Hopeless;

    #[async_trait]
    impl WorkProcessor for Hopeless {
        async fn process(&self, _item: &WorkItem) -> Result<serde_json::Value> {
            Err(WorkError::permanent("malformed payload"))
        }

        fn work_type(&self) -> &str {
            "hopeless"
        }
    }

    fn dispatcher_with(config: DispatcherConfig) -> Dispatcher {
        let registry = Arc::new(ProcessorRegistry::new());
        registry.register(Arc::new(Echo));
        registry.register(Arc::new(Flaky {
            failures: AtomicU64::new(2),
        }));
        registry.register(Arc::new(Hopeless));
        Dispatcher::new(config, registry)
    }

    fn fast_config() -> DispatcherConfig {
        DispatcherConfig {
            worker_count: 2,
            retry_delay: Duration::from_millis(5),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_submit_and_wait() {
        let dispatcher = dispatcher_with(fast_config());
        let id = dispatcher
            .submit(WorkItem::new("echo", serde_json::json!({"n": 1})))
            .unwrap();

        let result = dispatcher
            .wait_for_result(&id, Duration::from_secs(5))
            .await
            .unwrap();
        assert!(result.success);
        assert_eq!(result.output, Some(serde_json::json!({"n": 1})));
        assert_eq!(result.attempts, 1);
    }

    #[tokio::test]
    async fn test_retry_then_succeed() {
        let dispatcher = dispatcher_with(fast_config());
        let id = dispatcher
            .submit(WorkItem::new("flaky", serde_json::json!({})))
            .unwrap();

        let result = dispatcher
            .wait_for_result(&id, Duration::from_secs(5))
            .await
            .unwrap();
        assert!(result.success);
        assert!(result.attempts >= 3);
        assert!(dispatcher.stats().retried >= 2);
    }

    #[tokio::test]
    async fn test_non_retryable_fails_once() {
        let dispatcher = dispatcher_with(fast_config());
        let id = dispatcher
            .submit(WorkItem::new("hopeless", serde_json::json!({})))
            .unwrap();

        let result = dispatcher
            .wait_for_result(&id, Duration::from_secs(5))
            .await
            .unwrap();
        assert!(!result.success);
        assert_eq!(result.attempts, 1);
        assert!(result.error.unwrap().contains("after 1 attempts"));
    }

    #[tokio::test]
    async fn test_unknown_work_type() {
        let dispatcher = dispatcher_with(fast_config());
        let id = dispatcher
            .submit(WorkItem::new("nope", serde_json::json!({})))
            .unwrap();

        let result = dispatcher
            .wait_for_result(&id, Duration::from_secs(5))
            .await
            .unwrap();
        assert!(!result.success);
        assert!(result.error.unwrap().contains("unknown work type"));
    }

    #[tokio::test]
    async fn test_queue_full() {
        let config = DispatcherConfig {
            worker_count: 1,
            queue_size: 2,
            ..Default::default()
        };
        // No registered types: workers will drain slowly through unknown-type
        // failures, so fill the queue before they catch up.
        let registry = Arc::new(ProcessorRegistry::new());
        let dispatcher = Dispatcher::new(config, registry);

        let mut errors = 0;
        for i in 0..50 {
            if dispatcher
                .submit(WorkItem::new("x", serde_json::json!({ "i": i })))
                .is_err()
            {
                errors += 1;
            }
        }
        assert!(errors > 0);
    }

    #[tokio::test]
    async fn test_submit_after_shutdown() {
        let dispatcher = dispatcher_with(fast_config());
        dispatcher.shutdown(Duration::from_secs(1)).await.unwrap();

        assert!(matches!(
            dispatcher.submit(WorkItem::new("echo", serde_json::json!({}))),
            Err(WorkError::ShuttingDown)
        ));
    }

    #[tokio::test]
    async fn test_shutdown_idempotent() {
        let dispatcher = dispatcher_with(fast_config());
        dispatcher.shutdown(Duration::from_secs(1)).await.unwrap();
        dispatcher.shutdown(Duration::from_secs(1)).await.unwrap();
    }

    #[tokio::test]
    async fn test_batch_submit() {
        let dispatcher = dispatcher_with(fast_config());
        let items = (0..10)
            .map(|i| WorkItem::new("echo", serde_json::json!({ "i": i })))
            .collect();
        let ids = dispatcher.submit_batch(items).await.unwrap();
        assert_eq!(ids.len(), 10);

        dispatcher.shutdown(Duration::from_secs(5)).await.unwrap();
        assert_eq!(dispatcher.stats().completed, 10);
    }

    #[tokio::test]
    async fn test_wait_for_result_timeout() {
        let dispatcher = dispatcher_with(fast_config());
        let err = dispatcher
            .wait_for_result("no-such-id", Duration::from_millis(50))
            .await
            .unwrap_err();
        assert!(matches!(err, WorkError::Timeout(_)));
    }

    #[tokio::test]
    async fn test_priority_order_with_single_worker() {
        // One worker, and the queue is primed before any worker can run.
        let config = DispatcherConfig {
            worker_count: 1,
            retry_delay: Duration::from_millis(1),
            ..Default::default()
        };
        let registry = Arc::new(ProcessorRegistry::new());
        registry.register(Arc::new(Echo));

        // A slow blocker occupies the worker while the later submits queue up.
        struct Slow;
        #[async_trait]
        impl WorkProcessor for Slow {
            async fn process(&self, item: &WorkItem) -> Result<serde_json::Value> {
                tokio::time::sleep(Duration::from_millis(100)).await;
                Ok(item.payload.clone())
            }
            fn work_type(&self) -> &str {
                "slow"
            }
        }
        registry.register(Arc::new(Slow));
        let dispatcher = Dispatcher::new(config, registry);

        dispatcher
            .submit(WorkItem::new("slow", serde_json::json!("blocker")))
            .unwrap();
        let low = dispatcher
            .submit(
                WorkItem::new("echo", serde_json::json!("low")).with_priority(WorkPriority::Low),
            )
            .unwrap();
        let critical = dispatcher
            .submit(
                WorkItem::new("echo", serde_json::json!("critical"))
                    .with_priority(WorkPriority::Critical),
            )
            .unwrap();

        // The critical item must finish before the low one.
        let first = dispatcher
            .wait_for_result(&critical, Duration::from_secs(5))
            .await
            .unwrap();
        assert!(first.success);

        let second = dispatcher
            .wait_for_result(&low, Duration::from_secs(5))
            .await
            .unwrap();
        assert!(second.success);
        assert!(first.completed_at <= second.completed_at);
    }
}
