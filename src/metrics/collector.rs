//! The metrics collector: record pipeline, export loops, analysis loops.

use crate::metrics::alerts::AlertEngine;
use crate::metrics::analysis::{
    correlate, detect_trend, AnomalyDetector, CorrelationResult, TrendResult,
};
use crate::metrics::metric::Metric;
use crate::metrics::series::{MetricPoint, MetricSeries};
use crate::metrics::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;

/// Metrics configuration
#[derive(Debug, Clone)]
pub struct MetricsConfig {
    /// Interval for retention cleanup and analysis passes
    pub collection_interval: Duration,

    /// How long series points are retained
    pub retention: Duration,

    /// Maximum number of distinct series
    pub max_metrics: usize,

    /// Ring bound per series
    pub max_series_length: usize,

    /// Run the anomaly detector on every record
    pub enable_anomaly_detection: bool,

    /// Run the periodic trend analysis loop
    pub enable_trend_analysis: bool,

    /// Run the periodic correlation analysis loop
    pub enable_correlation_analysis: bool,

    /// Export buffer capacity; overflow drops the oldest entries
    pub buffer_size: usize,

    /// Export batch size; a full batch wakes the flush loop early
    pub batch_size: usize,

    /// Flush loop interval
    pub flush_interval: Duration,

    /// Fraction of records kept; the rest are sampled out
    pub sampling_rate: f64,

    /// Tags merged into every metric that does not already carry them
    pub default_tags: HashMap<String, String>,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        let mut default_tags = HashMap::new();
        default_tags.insert("component".to_string(), "mnemo".to_string());

        Self {
            collection_interval: Duration::from_secs(60),
            retention: Duration::from_secs(24 * 60 * 60),
            max_metrics: 10_000,
            max_series_length: 1000,
            enable_anomaly_detection: true,
            enable_trend_analysis: true,
            enable_correlation_analysis: false,
            buffer_size: 10_000,
            batch_size: 256,
            flush_interval: Duration::from_secs(10),
            sampling_rate: 1.0,
            default_tags,
        }
    }
}

/// Exporter-side counters
#[derive(Debug, Clone, Default)]
pub struct ExporterStats {
    pub batches_exported: u64,
    pub metrics_exported: u64,
    pub errors: u64,
    pub last_export: Option<DateTime<Utc>>,
}

/// Pushes metric batches to an external sink
#[async_trait]
pub trait MetricExporter: Send + Sync {
    /// Export one batch
    async fn export(&self, batch: &[Metric]) -> Result<()>;

    /// Exporter name for logs
    fn name(&self) -> &str;

    /// Unhealthy exporters are skipped until they recover
    fn is_healthy(&self) -> bool;

    /// Exporter-side counters
    fn export_stats(&self) -> ExporterStats;
}

/// Exporter that writes batches to the log; useful in tests and as a
/// development default
#[derive(Default)]
pub struct LogExporter {
    batches: AtomicU64,
    metrics: AtomicU64,
}

#[async_trait]
impl MetricExporter for LogExporter {
    async fn export(&self, batch: &[Metric]) -> Result<()> {
        self.batches.fetch_add(1, Ordering::Relaxed);
        self.metrics.fetch_add(batch.len() as u64, Ordering::Relaxed);
        log::debug!("exported {} metrics", batch.len());
        Ok(())
    }

    fn name(&self) -> &str {
        "log"
    }

    fn is_healthy(&self) -> bool {
        true
    }

    fn export_stats(&self) -> ExporterStats {
        ExporterStats {
            batches_exported: self.batches.load(Ordering::Relaxed),
            metrics_exported: self.metrics.load(Ordering::Relaxed),
            errors: 0,
            last_export: None,
        }
    }
}

#[derive(Debug, Clone, Default)]
struct Aggregation {
    sum: f64,
    count: u64,
    min: f64,
    max: f64,
}

impl Aggregation {
    fn update(&mut self, value: f64) {
        if self.count == 0 {
            self.min = value;
            self.max = value;
        } else {
            self.min = self.min.min(value);
            self.max = self.max.max(value);
        }
        self.sum += value;
        self.count += 1;
    }

    fn avg(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.sum / self.count as f64
        }
    }
}

/// Collector counters
#[derive(Debug, Clone, Default)]
pub struct CollectorStats {
    pub recorded: u64,
    pub sampled_out: u64,
    pub anomalies: u64,
    pub buffer_dropped: u64,
    pub export_errors: u64,
    pub series_count: usize,
}

/// Metrics collector
pub struct MetricsCollector {
    config: MetricsConfig,
    current: RwLock<HashMap<String, Metric>>,
    series: RwLock<HashMap<String, MetricSeries>>,
    aggregations: RwLock<HashMap<String, Aggregation>>,
    buffer: Mutex<Vec<Metric>>,
    flush_notify: Arc<Notify>,
    exporters: RwLock<Vec<Arc<dyn MetricExporter>>>,
    detector: RwLock<Option<Arc<dyn AnomalyDetector>>>,
    alerts: AlertEngine,
    trends: RwLock<HashMap<String, TrendResult>>,
    correlations: RwLock<Vec<CorrelationResult>>,
    recorded: AtomicU64,
    sampled_out: AtomicU64,
    anomalies: AtomicU64,
    buffer_dropped: AtomicU64,
    export_errors: AtomicU64,
    closed: Arc<AtomicBool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl MetricsCollector {
    /// Create a collector; background loops start with [`Self::start`]
    pub fn new(config: MetricsConfig) -> Arc<Self> {
        Arc::new(Self {
            config,
            current: RwLock::new(HashMap::new()),
            series: RwLock::new(HashMap::new()),
            aggregations: RwLock::new(HashMap::new()),
            buffer: Mutex::new(Vec::new()),
            flush_notify: Arc::new(Notify::new()),
            exporters: RwLock::new(Vec::new()),
            detector: RwLock::new(None),
            alerts: AlertEngine::new(),
            trends: RwLock::new(HashMap::new()),
            correlations: RwLock::new(Vec::new()),
            recorded: AtomicU64::new(0),
            sampled_out: AtomicU64::new(0),
            anomalies: AtomicU64::new(0),
            buffer_dropped: AtomicU64::new(0),
            export_errors: AtomicU64::new(0),
            closed: Arc::new(AtomicBool::new(false)),
            tasks: Mutex::new(Vec::new()),
        })
    }

    /// Install an anomaly detector
    pub fn set_anomaly_detector(&self, detector: Arc<dyn AnomalyDetector>) {
        *self.detector.write() = Some(detector);
    }

    /// Register an exporter
    pub fn register_exporter(&self, exporter: Arc<dyn MetricExporter>) {
        self.exporters.write().push(exporter);
    }

    /// The alert engine (add rules, read history)
    pub fn alerts(&self) -> &AlertEngine {
        &self.alerts
    }

    /// Record a measurement. Never fails.
    ///
    /// The pipeline: sampling, tag enrichment, anomaly check, aggregation
    /// update, current-value map, series append, alert evaluation, export
    /// buffering.
    pub fn record(&self, mut metric: Metric) {
        if self.closed.load(Ordering::SeqCst) {
            return;
        }

        if self.config.sampling_rate < 1.0 && rand::random::<f64>() >= self.config.sampling_rate {
            self.sampled_out.fetch_add(1, Ordering::Relaxed);
            return;
        }

        for (key, value) in &self.config.default_tags {
            metric
                .tags
                .entry(key.clone())
                .or_insert_with(|| value.clone());
        }

        if self.config.enable_anomaly_detection {
            let detector = self.detector.read().clone();
            if let Some(detector) = detector {
                let stats = {
                    let series = self.series.read();
                    series.get(&metric.name).map(|s| s.statistics().clone())
                };
                let (is_anomaly, score) = detector.check(&metric, stats.as_ref());
                if is_anomaly {
                    self.anomalies.fetch_add(1, Ordering::Relaxed);
                    log::warn!(
                        "anomaly in {} (value {}, score {score:.2})",
                        metric.name,
                        metric.value
                    );
                    metric
                        .metadata
                        .insert("anomaly_score".to_string(), format!("{score:.3}"));
                }
            }
        }

        self.aggregations
            .write()
            .entry(metric.name.clone())
            .or_default()
            .update(metric.value);

        {
            let mut series = self.series.write();
            match series.get_mut(&metric.name) {
                Some(existing) => existing.push(point_from(&metric)),
                None => {
                    if series.len() >= self.config.max_metrics {
                        log::warn!(
                            "series limit {} reached, not tracking {}",
                            self.config.max_metrics,
                            metric.name
                        );
                    } else {
                        let retention = chrono::Duration::from_std(self.config.retention)
                            .unwrap_or_else(|_| chrono::Duration::days(1));
                        let mut created = MetricSeries::new(
                            metric.name.clone(),
                            self.config.max_series_length,
                            retention,
                        );
                        created.push(point_from(&metric));
                        series.insert(metric.name.clone(), created);
                    }
                }
            }
        }

        self.alerts.evaluate(&metric.name, metric.value, metric.timestamp);

        // Inline threshold carried by the metric itself.
        if let Some(threshold) = metric.threshold {
            if metric.value > threshold {
                log::warn!(
                    "{} exceeded inline threshold {threshold} (value {})",
                    metric.name,
                    metric.value
                );
            }
        }

        self.current
            .write()
            .insert(metric.name.clone(), metric.clone());

        let should_flush = {
            let mut buffer = self.buffer.lock();
            if buffer.len() >= self.config.buffer_size {
                buffer.remove(0);
                self.buffer_dropped.fetch_add(1, Ordering::Relaxed);
            }
            buffer.push(metric);
            buffer.len() >= self.config.batch_size
        };
        if should_flush {
            self.flush_notify.notify_one();
        }

        self.recorded.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a counter measurement
    pub fn record_counter(&self, name: &str, value: f64) {
        self.record(Metric::counter(name, value));
    }

    /// Record a gauge measurement
    pub fn record_gauge(&self, name: &str, value: f64) {
        self.record(Metric::gauge(name, value));
    }

    /// Record a timer measurement
    pub fn record_timer(&self, name: &str, duration: Duration) {
        self.record(Metric::timer(name, duration));
    }

    /// Latest value recorded for a metric
    pub fn current(&self, name: &str) -> Option<Metric> {
        self.current.read().get(name).cloned()
    }

    /// Statistics for one series
    pub fn series_statistics(&self, name: &str) -> Option<crate::metrics::series::SeriesStatistics> {
        self.series.read().get(name).map(|s| s.statistics().clone())
    }

    /// Aggregated `(sum, count, min, max, avg)` for a metric
    pub fn aggregation(&self, name: &str) -> Option<(f64, u64, f64, f64, f64)> {
        self.aggregations
            .read()
            .get(name)
            .map(|a| (a.sum, a.count, a.min, a.max, a.avg()))
    }

    /// Latest trend analysis results
    pub fn trends(&self) -> Vec<TrendResult> {
        self.trends.read().values().cloned().collect()
    }

    /// Latest correlation analysis results
    pub fn correlations(&self) -> Vec<CorrelationResult> {
        self.correlations.read().clone()
    }

    /// Collector counters
    pub fn stats(&self) -> CollectorStats {
        CollectorStats {
            recorded: self.recorded.load(Ordering::Relaxed),
            sampled_out: self.sampled_out.load(Ordering::Relaxed),
            anomalies: self.anomalies.load(Ordering::Relaxed),
            buffer_dropped: self.buffer_dropped.load(Ordering::Relaxed),
            export_errors: self.export_errors.load(Ordering::Relaxed),
            series_count: self.series.read().len(),
        }
    }

    /// Export everything buffered right now
    pub async fn flush(&self) {
        let batch: Vec<Metric> = {
            let mut buffer = self.buffer.lock();
            buffer.drain(..).collect()
        };
        if batch.is_empty() {
            return;
        }

        let exporters: Vec<Arc<dyn MetricExporter>> = self.exporters.read().clone();
        for exporter in exporters {
            if !exporter.is_healthy() {
                log::debug!("skipping unhealthy exporter {}", exporter.name());
                continue;
            }
            if let Err(e) = exporter.export(&batch).await {
                self.export_errors.fetch_add(1, Ordering::Relaxed);
                log::warn!("exporter {} failed: {e}", exporter.name());
            }
        }
    }

    /// Start the flush, retention, and analysis loops
    pub fn start(self: &Arc<Self>) {
        let mut tasks = self.tasks.lock();

        // Flush loop: ticks on the interval, wakes early on a full batch.
        {
            let collector = Arc::clone(self);
            tasks.push(tokio::spawn(async move {
                let interval = collector
                    .config
                    .flush_interval
                    .max(Duration::from_millis(10));
                let mut ticker = tokio::time::interval(interval);
                ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
                loop {
                    tokio::select! {
                        _ = ticker.tick() => {}
                        _ = collector.flush_notify.notified() => {}
                    }
                    if collector.closed.load(Ordering::SeqCst) {
                        break;
                    }
                    collector.flush().await;
                }
            }));
        }

        // Retention cleanup loop.
        {
            let collector = Arc::clone(self);
            tasks.push(tokio::spawn(async move {
                let interval = collector
                    .config
                    .collection_interval
                    .max(Duration::from_millis(10));
                let mut ticker = tokio::time::interval(interval);
                ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
                loop {
                    ticker.tick().await;
                    if collector.closed.load(Ordering::SeqCst) {
                        break;
                    }
                    collector.enforce_retention();
                }
            }));
        }

        if self.config.enable_trend_analysis || self.config.enable_correlation_analysis {
            let collector = Arc::clone(self);
            tasks.push(tokio::spawn(async move {
                let interval = collector
                    .config
                    .collection_interval
                    .max(Duration::from_millis(10));
                let mut ticker = tokio::time::interval(interval);
                ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
                loop {
                    ticker.tick().await;
                    if collector.closed.load(Ordering::SeqCst) {
                        break;
                    }
                    if collector.config.enable_trend_analysis {
                        collector.analyze_trends();
                    }
                    if collector.config.enable_correlation_analysis {
                        collector.analyze_correlations();
                    }
                }
            }));
        }
    }

    /// Drop series points past the retention window
    pub fn enforce_retention(&self) {
        let now = Utc::now();
        let mut removed = 0;
        let mut series = self.series.write();
        for s in series.values_mut() {
            removed += s.enforce_retention(now);
        }
        if removed > 0 {
            log::debug!("retention cleanup removed {removed} points");
        }
    }

    /// Recompute trends over every series window
    pub fn analyze_trends(&self) {
        let windows: Vec<(String, Vec<f64>)> = {
            let series = self.series.read();
            series
                .iter()
                .map(|(name, s)| (name.clone(), s.recent_values(64)))
                .collect()
        };

        let mut trends = self.trends.write();
        for (name, values) in windows {
            if let Some(result) = detect_trend(&name, &values, 0.01) {
                trends.insert(name, result);
            }
        }
    }

    /// Recompute pairwise correlations over the tracked series
    pub fn analyze_correlations(&self) {
        let windows: Vec<(String, Vec<f64>)> = {
            let series = self.series.read();
            series
                .iter()
                .map(|(name, s)| (name.clone(), s.recent_values(64)))
                .collect()
        };

        let mut results = Vec::new();
        for i in 0..windows.len() {
            for j in (i + 1)..windows.len() {
                let (name_a, a) = &windows[i];
                let (name_b, b) = &windows[j];
                if let Some(result) = correlate(name_a, a, name_b, b) {
                    if result.coefficient.abs() >= 0.7 {
                        results.push(result);
                    }
                }
            }
        }
        *self.correlations.write() = results;
    }

    /// Stop the loops and flush what remains
    pub async fn shutdown(&self) {
        self.closed.store(true, Ordering::SeqCst);
        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
        self.flush().await;
    }
}

fn point_from(metric: &Metric) -> MetricPoint {
    MetricPoint {
        timestamp: metric.timestamp,
        value: metric.value,
        tags: metric.tags.clone(),
        quality: metric.quality,
        interpolated: false,
    }
}
