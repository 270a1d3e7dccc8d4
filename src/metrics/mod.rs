//! # Metrics Collection Engine
//!
//! Time-series collection with minimal overhead on the record path:
//! - Current-value map plus bounded per-metric series with full statistics
//! - Sampling, enrichment, and pluggable anomaly detection on record
//! - Alert rules with sustained-breach detection and cooldowns
//! - Buffered export to registered exporters, retention cleanup, and
//!   optional trend/correlation analysis loops
//!
//! Recording never fails; export errors increment counters and unhealthy
//! exporters are skipped.

use thiserror::Error;

/// Metrics subsystem error types
#[derive(Error, Debug)]
pub enum MetricsError {
    /// An exporter rejected a batch
    #[error("export failed: {0}")]
    Export(String),

    /// An alert rule failed validation
    #[error("invalid alert rule: {0}")]
    InvalidRule(String),
}

/// Result type for metrics operations
pub type Result<T> = std::result::Result<T, MetricsError>;

pub mod alerts;
pub mod analysis;
pub mod collector;
pub mod metric;
pub mod series;

pub use alerts::{Alert, AlertCondition, AlertEngine, AlertRule, AlertSeverity};
pub use analysis::{
    AnomalyDetector, CorrelationResult, TrendDirection, TrendResult, ZScoreDetector,
};
pub use collector::{
    CollectorStats, ExporterStats, LogExporter, MetricExporter, MetricsCollector, MetricsConfig,
};
pub use metric::{Metric, MetricKind};
pub use series::{MetricPoint, MetricSeries, SeriesStatistics};
