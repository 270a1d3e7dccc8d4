//! Metric measurement model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// Metric kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricKind {
    /// Monotonically increasing value
    Counter,
    /// Arbitrary value that can go up or down
    Gauge,
    /// Distribution sample
    Histogram,
    /// Duration sample in milliseconds
    Timer,
}

/// A single metric measurement
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Metric {
    /// Metric name
    pub name: String,

    /// Subsystem category (cache, memory, dispatcher, pool, query, ...)
    pub category: String,

    /// Metric kind
    pub kind: MetricKind,

    /// Measured value
    pub value: f64,

    /// Unit label (count, bytes, ms, ratio, ...)
    pub unit: String,

    /// When the measurement was taken
    pub timestamp: DateTime<Utc>,

    /// Tags for slicing (merged with the collector's defaults)
    pub tags: HashMap<String, String>,

    /// Exporter-facing labels
    pub labels: HashMap<String, String>,

    /// Free-form metadata
    pub metadata: HashMap<String, String>,

    /// Optional inline threshold for one-off alerting
    pub threshold: Option<f64>,

    /// Aggregation window the value describes, if any
    pub window: Option<Duration>,

    /// Samples behind the value (1 for point measurements)
    pub sample_count: u64,

    /// Sample quality in `[0, 1]`
    pub quality: f64,
}

impl Metric {
    fn base(name: impl Into<String>, kind: MetricKind, value: f64) -> Self {
        Self {
            name: name.into(),
            category: "custom".to_string(),
            kind,
            value,
            unit: String::new(),
            timestamp: Utc::now(),
            tags: HashMap::new(),
            labels: HashMap::new(),
            metadata: HashMap::new(),
            threshold: None,
            window: None,
            sample_count: 1,
            quality: 1.0,
        }
    }

    /// Create a counter measurement
    pub fn counter(name: impl Into<String>, value: f64) -> Self {
        let mut metric = Self::base(name, MetricKind::Counter, value);
        metric.unit = "count".to_string();
        metric
    }

    /// Create a gauge measurement
    pub fn gauge(name: impl Into<String>, value: f64) -> Self {
        Self::base(name, MetricKind::Gauge, value)
    }

    /// Create a timer measurement from a duration
    pub fn timer(name: impl Into<String>, duration: Duration) -> Self {
        let mut metric = Self::base(name, MetricKind::Timer, duration.as_secs_f64() * 1000.0);
        metric.unit = "ms".to_string();
        metric
    }

    /// Create a histogram sample
    pub fn histogram(name: impl Into<String>, value: f64) -> Self {
        Self::base(name, MetricKind::Histogram, value)
    }

    /// Set the category
    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = category.into();
        self
    }

    /// Set the unit label
    pub fn with_unit(mut self, unit: impl Into<String>) -> Self {
        self.unit = unit.into();
        self
    }

    /// Add a tag
    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    /// Add an exporter label
    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    /// Set an inline alert threshold
    pub fn with_threshold(mut self, threshold: f64) -> Self {
        self.threshold = Some(threshold);
        self
    }

    /// Set a custom timestamp
    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }
}
