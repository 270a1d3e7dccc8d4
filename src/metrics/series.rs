//! Bounded time series with full per-series statistics.
//!
//! Points append under a single writer; out-of-order timestamps are
//! accepted but never reordered. Statistics recompute on every insertion,
//! which stays cheap because the ring is bounded.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};

/// One observation in a series
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricPoint {
    /// Observation time
    pub timestamp: DateTime<Utc>,

    /// Observed value
    pub value: f64,

    /// Tags carried from the metric
    pub tags: HashMap<String, String>,

    /// Sample quality in `[0, 1]`
    pub quality: f64,

    /// Whether the point was synthesized rather than measured
    pub interpolated: bool,
}

/// Statistics over the points currently held by a series
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SeriesStatistics {
    pub count: usize,
    pub sum: f64,
    pub mean: f64,
    pub median: f64,
    pub min: f64,
    pub max: f64,
    pub variance: f64,
    pub stddev: f64,
    pub p50: f64,
    pub p90: f64,
    pub p95: f64,
    pub p99: f64,
    pub p999: f64,
    pub skewness: f64,
    pub kurtosis: f64,
}

/// A bounded, retention-limited sequence of points for one metric
#[derive(Debug, Clone)]
pub struct MetricSeries {
    /// Metric name
    pub name: String,

    points: VecDeque<MetricPoint>,
    max_length: usize,
    retention: ChronoDuration,
    statistics: SeriesStatistics,
}

impl MetricSeries {
    /// Create an empty series
    pub fn new(name: impl Into<String>, max_length: usize, retention: ChronoDuration) -> Self {
        Self {
            name: name.into(),
            points: VecDeque::new(),
            max_length: max_length.max(1),
            retention,
            statistics: SeriesStatistics::default(),
        }
    }

    /// Append a point, enforcing the length bound, then recompute
    /// statistics. The retention window is enforced separately by the
    /// collector's cleanup loop.
    pub fn push(&mut self, point: MetricPoint) {
        while self.points.len() >= self.max_length {
            self.points.pop_front();
        }
        self.points.push_back(point);
        self.statistics = compute_statistics(&self.points);
    }

    /// Drop points older than the retention window; returns removed count
    pub fn enforce_retention(&mut self, now: DateTime<Utc>) -> usize {
        let cutoff = now - self.retention;
        let before = self.points.len();
        while matches!(self.points.front(), Some(p) if p.timestamp < cutoff) {
            self.points.pop_front();
        }
        let removed = before - self.points.len();
        if removed > 0 {
            self.statistics = compute_statistics(&self.points);
        }
        removed
    }

    /// Points currently held, oldest first
    pub fn points(&self) -> impl Iterator<Item = &MetricPoint> {
        self.points.iter()
    }

    /// Number of points currently held
    pub fn len(&self) -> usize {
        self.points.len()
    }

    /// Whether the series holds no points
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Current statistics snapshot
    pub fn statistics(&self) -> &SeriesStatistics {
        &self.statistics
    }

    /// The most recent `n` values, oldest first
    pub fn recent_values(&self, n: usize) -> Vec<f64> {
        let skip = self.points.len().saturating_sub(n);
        self.points.iter().skip(skip).map(|p| p.value).collect()
    }
}

fn compute_statistics(points: &VecDeque<MetricPoint>) -> SeriesStatistics {
    let count = points.len();
    if count == 0 {
        return SeriesStatistics::default();
    }

    let values: Vec<f64> = points.iter().map(|p| p.value).collect();
    let sum: f64 = values.iter().sum();
    let mean = sum / count as f64;

    let mut min = f64::INFINITY;
    let mut max = f64::NEG_INFINITY;
    let mut m2 = 0.0;
    let mut m3 = 0.0;
    let mut m4 = 0.0;
    for &v in &values {
        min = min.min(v);
        max = max.max(v);
        let d = v - mean;
        m2 += d * d;
        m3 += d * d * d;
        m4 += d * d * d * d;
    }

    let variance = m2 / count as f64;
    let stddev = variance.sqrt();

    let (skewness, kurtosis) = if stddev > f64::EPSILON {
        let n = count as f64;
        (
            (m3 / n) / stddev.powi(3),
            (m4 / n) / variance.powi(2) - 3.0,
        )
    } else {
        (0.0, 0.0)
    };

    let mut sorted = values;
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let percentile = |q: f64| -> f64 {
        let rank = ((q * sorted.len() as f64).ceil() as usize).clamp(1, sorted.len());
        sorted[rank - 1]
    };

    SeriesStatistics {
        count,
        sum,
        mean,
        median: percentile(0.5),
        min,
        max,
        variance,
        stddev,
        p50: percentile(0.5),
        p90: percentile(0.9),
        p95: percentile(0.95),
        p99: percentile(0.99),
        p999: percentile(0.999),
        skewness,
        kurtosis,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn point(value: f64) -> MetricPoint {
        MetricPoint {
            timestamp: Utc::now(),
            value,
            tags: HashMap::new(),
            quality: 1.0,
            interpolated: false,
        }
    }

    #[test]
    fn test_mean_matches_sum_over_count() {
        let mut series = MetricSeries::new("m", 100, ChronoDuration::hours(1));
        for v in [1.0, 2.0, 3.0, 4.0] {
            series.push(point(v));
            let stats = series.statistics();
            let expected = stats.sum / stats.count as f64;
            assert!((stats.mean - expected).abs() < f64::EPSILON);
        }
        assert_eq!(series.statistics().count, 4);
        assert!((series.statistics().mean - 2.5).abs() < 1e-12);
    }

    #[test]
    fn test_ring_is_bounded() {
        let mut series = MetricSeries::new("m", 5, ChronoDuration::hours(1));
        for v in 0..20 {
            series.push(point(v as f64));
        }
        assert_eq!(series.len(), 5);
        // Oldest points dropped; the newest survive.
        assert_eq!(series.statistics().min, 15.0);
        assert_eq!(series.statistics().max, 19.0);
    }

    #[test]
    fn test_percentiles_and_median() {
        let mut series = MetricSeries::new("m", 1000, ChronoDuration::hours(1));
        for v in 1..=100 {
            series.push(point(v as f64));
        }
        let stats = series.statistics();
        assert_eq!(stats.median, 50.0);
        assert_eq!(stats.p90, 90.0);
        assert_eq!(stats.p99, 99.0);
        assert_eq!(stats.p999, 100.0);
    }

    #[test]
    fn test_symmetric_data_has_no_skew() {
        let mut series = MetricSeries::new("m", 100, ChronoDuration::hours(1));
        for v in [1.0, 2.0, 3.0, 4.0, 5.0] {
            series.push(point(v));
        }
        assert!(series.statistics().skewness.abs() < 1e-9);
    }

    #[test]
    fn test_constant_series_degenerate_moments() {
        let mut series = MetricSeries::new("m", 100, ChronoDuration::hours(1));
        for _ in 0..10 {
            series.push(point(7.0));
        }
        let stats = series.statistics();
        assert_eq!(stats.stddev, 0.0);
        assert_eq!(stats.skewness, 0.0);
        assert_eq!(stats.kurtosis, 0.0);
    }

    #[test]
    fn test_retention_enforcement() {
        let mut series = MetricSeries::new("m", 100, ChronoDuration::seconds(60));
        let mut old = point(1.0);
        old.timestamp = Utc::now() - ChronoDuration::seconds(120);
        series.push(old);
        series.push(point(2.0));

        let removed = series.enforce_retention(Utc::now());
        assert_eq!(removed, 1);
        assert_eq!(series.len(), 1);
        assert_eq!(series.statistics().mean, 2.0);
    }

    #[test]
    fn test_out_of_order_points_not_reordered() {
        let mut series = MetricSeries::new("m", 100, ChronoDuration::hours(1));
        let now = Utc::now();
        let mut late = point(1.0);
        late.timestamp = now;
        let mut early = point(2.0);
        early.timestamp = now - ChronoDuration::seconds(30);

        series.push(late);
        series.push(early);

        let order: Vec<f64> = series.points().map(|p| p.value).collect();
        assert_eq!(order, vec![1.0, 2.0]);
    }
}
