//! Anomaly, trend, and correlation analysis.
//!
//! The default anomaly detector is a z-score over the series statistics.
//! Trend detection fits a least-squares line over a recent window;
//! correlation is pairwise Pearson over aligned recent values. All three
//! are monitoring aids, not SLO sources of truth.

use crate::metrics::metric::Metric;
use crate::metrics::series::SeriesStatistics;

/// Pluggable anomaly detection over incoming measurements
pub trait AnomalyDetector: Send + Sync {
    /// Returns `(is_anomaly, score)`; higher scores are more anomalous
    fn check(&self, metric: &Metric, stats: Option<&SeriesStatistics>) -> (bool, f64);

    /// Detector name for logs
    fn name(&self) -> &str;
}

/// Flags values more than `threshold` standard deviations from the mean
pub struct ZScoreDetector {
    /// Z-score above which a value is anomalous
    pub threshold: f64,

    /// Minimum series size before the detector speaks up
    pub min_samples: usize,
}

impl Default for ZScoreDetector {
    fn default() -> Self {
        Self {
            threshold: 3.0,
            min_samples: 10,
        }
    }
}

impl AnomalyDetector for ZScoreDetector {
    fn check(&self, metric: &Metric, stats: Option<&SeriesStatistics>) -> (bool, f64) {
        let Some(stats) = stats else {
            return (false, 0.0);
        };
        if stats.count < self.min_samples || stats.stddev <= f64::EPSILON {
            return (false, 0.0);
        }
        let z = (metric.value - stats.mean).abs() / stats.stddev;
        (z > self.threshold, z)
    }

    fn name(&self) -> &str {
        "zscore"
    }
}

/// Direction of a detected trend
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrendDirection {
    Rising,
    Falling,
    Flat,
}

/// Result of a trend analysis over one series window
#[derive(Debug, Clone)]
pub struct TrendResult {
    /// Metric name
    pub metric_name: String,

    /// Trend direction
    pub direction: TrendDirection,

    /// Least-squares slope per sample step
    pub slope: f64,

    /// Window size the fit used
    pub window: usize,
}

/// Fit a least-squares line over the values (index as x) and classify
/// the slope against `flat_epsilon`.
pub fn detect_trend(metric_name: &str, values: &[f64], flat_epsilon: f64) -> Option<TrendResult> {
    let n = values.len();
    if n < 3 {
        return None;
    }

    let nf = n as f64;
    let mean_x = (nf - 1.0) / 2.0;
    let mean_y = values.iter().sum::<f64>() / nf;

    let mut numerator = 0.0;
    let mut denominator = 0.0;
    for (i, &y) in values.iter().enumerate() {
        let dx = i as f64 - mean_x;
        numerator += dx * (y - mean_y);
        denominator += dx * dx;
    }
    if denominator <= f64::EPSILON {
        return None;
    }

    let slope = numerator / denominator;
    let direction = if slope > flat_epsilon {
        TrendDirection::Rising
    } else if slope < -flat_epsilon {
        TrendDirection::Falling
    } else {
        TrendDirection::Flat
    };

    Some(TrendResult {
        metric_name: metric_name.to_string(),
        direction,
        slope,
        window: n,
    })
}

/// Result of a pairwise correlation analysis
#[derive(Debug, Clone)]
pub struct CorrelationResult {
    /// First metric
    pub metric_a: String,

    /// Second metric
    pub metric_b: String,

    /// Pearson coefficient in `[-1, 1]`
    pub coefficient: f64,

    /// Samples the coefficient was computed over
    pub samples: usize,
}

/// Pearson correlation over two aligned windows.
///
/// The shorter window truncates the longer one from the front so the
/// most recent samples align.
pub fn correlate(metric_a: &str, a: &[f64], metric_b: &str, b: &[f64]) -> Option<CorrelationResult> {
    let n = a.len().min(b.len());
    if n < 3 {
        return None;
    }
    let a = &a[a.len() - n..];
    let b = &b[b.len() - n..];

    let nf = n as f64;
    let mean_a = a.iter().sum::<f64>() / nf;
    let mean_b = b.iter().sum::<f64>() / nf;

    let mut cov = 0.0;
    let mut var_a = 0.0;
    let mut var_b = 0.0;
    for i in 0..n {
        let da = a[i] - mean_a;
        let db = b[i] - mean_b;
        cov += da * db;
        var_a += da * da;
        var_b += db * db;
    }
    if var_a <= f64::EPSILON || var_b <= f64::EPSILON {
        return None;
    }

    Some(CorrelationResult {
        metric_a: metric_a.to_string(),
        metric_b: metric_b.to_string(),
        coefficient: cov / (var_a.sqrt() * var_b.sqrt()),
        samples: n,
    })
}
