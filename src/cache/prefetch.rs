//! Access-pattern tracking and advisory prefetch analysis.
//!
//! Every full cache miss lands here. The tracker keeps a bounded table of
//! per-key patterns; a periodic analysis pass promotes keys whose
//! `frequency x confidence` crosses the configured threshold into the
//! candidate list. Candidates are advisory only: the manager exposes them
//! and executes nothing.

use lru::LruCache;
use parking_lot::{Mutex, RwLock};
use std::num::NonZeroUsize;
use std::time::Instant;

/// Bounded size of the pattern table
const PATTERN_TABLE_CAPACITY: usize = 4096;

/// Recorded access behavior for one key
#[derive(Debug, Clone)]
pub struct AccessPattern {
    /// The key that keeps missing
    pub key: String,

    /// Number of recorded accesses
    pub count: u64,

    /// First recorded access
    pub first_seen: Instant,

    /// Most recent access
    pub last_seen: Instant,

    mean_gap_secs: f64,
    gap_m2: f64,
}

impl AccessPattern {
    fn new(key: String, now: Instant) -> Self {
        Self {
            key,
            count: 1,
            first_seen: now,
            last_seen: now,
            mean_gap_secs: 0.0,
            gap_m2: 0.0,
        }
    }

    fn record(&mut self, now: Instant) {
        let gap = now.duration_since(self.last_seen).as_secs_f64();
        // Welford update over inter-access gaps.
        let gaps = self.count as f64; // gap n arrives with access n+1
        let delta = gap - self.mean_gap_secs;
        self.mean_gap_secs += delta / gaps;
        self.gap_m2 += delta * (gap - self.mean_gap_secs);

        self.count += 1;
        self.last_seen = now;
    }

    /// Accesses per minute since the pattern was first seen
    pub fn frequency(&self, now: Instant) -> f64 {
        let minutes = now.duration_since(self.first_seen).as_secs_f64() / 60.0;
        self.count as f64 / minutes.max(1.0 / 60.0)
    }

    /// Regularity of the access gaps in `[0, 1]`.
    ///
    /// A steady cadence scores near 1; erratic gaps push the coefficient
    /// of variation up and the confidence down. Too few samples score low.
    pub fn confidence(&self) -> f64 {
        if self.count < 3 {
            return self.count as f64 / 10.0;
        }
        let gaps = (self.count - 1) as f64;
        let variance = self.gap_m2 / gaps;
        let stddev = variance.max(0.0).sqrt();
        if self.mean_gap_secs <= f64::EPSILON {
            return 1.0;
        }
        1.0 / (1.0 + stddev / self.mean_gap_secs)
    }
}

/// A key worth fetching ahead of demand
#[derive(Debug, Clone)]
pub struct PrefetchCandidate {
    pub key: String,
    pub frequency: f64,
    pub confidence: f64,

    /// `frequency x confidence`
    pub score: f64,
}

/// Bounded pattern table with periodic candidate analysis
pub struct PrefetchTracker {
    patterns: Mutex<LruCache<String, AccessPattern>>,
    threshold: f64,
    candidates: RwLock<Vec<PrefetchCandidate>>,
}

impl PrefetchTracker {
    /// Create a tracker with the given `frequency x confidence` floor
    pub fn new(threshold: f64) -> Self {
        Self {
            patterns: Mutex::new(LruCache::new(
                NonZeroUsize::new(PATTERN_TABLE_CAPACITY).unwrap(),
            )),
            threshold,
            candidates: RwLock::new(Vec::new()),
        }
    }

    /// Record a miss for `key`
    pub fn record_access(&self, key: &str) {
        let now = Instant::now();
        let mut patterns = self.patterns.lock();
        match patterns.get_mut(key) {
            Some(pattern) => pattern.record(now),
            None => {
                patterns.put(key.to_string(), AccessPattern::new(key.to_string(), now));
            }
        }
    }

    /// Snapshot of one pattern
    pub fn pattern(&self, key: &str) -> Option<AccessPattern> {
        self.patterns.lock().peek(key).cloned()
    }

    /// Recompute the candidate list; returns how many keys qualified
    pub fn analyze(&self) -> usize {
        let now = Instant::now();
        let mut found: Vec<PrefetchCandidate> = {
            let patterns = self.patterns.lock();
            patterns
                .iter()
                .filter_map(|(key, pattern)| {
                    let frequency = pattern.frequency(now);
                    let confidence = pattern.confidence();
                    let score = frequency * confidence;
                    (score >= self.threshold).then(|| PrefetchCandidate {
                        key: key.clone(),
                        frequency,
                        confidence,
                        score,
                    })
                })
                .collect()
        };

        found.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        let count = found.len();
        *self.candidates.write() = found;
        count
    }

    /// Latest analysis result
    pub fn candidates(&self) -> Vec<PrefetchCandidate> {
        self.candidates.read().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pattern_records_accesses() {
        let tracker = PrefetchTracker::new(1000.0);
        tracker.record_access("k");
        tracker.record_access("k");
        tracker.record_access("k");

        let pattern = tracker.pattern("k").unwrap();
        assert_eq!(pattern.count, 3);
    }

    #[test]
    fn test_hot_key_becomes_candidate() {
        let tracker = PrefetchTracker::new(0.5);
        for _ in 0..20 {
            tracker.record_access("hot");
        }
        tracker.record_access("cold");

        let qualified = tracker.analyze();
        assert!(qualified >= 1);

        let candidates = tracker.candidates();
        assert_eq!(candidates[0].key, "hot");
        assert!(candidates[0].score >= 0.5);
    }

    #[test]
    fn test_threshold_filters_noise() {
        let tracker = PrefetchTracker::new(f64::MAX);
        for _ in 0..100 {
            tracker.record_access("busy");
        }
        assert_eq!(tracker.analyze(), 0);
        assert!(tracker.candidates().is_empty());
    }

    #[test]
    fn test_confidence_low_with_few_samples() {
        let tracker = PrefetchTracker::new(0.0);
        tracker.record_access("k");
        let pattern = tracker.pattern("k").unwrap();
        assert!(pattern.confidence() < 0.5);
    }
}
