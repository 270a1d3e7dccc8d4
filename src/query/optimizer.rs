//! Plan synthesis, the plan cache, and statistics feedback.

use crate::query::plan::{QueryPlan, QueryStep, QueryType};
use dashmap::DashMap;
use parking_lot::RwLock;
use regex::Regex;
use std::collections::hash_map::DefaultHasher;
use std::collections::{HashMap, VecDeque};
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Optimizer configuration
#[derive(Debug, Clone)]
pub struct OptimizerConfig {
    /// Serve repeated queries from the plan cache
    pub enable_plan_caching: bool,

    /// Plan cache capacity; the least recently used plan is evicted
    pub max_cached_plans: usize,

    /// Hard ceiling rules may raise step parallelism to
    pub parallelism_threshold: u32,

    /// Record per-query execution statistics
    pub enable_statistics: bool,

    /// Latency samples kept per query for percentile estimates
    pub latency_history: usize,

    /// Result-cache TTL applied when a rule enables caching
    pub result_cache_ttl: Duration,

    /// Mean latency above this flags a query in suggestions
    pub high_latency_threshold: Duration,

    /// Success rate below this flags a query in suggestions
    pub low_success_threshold: f64,

    /// Execution count above which an uncached query is flagged
    pub heavy_use_threshold: u64,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            enable_plan_caching: true,
            max_cached_plans: 10_000,
            parallelism_threshold: 8,
            enable_statistics: true,
            latency_history: 1000,
            result_cache_ttl: Duration::from_secs(300),
            high_latency_threshold: Duration::from_secs(5),
            low_success_threshold: 0.9,
            heavy_use_threshold: 100,
        }
    }
}

/// What a matched rule does to a plan
#[derive(Debug, Clone)]
pub enum RuleAction {
    /// Give the plan a result-cache key and TTL
    EnableCache,

    /// Raise step parallelism (capped at the config threshold)
    RaiseParallelism(u32),

    /// Append an index hint
    AddIndexHint(String),

    /// Mark root steps for fast-mode preprocessing
    FastPath,
}

/// A pattern-matched plan rewrite
#[derive(Debug, Clone)]
pub struct OptimizationRule {
    /// Rule name, recorded as the plan's optimization tag
    pub name: String,

    /// Applied when this matches the query text
    pub pattern: Regex,

    /// The rewrite to apply
    pub action: RuleAction,

    /// Disabled rules are skipped
    pub enabled: bool,
}

/// Per-query execution statistics
#[derive(Debug, Clone, Default)]
pub struct QueryStatistics {
    pub executions: u64,
    pub successes: u64,
    pub failures: u64,
    pub cache_hits: u64,
    pub min_latency: Option<Duration>,
    pub max_latency: Option<Duration>,
    total_latency_us: u64,

    /// Bounded latency ring for percentile estimates.
    /// Biased for skewed distributions; monitoring only.
    samples: VecDeque<Duration>,

    /// Error text (first 80 chars) -> occurrences
    pub error_patterns: HashMap<String, u32>,
}

impl QueryStatistics {
    fn record(&mut self, duration: Duration, success: bool, error: Option<&str>, history: usize) {
        self.executions += 1;
        if success {
            self.successes += 1;
        } else {
            self.failures += 1;
            if let Some(error) = error {
                let pattern: String = error.chars().take(80).collect();
                *self.error_patterns.entry(pattern).or_insert(0) += 1;
            }
        }

        self.total_latency_us += duration.as_micros() as u64;
        self.min_latency = Some(self.min_latency.map_or(duration, |m| m.min(duration)));
        self.max_latency = Some(self.max_latency.map_or(duration, |m| m.max(duration)));

        if self.samples.len() >= history.max(1) {
            self.samples.pop_front();
        }
        self.samples.push_back(duration);
    }

    /// Mean latency across all executions
    pub fn avg_latency(&self) -> Duration {
        if self.executions == 0 {
            Duration::ZERO
        } else {
            Duration::from_micros(self.total_latency_us / self.executions)
        }
    }

    /// successes / executions; 1.0 before any executions
    pub fn success_rate(&self) -> f64 {
        if self.executions == 0 {
            1.0
        } else {
            self.successes as f64 / self.executions as f64
        }
    }

    /// Latency percentile from the bounded sample ring
    pub fn percentile(&self, q: f64) -> Duration {
        if self.samples.is_empty() {
            return Duration::ZERO;
        }
        let mut sorted: Vec<Duration> = self.samples.iter().copied().collect();
        sorted.sort();
        let rank = ((q * sorted.len() as f64).ceil() as usize).clamp(1, sorted.len());
        sorted[rank - 1]
    }

    /// 95th percentile latency
    pub fn p95(&self) -> Duration {
        self.percentile(0.95)
    }

    /// 99th percentile latency
    pub fn p99(&self) -> Duration {
        self.percentile(0.99)
    }
}

/// A tuning suggestion derived from statistics
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Suggestion {
    /// Mean latency exceeds the threshold
    HighLatency { query_hash: u64, avg: Duration },

    /// Success rate fell below the threshold
    LowSuccessRate { query_hash: u64, rate_pct: u32 },

    /// Heavily executed but never served from cache
    UncachedHeavyUse { query_hash: u64, executions: u64 },
}

/// Plan cache and optimizer
pub struct QueryOptimizer {
    config: OptimizerConfig,
    rules: RwLock<Vec<OptimizationRule>>,
    plans: DashMap<u64, QueryPlan>,
    stats: DashMap<u64, QueryStatistics>,
    plan_cache_hits: AtomicU64,
    plan_cache_misses: AtomicU64,
}

impl QueryOptimizer {
    /// Create an optimizer with the default rule set
    pub fn new(config: OptimizerConfig) -> Self {
        Self {
            config,
            rules: RwLock::new(default_rules()),
            plans: DashMap::new(),
            stats: DashMap::new(),
            plan_cache_hits: AtomicU64::new(0),
            plan_cache_misses: AtomicU64::new(0),
        }
    }

    /// Replace the rule set
    pub fn set_rules(&self, rules: Vec<OptimizationRule>) {
        *self.rules.write() = rules;
    }

    /// Produce a plan for the query, serving repeats from the cache.
    ///
    /// A cache hit bumps the plan's usage count and freshness.
    pub fn optimize(&self, query: &str, query_type: QueryType) -> QueryPlan {
        let query_hash = hash_query(query);

        if self.config.enable_plan_caching {
            if let Some(mut cached) = self.plans.get_mut(&query_hash) {
                cached.usage_count += 1;
                cached.last_used = chrono::Utc::now();
                self.plan_cache_hits.fetch_add(1, Ordering::Relaxed);
                self.stats.entry(query_hash).or_default().cache_hits += 1;
                return cached.clone();
            }
        }
        self.plan_cache_misses.fetch_add(1, Ordering::Relaxed);

        let mut plan = synthesize(query_hash, query_type);
        self.apply_rules(query, &mut plan);

        if self.config.enable_plan_caching {
            if self.plans.len() >= self.config.max_cached_plans {
                self.evict_least_recently_used();
            }
            self.plans.insert(query_hash, plan.clone());
        }
        plan
    }

    /// Fold an execution outcome into the per-query statistics and the
    /// cached plan's feedback fields
    pub fn record_execution(
        &self,
        query_hash: u64,
        duration: Duration,
        success: bool,
        error: Option<&str>,
    ) {
        if !self.config.enable_statistics {
            return;
        }

        self.stats.entry(query_hash).or_default().record(
            duration,
            success,
            error,
            self.config.latency_history,
        );

        if let Some(mut plan) = self.plans.get_mut(&query_hash) {
            plan.record_feedback(duration, success);
        }
    }

    /// Statistics for one query
    pub fn statistics(&self, query_hash: u64) -> Option<QueryStatistics> {
        self.stats.get(&query_hash).map(|s| s.clone())
    }

    /// Cached plan count
    pub fn cached_plans(&self) -> usize {
        self.plans.len()
    }

    /// Plan-cache hit and miss counters
    pub fn cache_counters(&self) -> (u64, u64) {
        (
            self.plan_cache_hits.load(Ordering::Relaxed),
            self.plan_cache_misses.load(Ordering::Relaxed),
        )
    }

    /// Derive tuning suggestions from the accumulated statistics
    pub fn suggestions(&self) -> Vec<Suggestion> {
        let mut suggestions = Vec::new();

        for entry in self.stats.iter() {
            let (hash, stats) = (*entry.key(), entry.value());

            let avg = stats.avg_latency();
            if avg > self.config.high_latency_threshold {
                suggestions.push(Suggestion::HighLatency {
                    query_hash: hash,
                    avg,
                });
            }

            if stats.executions > 0 && stats.success_rate() < self.config.low_success_threshold {
                suggestions.push(Suggestion::LowSuccessRate {
                    query_hash: hash,
                    rate_pct: (stats.success_rate() * 100.0) as u32,
                });
            }

            if stats.executions > self.config.heavy_use_threshold && stats.cache_hits == 0 {
                suggestions.push(Suggestion::UncachedHeavyUse {
                    query_hash: hash,
                    executions: stats.executions,
                });
            }
        }

        suggestions
    }

    /// Drop every cached plan
    pub fn clear_plans(&self) {
        self.plans.clear();
    }

    fn apply_rules(&self, query: &str, plan: &mut QueryPlan) {
        let rules = self.rules.read();
        for rule in rules.iter().filter(|r| r.enabled) {
            if !rule.pattern.is_match(query) {
                continue;
            }
            match &rule.action {
                RuleAction::EnableCache => {
                    plan.cache_key = Some(format!("query:{}", plan.query_hash));
                    plan.cache_ttl = self.config.result_cache_ttl;
                }
                RuleAction::RaiseParallelism(target) => {
                    let capped = (*target).min(self.config.parallelism_threshold);
                    for step in &mut plan.steps {
                        step.parallelism = step.parallelism.max(capped);
                    }
                }
                RuleAction::AddIndexHint(hint) => {
                    if !plan.index_hints.contains(hint) {
                        plan.index_hints.push(hint.clone());
                    }
                }
                RuleAction::FastPath => {
                    for step in &mut plan.steps {
                        if step.depends_on.is_empty() {
                            step.parameters
                                .insert("fast_mode".to_string(), serde_json::Value::Bool(true));
                        }
                    }
                }
            }
            plan.optimization_tag = Some(rule.name.clone());
        }
    }

    fn evict_least_recently_used(&self) {
        let oldest = self
            .plans
            .iter()
            .min_by_key(|entry| entry.value().last_used)
            .map(|entry| *entry.key());
        if let Some(hash) = oldest {
            self.plans.remove(&hash);
        }
    }
}

impl Default for QueryOptimizer {
    fn default() -> Self {
        Self::new(OptimizerConfig::default())
    }
}

/// Hash query text for plan-cache keys
pub fn hash_query(query: &str) -> u64 {
    let mut hasher = DefaultHasher::new();
    query.hash(&mut hasher);
    hasher.finish()
}

/// Synthesize the step DAG for a query shape
fn synthesize(query_hash: u64, query_type: QueryType) -> QueryPlan {
    let steps = match query_type {
        QueryType::Vector => vec![
            QueryStep::new("embed", "embed_query", 2.0),
            QueryStep::new("search", "vector_search", 5.0)
                .depends_on("embed")
                .with_parallelism(2),
            QueryStep::new("rank", "rank_results", 1.0).depends_on("search"),
        ],
        QueryType::Text => vec![
            QueryStep::new("tokenize", "tokenize", 0.5),
            QueryStep::new("search", "text_search", 4.0).depends_on("tokenize"),
            QueryStep::new("score", "score_results", 1.0).depends_on("search"),
        ],
        QueryType::Filter => vec![
            QueryStep::new("parse", "parse_filters", 0.5),
            QueryStep::new("apply", "apply_filters", 2.0).depends_on("parse"),
        ],
        QueryType::Aggregation => vec![
            QueryStep::new("scan", "scan", 6.0).with_parallelism(2),
            QueryStep::new("aggregate", "aggregate", 3.0)
                .depends_on("scan")
                .with_parallelism(2),
            QueryStep::new("finalize", "finalize", 0.5).depends_on("aggregate"),
        ],
        QueryType::Join => vec![
            QueryStep::new("left", "fetch_left", 4.0),
            QueryStep::new("right", "fetch_right", 4.0),
            QueryStep::new("join", "hash_join", 5.0)
                .depends_on("left")
                .depends_on("right"),
        ],
        QueryType::Hybrid => vec![
            QueryStep::new("embed", "embed_query", 2.0),
            QueryStep::new("vector", "vector_search", 5.0)
                .depends_on("embed")
                .with_parallelism(2),
            QueryStep::new("text", "text_search", 4.0).with_parallelism(2),
            QueryStep::new("merge", "merge_results", 1.5)
                .depends_on("vector")
                .depends_on("text"),
        ],
        QueryType::Generic => vec![QueryStep::new("execute", "execute", 3.0)],
    };

    let mut plan = QueryPlan::new(query_hash, query_type, steps);
    // Search-shaped outputs are natural tier-cache residents.
    for step in &mut plan.steps {
        if step.step_type.ends_with("_search") {
            step.cache_affinity = true;
        }
    }
    plan
}

/// The built-in rule set
fn default_rules() -> Vec<OptimizationRule> {
    let rule = |name: &str, pattern: &str, action: RuleAction| OptimizationRule {
        name: name.to_string(),
        pattern: Regex::new(pattern).expect("built-in rule pattern"),
        action,
        enabled: true,
    };

    vec![
        rule(
            "vector-index",
            r"(?i)\b(embedding|vector|similar|nearest)\b",
            RuleAction::AddIndexHint("vector_index".to_string()),
        ),
        rule(
            "cache-reads",
            r"(?i)^\s*(select|get|fetch|search)\b",
            RuleAction::EnableCache,
        ),
        rule(
            "parallel-aggregates",
            r"(?i)\b(count|sum|avg|group by|aggregate)\b",
            RuleAction::RaiseParallelism(4),
        ),
        rule(
            "fast-id-lookup",
            r"(?i)\bid\s*[:=]\s*\S+",
            RuleAction::FastPath,
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plan_cache_reuse() {
        let optimizer = QueryOptimizer::default();
        let query = "search chunks where session = s1";

        let first = optimizer.optimize(query, QueryType::Text);
        let second = optimizer.optimize(query, QueryType::Text);

        assert_eq!(first.query_hash, second.query_hash);
        assert_eq!(second.usage_count, first.usage_count + 1);

        let (hits, misses) = optimizer.cache_counters();
        assert_eq!(hits, 1);
        assert_eq!(misses, 1);
    }

    #[test]
    fn test_rules_rewrite_plans() {
        let optimizer = QueryOptimizer::default();

        let plan = optimizer.optimize("select nearest vector neighbors", QueryType::Vector);
        assert!(plan.index_hints.contains(&"vector_index".to_string()));
        assert!(plan.cache_key.is_some());
        assert!(plan.optimization_tag.is_some());

        let plan = optimizer.optimize("aggregate count by repository", QueryType::Aggregation);
        assert!(plan.steps.iter().all(|s| s.parallelism >= 2));
    }

    #[test]
    fn test_parallelism_capped_at_threshold() {
        let optimizer = QueryOptimizer::new(OptimizerConfig {
            parallelism_threshold: 3,
            ..Default::default()
        });
        optimizer.set_rules(vec![OptimizationRule {
            name: "wide".to_string(),
            pattern: Regex::new(".*").unwrap(),
            action: RuleAction::RaiseParallelism(64),
            enabled: true,
        }]);

        let plan = optimizer.optimize("anything", QueryType::Generic);
        assert!(plan.steps.iter().all(|s| s.parallelism <= 3));
    }

    #[test]
    fn test_statistics_and_percentiles() {
        let optimizer = QueryOptimizer::default();
        let hash = hash_query("q");

        for i in 1..=100u64 {
            optimizer.record_execution(hash, Duration::from_millis(i), true, None);
        }

        let stats = optimizer.statistics(hash).unwrap();
        assert_eq!(stats.executions, 100);
        assert_eq!(stats.min_latency, Some(Duration::from_millis(1)));
        assert_eq!(stats.max_latency, Some(Duration::from_millis(100)));
        assert_eq!(stats.p95(), Duration::from_millis(95));
        assert_eq!(stats.p99(), Duration::from_millis(99));
        assert!((stats.success_rate() - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_latency_ring_is_bounded() {
        let optimizer = QueryOptimizer::new(OptimizerConfig {
            latency_history: 10,
            ..Default::default()
        });
        let hash = hash_query("bounded");
        for i in 0..50u64 {
            optimizer.record_execution(hash, Duration::from_millis(i), true, None);
        }
        let stats = optimizer.statistics(hash).unwrap();
        assert_eq!(stats.samples.len(), 10);
    }

    #[test]
    fn test_error_patterns_recorded() {
        let optimizer = QueryOptimizer::default();
        let hash = hash_query("failing");
        optimizer.record_execution(hash, Duration::from_millis(5), false, Some("index missing"));
        optimizer.record_execution(hash, Duration::from_millis(5), false, Some("index missing"));

        let stats = optimizer.statistics(hash).unwrap();
        assert_eq!(stats.error_patterns["index missing"], 2);
    }

    #[test]
    fn test_suggestions() {
        let optimizer = QueryOptimizer::new(OptimizerConfig {
            heavy_use_threshold: 5,
            ..Default::default()
        });

        // Slow query.
        let slow = hash_query("slow");
        optimizer.record_execution(slow, Duration::from_secs(10), true, None);

        // Failing query.
        let failing = hash_query("failing");
        for _ in 0..10 {
            optimizer.record_execution(failing, Duration::from_millis(1), false, Some("boom"));
        }

        // Heavily used, never cached.
        let heavy = hash_query("heavy");
        for _ in 0..10 {
            optimizer.record_execution(heavy, Duration::from_millis(1), true, None);
        }

        let suggestions = optimizer.suggestions();
        assert!(suggestions
            .iter()
            .any(|s| matches!(s, Suggestion::HighLatency { query_hash, .. } if *query_hash == slow)));
        assert!(suggestions
            .iter()
            .any(|s| matches!(s, Suggestion::LowSuccessRate { query_hash, .. } if *query_hash == failing)));
        assert!(suggestions
            .iter()
            .any(|s| matches!(s, Suggestion::UncachedHeavyUse { query_hash, .. } if *query_hash == heavy)));
    }

    #[test]
    fn test_plan_cache_eviction() {
        let optimizer = QueryOptimizer::new(OptimizerConfig {
            max_cached_plans: 3,
            ..Default::default()
        });

        for i in 0..10 {
            optimizer.optimize(&format!("query {i}"), QueryType::Generic);
        }
        assert!(optimizer.cached_plans() <= 3);
    }

    #[test]
    fn test_all_plan_shapes_are_valid_dags() {
        let optimizer = QueryOptimizer::default();
        for query_type in [
            QueryType::Vector,
            QueryType::Text,
            QueryType::Filter,
            QueryType::Aggregation,
            QueryType::Join,
            QueryType::Hybrid,
            QueryType::Generic,
        ] {
            let plan = optimizer.optimize(&format!("shape {query_type:?}"), query_type);
            assert!(plan.execution_order().is_ok());
        }
    }
}
