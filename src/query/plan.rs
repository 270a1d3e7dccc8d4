//! Query plans: step DAGs with topological execution order.

use crate::query::{QueryError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::time::Duration;
use uuid::Uuid;

/// Query shapes the optimizer knows how to plan
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryType {
    Vector,
    Text,
    Filter,
    Aggregation,
    Join,
    Hybrid,
    Generic,
}

/// One step of an execution plan
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryStep {
    /// Step id, unique inside the plan
    pub id: String,

    /// What the step does (engine routing key)
    pub step_type: String,

    /// Relative cost estimate; ties in execution order break ascending
    pub estimated_cost: f64,

    /// Worker parallelism for the step
    pub parallelism: u32,

    /// Step parameters
    pub parameters: HashMap<String, serde_json::Value>,

    /// Ids of steps that must complete first
    pub depends_on: Vec<String>,

    /// Whether the step's output is worth tier caching
    pub cache_affinity: bool,
}

impl QueryStep {
    /// Create a step with no dependencies
    pub fn new(id: impl Into<String>, step_type: impl Into<String>, cost: f64) -> Self {
        Self {
            id: id.into(),
            step_type: step_type.into(),
            estimated_cost: cost,
            parallelism: 1,
            parameters: HashMap::new(),
            depends_on: Vec::new(),
            cache_affinity: false,
        }
    }

    /// Add a dependency edge
    pub fn depends_on(mut self, step_id: impl Into<String>) -> Self {
        self.depends_on.push(step_id.into());
        self
    }

    /// Set the parallelism
    pub fn with_parallelism(mut self, parallelism: u32) -> Self {
        self.parallelism = parallelism;
        self
    }
}

/// An optimized, cacheable execution plan
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryPlan {
    /// Plan id
    pub id: String,

    /// Content hash of the source query
    pub query_hash: u64,

    /// Query shape the plan was synthesized for
    pub query_type: QueryType,

    /// Steps forming a DAG through `depends_on`
    pub steps: Vec<QueryStep>,

    /// Sum of step costs after rule application
    pub estimated_cost: f64,

    /// Tier-cache key for the query's result, when caching is enabled
    pub cache_key: Option<String>,

    /// TTL for the cached result
    pub cache_ttl: Duration,

    /// Index hints accumulated from rules
    pub index_hints: Vec<String>,

    /// Times this plan was served from the plan cache
    pub usage_count: u64,

    /// Success ratio folded in from execution feedback
    pub success_rate: f64,

    /// Mean latency folded in from execution feedback
    pub avg_latency: Duration,

    /// Last time the plan was served
    pub last_used: DateTime<Utc>,

    /// Name of the last rule that rewrote the plan
    pub optimization_tag: Option<String>,
}

impl QueryPlan {
    /// Create a plan from synthesized steps
    pub fn new(query_hash: u64, query_type: QueryType, steps: Vec<QueryStep>) -> Self {
        let estimated_cost = steps.iter().map(|s| s.estimated_cost).sum();
        Self {
            id: Uuid::new_v4().to_string(),
            query_hash,
            query_type,
            steps,
            estimated_cost,
            cache_key: None,
            cache_ttl: Duration::from_secs(300),
            index_hints: Vec::new(),
            usage_count: 0,
            success_rate: 1.0,
            avg_latency: Duration::ZERO,
            last_used: Utc::now(),
            optimization_tag: None,
        }
    }

    /// Steps in execution order: a topological sort of the dependency
    /// DAG, breaking ties by ascending cost.
    ///
    /// Fails with [`QueryError::InvalidPlan`] on cycles or dangling
    /// dependency references.
    pub fn execution_order(&self) -> Result<Vec<&QueryStep>> {
        let by_id: HashMap<&str, &QueryStep> =
            self.steps.iter().map(|s| (s.id.as_str(), s)).collect();

        let mut in_degree: HashMap<&str, usize> = HashMap::new();
        let mut dependents: HashMap<&str, Vec<&str>> = HashMap::new();
        for step in &self.steps {
            in_degree.entry(step.id.as_str()).or_insert(0);
            for dep in &step.depends_on {
                if !by_id.contains_key(dep.as_str()) {
                    return Err(QueryError::InvalidPlan(format!(
                        "step {} depends on unknown step {dep}",
                        step.id
                    )));
                }
                *in_degree.entry(step.id.as_str()).or_insert(0) += 1;
                dependents.entry(dep.as_str()).or_default().push(step.id.as_str());
            }
        }

        // Ready steps ordered by cost ascending.
        let mut ready: Vec<&str> = in_degree
            .iter()
            .filter(|(_, d)| **d == 0)
            .map(|(id, _)| *id)
            .collect();
        sort_by_cost(&mut ready, &by_id);

        let mut queue: VecDeque<&str> = ready.into_iter().collect();
        let mut order = Vec::with_capacity(self.steps.len());

        while let Some(id) = queue.pop_front() {
            order.push(by_id[id]);
            let mut newly_ready = Vec::new();
            for dependent in dependents.get(id).into_iter().flatten() {
                let degree = in_degree.get_mut(dependent).unwrap();
                *degree -= 1;
                if *degree == 0 {
                    newly_ready.push(*dependent);
                }
            }
            sort_by_cost(&mut newly_ready, &by_id);
            queue.extend(newly_ready);
        }

        if order.len() != self.steps.len() {
            return Err(QueryError::InvalidPlan(
                "dependency cycle in plan steps".to_string(),
            ));
        }
        Ok(order)
    }

    /// Fold one execution outcome into the plan's feedback fields
    pub fn record_feedback(&mut self, duration: Duration, success: bool) {
        let previous = self.usage_count.max(1) as f64;
        let outcome = if success { 1.0 } else { 0.0 };
        self.success_rate = (self.success_rate * previous + outcome) / (previous + 1.0);

        let prev_us = self.avg_latency.as_micros() as f64;
        let avg_us = (prev_us * previous + duration.as_micros() as f64) / (previous + 1.0);
        self.avg_latency = Duration::from_micros(avg_us as u64);
    }
}

fn sort_by_cost(ids: &mut [&str], by_id: &HashMap<&str, &QueryStep>) {
    ids.sort_by(|a, b| {
        by_id[a]
            .estimated_cost
            .partial_cmp(&by_id[b].estimated_cost)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.cmp(b))
    });
}
