//! # Query Plan Cache & Optimizer
//!
//! Synthesizes execution plans from `(query, type)` pairs, caches them
//! under the query's content hash, applies pattern-matched optimization
//! rules, and folds execution statistics back into tuning suggestions.

use thiserror::Error;

/// Query planning error types
#[derive(Error, Debug)]
pub enum QueryError {
    /// The step graph contains a dependency cycle or a dangling reference
    #[error("invalid plan: {0}")]
    InvalidPlan(String),

    /// No plan cached under the hash
    #[error("plan not found for hash {0}")]
    PlanNotFound(u64),
}

/// Result type for query planning operations
pub type Result<T> = std::result::Result<T, QueryError>;

pub mod optimizer;
pub mod plan;

pub use optimizer::{
    OptimizationRule, OptimizerConfig, QueryOptimizer, QueryStatistics, RuleAction, Suggestion,
};
pub use plan::{QueryPlan, QueryStep, QueryType};
