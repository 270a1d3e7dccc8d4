//! Work item and result types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use uuid::Uuid;

/// Priority classes with fixed numeric weights
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkPriority {
    Low = 1,
    Normal = 5,
    High = 8,
    Critical = 10,
}

impl Default for WorkPriority {
    fn default() -> Self {
        WorkPriority::Normal
    }
}

/// A unit of deferred computation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkItem {
    /// Work id; filled at submit when empty
    pub id: String,

    /// Processor routing key
    pub work_type: String,

    /// Priority class
    pub priority: WorkPriority,

    /// Opaque payload handed to the processor
    pub payload: serde_json::Value,

    /// Stamped at submit
    pub created_at: DateTime<Utc>,

    /// Overall execution budget covering all retries; zero means the
    /// dispatcher default
    #[serde(with = "humantime_serde_compat")]
    pub timeout: Duration,

    /// Retries consumed so far
    pub retry_count: u32,

    /// Free-form metadata
    pub metadata: HashMap<String, String>,
}

impl WorkItem {
    /// Create a work item with defaults filled
    pub fn new(work_type: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            work_type: work_type.into(),
            priority: WorkPriority::Normal,
            payload,
            created_at: Utc::now(),
            timeout: Duration::ZERO,
            retry_count: 0,
            metadata: HashMap::new(),
        }
    }

    /// Set the priority class
    pub fn with_priority(mut self, priority: WorkPriority) -> Self {
        self.priority = priority;
        self
    }

    /// Set the overall execution budget
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Add a metadata entry
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// Outcome of a processed work item
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkResult {
    /// Id of the work item
    pub work_id: String,

    /// Routing key of the work item
    pub work_type: String,

    /// Whether execution ultimately succeeded
    pub success: bool,

    /// Processor output on success
    pub output: Option<serde_json::Value>,

    /// Wrapped error text on failure (includes attempt count)
    pub error: Option<String>,

    /// Attempts actually made (1 + retries)
    pub attempts: u32,

    /// Wall-clock execution time across all attempts
    #[serde(with = "humantime_serde_compat")]
    pub duration: Duration,

    /// When the result was produced
    pub completed_at: DateTime<Utc>,
}

/// Serde helper for `std::time::Duration` as integer milliseconds
mod humantime_serde_compat {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        (value.as_millis() as u64).serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(deserializer)?))
    }
}
