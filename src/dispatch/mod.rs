//! # Async Work Dispatcher
//!
//! Moves cost-bearing work (embedding, indexing, pattern detection) off
//! the request path:
//! - Bounded priority queue with FIFO order inside a priority class
//! - Fixed worker pool spawned at construction
//! - Bounded retries with typed retryability
//! - Lossy result channel with a blocking rendezvous for callers that
//!   must observe their result

use std::time::Duration;
use thiserror::Error;

/// Substring lexicon used to classify opaque error text as retryable.
/// Typed errors carry their own retryable bit; this is the fallback.
const RETRYABLE_PATTERNS: [&str; 4] =
    ["timeout", "connection refused", "temporary failure", "rate limit"];

/// Dispatcher and work-execution errors
#[derive(Error, Debug, Clone)]
pub enum WorkError {
    /// The queue is at capacity
    #[error("work queue is full")]
    QueueFull,

    /// Submit after shutdown began
    #[error("dispatcher is shutting down")]
    ShuttingDown,

    /// A wait or drain exceeded its deadline
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    /// No processor registered for the work type
    #[error("unknown work type: {0}")]
    UnknownWorkType(String),

    /// Work execution failed
    #[error("work failed: {message}")]
    Failed {
        /// Human-readable failure description
        message: String,
        /// Whether a retry could plausibly succeed
        retryable: bool,
    },
}

impl WorkError {
    /// A failure worth retrying (transient backend hiccups)
    pub fn transient(message: impl Into<String>) -> Self {
        WorkError::Failed {
            message: message.into(),
            retryable: true,
        }
    }

    /// A failure that retries cannot fix
    pub fn permanent(message: impl Into<String>) -> Self {
        WorkError::Failed {
            message: message.into(),
            retryable: false,
        }
    }

    /// Classify opaque error text through the substring lexicon.
    /// Unmatched text defaults to non-retryable.
    pub fn from_message(message: impl Into<String>) -> Self {
        let message = message.into();
        let lowered = message.to_lowercase();
        let retryable = RETRYABLE_PATTERNS.iter().any(|p| lowered.contains(p));
        WorkError::Failed { message, retryable }
    }

    /// Whether the dispatcher should retry after this error
    pub fn is_retryable(&self) -> bool {
        match self {
            WorkError::Failed { retryable, .. } => *retryable,
            WorkError::Timeout(_) => true,
            _ => false,
        }
    }
}

/// Result type for dispatcher operations
pub type Result<T> = std::result::Result<T, WorkError>;

pub mod dispatcher;
pub mod processor;
pub mod work;

pub use dispatcher::{Dispatcher, DispatcherConfig, DispatcherStats};
pub use processor::{ProcessorRegistry, WorkProcessor};
pub use work::{WorkItem, WorkPriority, WorkResult};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lexicon_classification() {
        assert!(WorkError::from_message("upstream Timeout while embedding").is_retryable());
        assert!(WorkError::from_message("connection refused by redis").is_retryable());
        assert!(WorkError::from_message("rate limit exceeded").is_retryable());
        assert!(!WorkError::from_message("malformed payload").is_retryable());
    }

    #[test]
    fn test_typed_bit_wins_over_text() {
        // Text mentions a retryable pattern but the producer marked it permanent.
        let error = WorkError::permanent("schema timeout field is invalid");
        assert!(!error.is_retryable());
    }
}
