//! Work processor trait and type registry.

use crate::dispatch::work::WorkItem;
use crate::dispatch::Result;
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

/// Handles one work type
#[async_trait]
pub trait WorkProcessor: Send + Sync {
    /// Execute a work item, producing its output
    async fn process(&self, item: &WorkItem) -> Result<serde_json::Value>;

    /// The work type this processor handles
    fn work_type(&self) -> &str;
}

/// Processor lookup by work type
#[derive(Default)]
pub struct ProcessorRegistry {
    processors: RwLock<HashMap<String, Arc<dyn WorkProcessor>>>,
}

impl ProcessorRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a processor under its work type.
    ///
    /// A later registration for the same type replaces the earlier one.
    pub fn register(&self, processor: Arc<dyn WorkProcessor>) {
        self.processors
            .write()
            .insert(processor.work_type().to_string(), processor);
    }

    /// Look up the processor for a work type
    pub fn get(&self, work_type: &str) -> Option<Arc<dyn WorkProcessor>> {
        self.processors.read().get(work_type).cloned()
    }

    /// Registered work types
    pub fn work_types(&self) -> Vec<String> {
        self.processors.read().keys().cloned().collect()
    }
}
