use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{EngineError, Result};

/// Lowest cadence the engine accepts for a periodic task.
pub const MIN_TASK_INTERVAL_MS: u64 = 1000;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskDescriptor {
    pub task_id: String,
    /// Resolved by the execution layer, opaque to the scheduler.
    pub handler_reference: String,
    pub interval_ms: u64,
}

impl TaskDescriptor {
    pub fn new(
        task_id: impl Into<String>,
        handler_reference: impl Into<String>,
        interval_ms: u64,
    ) -> Result<Self> {
        let descriptor = Self {
            task_id: task_id.into(),
            handler_reference: handler_reference.into(),
            interval_ms,
        };
        descriptor.validate()?;
        Ok(descriptor)
    }

    pub fn validate(&self) -> Result<()> {
        if self.task_id.trim().is_empty() {
            return Err(EngineError::MissingField("taskId"));
        }
        if self.handler_reference.trim().is_empty() {
            return Err(EngineError::MissingField("taskClass"));
        }
        if self.interval_ms < MIN_TASK_INTERVAL_MS {
            return Err(EngineError::InvalidInterval {
                interval_ms: self.interval_ms,
                min_ms: MIN_TASK_INTERVAL_MS,
            });
        }
        Ok(())
    }
}

/// Latest output of a task. One per task, overwritten on every execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskResult {
    pub task_id: String,
    pub payload: Value,
    pub timestamp_ms: i64,
}
