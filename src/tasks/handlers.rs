use std::{
    collections::HashMap,
    sync::{Arc, RwLock},
};

use serde_json::Value;

/// Work behind a task's `handlerReference`.
///
/// Runs on the blocking pool, so it may do synchronous I/O. An `Err` marks the
/// execution as failed and nothing is recorded for it.
pub trait TaskHandler: Send + Sync {
    fn execute(&self, task_id: &str) -> anyhow::Result<Value>;
}

impl<F> TaskHandler for F
where
    F: Fn(&str) -> anyhow::Result<Value> + Send + Sync,
{
    fn execute(&self, task_id: &str) -> anyhow::Result<Value> {
        self(task_id)
    }
}

/// Maps handler references to the code that runs them.
#[derive(Clone, Default)]
pub struct TaskHandlerRegistry {
    handlers: Arc<RwLock<HashMap<String, Arc<dyn TaskHandler>>>>,
}

impl TaskHandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces any handler already registered under `reference`.
    pub fn register<H>(&self, reference: impl Into<String>, handler: H)
    where
        H: TaskHandler + 'static,
    {
        let mut guard = match self.handlers.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        guard.insert(reference.into(), Arc::new(handler));
    }

    pub fn unregister(&self, reference: &str) -> bool {
        let mut guard = match self.handlers.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        guard.remove(reference).is_some()
    }

    pub fn resolve(&self, reference: &str) -> Option<Arc<dyn TaskHandler>> {
        let guard = match self.handlers.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        guard.get(reference).cloned()
    }
}
