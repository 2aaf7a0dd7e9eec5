use std::{collections::HashMap, sync::Arc, time::Instant};

use serde_json::Value;
use tokio::sync::Mutex;

use crate::{
    db::{keys, now_ms, Database, StoreOp},
    error::{EngineError, Result},
    events::{EngineEvent, EventDispatcher, TaskEvent},
    metrics::{MetricsAggregator, TaskExecutionStats},
    platform::WakeScheduler,
};

use super::{TaskDescriptor, TaskHandlerRegistry, TaskResult};

const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_info, log_warn};

#[derive(Default)]
struct TaskRegistry {
    descriptors: HashMap<String, TaskDescriptor>,
    results: HashMap<String, TaskResult>,
}

/// Owns the `tasks/` key-space.
///
/// Every mutation holds the registry lock across its store commit, so the
/// cache never runs ahead of or behind the store. Metrics are bumped inside
/// the same commit while the registry lock is still held.
#[derive(Clone)]
pub struct TaskScheduler {
    db: Database,
    metrics: MetricsAggregator,
    events: EventDispatcher,
    wake: Arc<dyn WakeScheduler>,
    registry: Arc<Mutex<TaskRegistry>>,
}

impl TaskScheduler {
    pub async fn load(
        db: Database,
        metrics: MetricsAggregator,
        events: EventDispatcher,
        wake: Arc<dyn WakeScheduler>,
    ) -> Result<Self> {
        let descriptors = db
            .list_records::<TaskDescriptor>(keys::TASK_DESCRIPTORS)
            .await?
            .into_iter()
            .collect::<HashMap<_, _>>();
        let results = db
            .list_records::<TaskResult>(keys::TASK_RESULTS)
            .await?
            .into_iter()
            .collect::<HashMap<_, _>>();

        log_debug!(
            "Loaded {} task descriptors and {} results",
            descriptors.len(),
            results.len()
        );

        Ok(Self {
            db,
            metrics,
            events,
            wake,
            registry: Arc::new(Mutex::new(TaskRegistry {
                descriptors,
                results,
            })),
        })
    }

    /// Persists the descriptor (replacing any earlier one with the same id),
    /// then asks the OS for wake-ups at that cadence.
    pub async fn register_task(
        &self,
        task_id: &str,
        handler_reference: &str,
        interval_ms: u64,
    ) -> Result<TaskDescriptor> {
        let descriptor = TaskDescriptor::new(task_id, handler_reference, interval_ms)?;

        let mut registry = self.registry.lock().await;
        self.db
            .put_record(&keys::task_descriptor(task_id), &descriptor)
            .await?;
        registry
            .descriptors
            .insert(task_id.to_string(), descriptor.clone());

        if let Err(err) = self.wake.schedule_wake(task_id, interval_ms) {
            log_warn!("Task {task_id} saved but wake-up could not be scheduled: {err:#}");
        }

        log_info!("Task registered: {task_id} (interval: {interval_ms}ms)");
        Ok(descriptor)
    }

    /// Drops the descriptor, its latest result and its stats. Unknown ids are
    /// a silent no-op.
    pub async fn unregister_task(&self, task_id: &str) -> Result<()> {
        let mut registry = self.registry.lock().await;

        if !registry.descriptors.contains_key(task_id) && !registry.results.contains_key(task_id) {
            log_debug!("Task {task_id} is not registered; nothing to remove");
            return Ok(());
        }

        let staged = vec![
            StoreOp::delete(keys::task_descriptor(task_id)),
            StoreOp::delete(keys::task_result(task_id)),
        ];
        self.metrics.forget_task(staged, task_id).await?;

        registry.descriptors.remove(task_id);
        registry.results.remove(task_id);

        if let Err(err) = self.wake.cancel_wake(task_id) {
            log_warn!("Task {task_id} removed but its wake-up could not be cancelled: {err:#}");
        }

        log_info!("Task unregistered: {task_id}");
        Ok(())
    }

    /// Stores the latest result and bumps the stats in one commit, then
    /// notifies listeners. The event goes out only after the commit, so a
    /// result is retrievable even when nobody is listening.
    pub async fn record_execution(
        &self,
        task_id: &str,
        payload: Value,
        duration_ms: u64,
    ) -> Result<TaskResult> {
        let result = {
            let mut registry = self.registry.lock().await;
            if !registry.descriptors.contains_key(task_id) {
                return Err(EngineError::TaskNotFound(task_id.to_string()));
            }

            let executed_at = now_ms();
            let result = TaskResult {
                task_id: task_id.to_string(),
                payload,
                timestamp_ms: executed_at,
            };

            let staged = vec![StoreOp::put_record(keys::task_result(task_id), &result)?];
            self.metrics
                .record_task_execution(staged, task_id, duration_ms, executed_at)
                .await?;

            registry
                .results
                .insert(task_id.to_string(), result.clone());
            result
        };

        let delivered = self.events.dispatch(&EngineEvent::TaskEvent(TaskEvent {
            task_id: result.task_id.clone(),
            data: result.payload.clone(),
            timestamp: result.timestamp_ms,
        }));
        log_debug!("Task {task_id} executed in {duration_ms}ms, {delivered} listener(s) notified");

        Ok(result)
    }

    /// The OS woke us for `task_id`: run its handler on the blocking pool,
    /// time it, and record the outcome.
    pub async fn run_task(&self, task_id: &str, handlers: &TaskHandlerRegistry) -> Result<TaskResult> {
        let descriptor = self
            .get_task(task_id)
            .await
            .ok_or_else(|| EngineError::TaskNotFound(task_id.to_string()))?;

        let handler = handlers
            .resolve(&descriptor.handler_reference)
            .ok_or_else(|| EngineError::HandlerNotFound(descriptor.handler_reference.clone()))?;

        let started = Instant::now();
        let owned_id = task_id.to_string();
        let outcome = tokio::task::spawn_blocking(move || handler.execute(&owned_id)).await;
        let duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

        let payload = match outcome {
            Ok(Ok(payload)) => payload,
            Ok(Err(err)) => {
                log_warn!("Task {task_id} handler failed: {err:#}");
                return Err(EngineError::TaskFailed {
                    task_id: task_id.to_string(),
                    reason: format!("{err:#}"),
                });
            }
            Err(join_err) => {
                log_warn!("Task {task_id} handler did not complete: {join_err}");
                return Err(EngineError::TaskFailed {
                    task_id: task_id.to_string(),
                    reason: "handler panicked or was cancelled".into(),
                });
            }
        };

        self.record_execution(task_id, payload, duration_ms).await
    }

    pub async fn get_task_result(&self, task_id: &str) -> Option<TaskResult> {
        self.registry.lock().await.results.get(task_id).cloned()
    }

    pub async fn get_task(&self, task_id: &str) -> Option<TaskDescriptor> {
        self.registry.lock().await.descriptors.get(task_id).cloned()
    }

    /// Sorted by task id.
    pub async fn list_tasks(&self) -> Vec<TaskDescriptor> {
        let registry = self.registry.lock().await;
        let mut tasks: Vec<TaskDescriptor> = registry.descriptors.values().cloned().collect();
        tasks.sort_by(|a, b| a.task_id.cmp(&b.task_id));
        tasks
    }

    pub async fn get_task_stats(&self, task_id: &str) -> Option<TaskExecutionStats> {
        self.metrics.get_task_stats(task_id).await
    }

    /// Re-requests wake-ups for every persisted task after a relaunch.
    /// Returns how many were accepted by the scheduler.
    pub async fn restore(&self) -> usize {
        let registry = self.registry.lock().await;
        let mut armed = 0;
        for descriptor in registry.descriptors.values() {
            match self
                .wake
                .schedule_wake(&descriptor.task_id, descriptor.interval_ms)
            {
                Ok(()) => armed += 1,
                Err(err) => log_warn!(
                    "Could not restore wake-up for task {}: {err:#}",
                    descriptor.task_id
                ),
            }
        }
        if !registry.descriptors.is_empty() {
            log_info!(
                "Restored {armed}/{} task wake-ups",
                registry.descriptors.len()
            );
        }
        armed
    }
}
