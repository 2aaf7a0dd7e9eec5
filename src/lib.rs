pub mod commands;
pub mod config;
pub mod db;
pub mod error;
pub mod events;
pub mod geofence;
pub mod metrics;
pub mod notification;
pub mod platform;
pub mod state;
pub mod tasks;
pub mod theme;
mod utils;

#[cfg(test)]
mod test_support;

use anyhow::Context;
use serde_json::Value;

pub use config::EngineConfig;
pub use db::Database;
pub use error::{EngineError, ErrorKind, StoreError};
pub use events::{EngineEvent, EventDispatcher, EventKind, ListenerHandle};
pub use geofence::{GeofenceManager, GeofenceRegion, TransitionKind, TransitionOutcome};
pub use metrics::{MetricsAggregator, MetricsSnapshot};
pub use notification::{NotificationController, NotificationState, NotificationUpdate};
pub use platform::Platform;
pub use state::{AppState, StateChange, StateConfig, StateMachine, TransitionTable};
pub use tasks::{TaskDescriptor, TaskHandler, TaskHandlerRegistry, TaskResult, TaskScheduler};
pub use theme::{ThemeConfig, ThemeRegistry};

const ENABLE_LOGS: bool = true;

/// Installs the `env_logger` backend. Hosts that bring their own logger skip
/// this.
pub fn init_logging() {
    utils::logging::init();
}

/// One engine per process. Every service shares the same store and
/// aggregator; cloning is cheap and yields handles to the same state.
#[derive(Clone)]
pub struct Engine {
    config: EngineConfig,
    db: Database,
    events: EventDispatcher,
    handlers: TaskHandlerRegistry,
    metrics: MetricsAggregator,
    tasks: TaskScheduler,
    geofences: GeofenceManager,
    notification: NotificationController,
    app_state: StateMachine,
    themes: ThemeRegistry,
}

impl Engine {
    /// Opens (or creates) the store under `config.data_dir`, loads every
    /// service from it, then re-arms whatever the OS forgot while the process
    /// was dead: task wake-ups, region monitoring and the running service.
    pub async fn open(config: EngineConfig, platform: Platform) -> anyhow::Result<Self> {
        let db = Database::new(config.database_path())?;
        Self::open_with_database(db, config, platform).await
    }

    pub async fn open_with_database(
        db: Database,
        config: EngineConfig,
        platform: Platform,
    ) -> anyhow::Result<Self> {
        log_info!("fgservice starting up (store: {})", db.path().display());

        let events = EventDispatcher::new();
        let metrics = MetricsAggregator::load(
            db.clone(),
            platform.battery.clone(),
            platform.resource_cache.clone(),
        )
        .await
        .context("failed to load metrics")?;
        let tasks = TaskScheduler::load(
            db.clone(),
            metrics.clone(),
            events.clone(),
            platform.wake.clone(),
        )
        .await
        .context("failed to load tasks")?;
        let geofences = GeofenceManager::load(
            db.clone(),
            metrics.clone(),
            events.clone(),
            platform.regions.clone(),
            platform.permissions.clone(),
            config.max_geofence_radius_m,
        )
        .await
        .context("failed to load geofences")?;
        let notification = NotificationController::load(
            db.clone(),
            metrics.clone(),
            events.clone(),
            platform.location.clone(),
            platform.permissions.clone(),
            &config,
        )
        .await
        .context("failed to load notification state")?;
        let app_state = StateMachine::load(db.clone(), notification.clone(), events.clone())
            .await
            .context("failed to load app state")?;
        let themes = ThemeRegistry::load(db.clone())
            .await
            .context("failed to load themes")?;

        let engine = Self {
            config,
            db,
            events,
            handlers: TaskHandlerRegistry::new(),
            metrics,
            tasks,
            geofences,
            notification,
            app_state,
            themes,
        };

        let restored_tasks = engine.tasks.restore().await;
        let restored_regions = engine.geofences.restore().await;
        let resumed = engine.notification.resume().await;
        log_info!(
            "Recovery done: {restored_tasks} task(s), {restored_regions} geofence(s), service {}",
            if resumed { "resumed" } else { "idle" }
        );

        Ok(engine)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    pub fn events(&self) -> &EventDispatcher {
        &self.events
    }

    pub fn handlers(&self) -> &TaskHandlerRegistry {
        &self.handlers
    }

    pub fn metrics(&self) -> &MetricsAggregator {
        &self.metrics
    }

    pub fn tasks(&self) -> &TaskScheduler {
        &self.tasks
    }

    pub fn geofences(&self) -> &GeofenceManager {
        &self.geofences
    }

    pub fn notification(&self) -> &NotificationController {
        &self.notification
    }

    pub fn app_state(&self) -> &StateMachine {
        &self.app_state
    }

    pub fn themes(&self) -> &ThemeRegistry {
        &self.themes
    }

    /// Wake-up callback from the OS scheduler.
    pub async fn run_task(&self, task_id: &str) -> error::Result<TaskResult> {
        self.tasks.run_task(task_id, &self.handlers).await
    }

    /// Report from an external execution layer that ran the task itself.
    pub async fn record_execution(
        &self,
        task_id: &str,
        payload: Value,
        duration_ms: u64,
    ) -> error::Result<TaskResult> {
        self.tasks
            .record_execution(task_id, payload, duration_ms)
            .await
    }

    /// Region-monitor callback.
    pub async fn on_region_transition(
        &self,
        id: &str,
        kind: TransitionKind,
    ) -> error::Result<TransitionOutcome> {
        self.geofences.on_region_transition(id, kind).await
    }

    /// Location provider callback.
    pub async fn on_location_update(&self, distance_km: f64) -> error::Result<()> {
        self.metrics.record_location_update(distance_km).await?;
        Ok(())
    }

    /// Stops background loops and drops listeners. Persisted state is left
    /// as is so the next `open` picks it up.
    pub async fn shutdown(&self) {
        self.notification.shutdown().await;
        self.events.remove_all_listeners();
        log_info!("fgservice shut down");
    }
}
