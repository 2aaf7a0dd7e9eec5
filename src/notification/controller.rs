use std::{sync::Arc, time::Duration};

use tokio::sync::Mutex;

use crate::{
    config::EngineConfig,
    db::{keys, now_ms, Database, StoreOp},
    error::{EngineError, Result, StoreError},
    events::EventDispatcher,
    metrics::MetricsAggregator,
    platform::{LocationUpdates, PermissionCheck},
};

use super::{
    heartbeat::HeartbeatTicker,
    state::{NotificationState, NotificationUpdate, PersistedNotification},
};

const ENABLE_LOGS: bool = true;

use crate::{log_error, log_info, log_warn};

/// Keeps the single service notification in sync with the store.
///
/// Lock order is record, then metrics. The heartbeat loop reads the record,
/// so the record lock is always released before the ticker is stopped.
#[derive(Clone)]
pub struct NotificationController {
    db: Database,
    metrics: MetricsAggregator,
    events: EventDispatcher,
    location: Arc<dyn LocationUpdates>,
    permissions: Arc<dyn PermissionCheck>,
    heartbeat_interval: Duration,
    heartbeat_enabled: bool,
    debug: bool,
    record: Arc<Mutex<PersistedNotification>>,
    ticker: Arc<Mutex<HeartbeatTicker>>,
}

impl NotificationController {
    pub async fn load(
        db: Database,
        metrics: MetricsAggregator,
        events: EventDispatcher,
        location: Arc<dyn LocationUpdates>,
        permissions: Arc<dyn PermissionCheck>,
        config: &EngineConfig,
    ) -> std::result::Result<Self, StoreError> {
        let record = match db
            .get_record::<PersistedNotification>(keys::NOTIFICATION_STATE)
            .await
        {
            Ok(found) => found.unwrap_or_default(),
            Err(StoreError::Corrupt { key, reason }) => {
                log_warn!("Discarding unreadable {key}: {reason}");
                PersistedNotification::default()
            }
            Err(err) => return Err(err),
        };

        Ok(Self {
            db,
            metrics,
            events,
            location,
            permissions,
            heartbeat_interval: config.heartbeat_interval,
            heartbeat_enabled: config.heartbeat_enabled,
            debug: config.debug,
            record: Arc::new(Mutex::new(record)),
            ticker: Arc::new(Mutex::new(HeartbeatTicker::default())),
        })
    }

    /// Persists `state` as the new baseline and marks the service active.
    /// Starting an already active service keeps its clock running.
    pub async fn start(&self, state: NotificationState) -> Result<NotificationState> {
        if state.title.trim().is_empty() {
            return Err(EngineError::MissingField("title"));
        }

        let location_enabled = state.location_enabled;
        {
            let mut record = self.record.lock().await;
            let now = now_ms();
            let started_at_ms = if record.active {
                record.started_at_ms.unwrap_or(now)
            } else {
                now
            };

            let next = PersistedNotification {
                state: state.clone(),
                active: true,
                started_at_ms: Some(started_at_ms),
            };
            let staged = vec![StoreOp::put_record(keys::NOTIFICATION_STATE, &next)?];
            self.metrics.record_service_start(staged, started_at_ms).await?;
            *record = next;
            self.apply_location(location_enabled);
        }

        self.start_heartbeat().await;

        log_info!("Service started: {}", state.title);
        Ok(state)
    }

    /// Merges `update` into the baseline and returns the effective state.
    /// Before any `start` the baseline is an empty placeholder.
    pub async fn update(&self, update: NotificationUpdate) -> Result<NotificationState> {
        let mut record = self.record.lock().await;

        let mut next = record.clone();
        next.state.merge(update);

        let staged = vec![StoreOp::put_record(keys::NOTIFICATION_STATE, &next)?];
        self.metrics.record_notification_update(staged).await?;

        let location_changed =
            next.active && next.state.location_enabled != record.state.location_enabled;

        *record = next;
        if location_changed {
            self.apply_location(record.state.location_enabled);
        }
        Ok(record.state.clone())
    }

    /// Clears the baseline and marks the service inactive. Idempotent.
    pub async fn stop(&self) -> Result<()> {
        let was_active = {
            let mut record = self.record.lock().await;
            if *record == PersistedNotification::default() {
                false
            } else {
                let staged = vec![StoreOp::delete(keys::NOTIFICATION_STATE)];
                self.metrics.record_service_stop(staged, now_ms()).await?;
                let was_active = record.active;
                *record = PersistedNotification::default();
                if was_active {
                    if let Err(err) = self.location.stop_updates() {
                        log_warn!("Could not stop location updates: {err:#}");
                    }
                }
                was_active
            }
        };

        self.stop_heartbeat().await;
        if was_active {
            log_info!("Service stopped");
        }
        Ok(())
    }

    /// Picks a persisted active service back up after a relaunch.
    pub async fn resume(&self) -> bool {
        {
            let record = self.record.lock().await;
            if !record.active {
                return false;
            }
            self.apply_location(record.state.location_enabled);
        }

        self.start_heartbeat().await;
        log_info!("Service resumed after relaunch");
        true
    }

    pub async fn state(&self) -> NotificationState {
        self.record.lock().await.state.clone()
    }

    pub async fn is_active(&self) -> bool {
        self.record.lock().await.active
    }

    pub async fn started_at_ms(&self) -> Option<i64> {
        self.record.lock().await.started_at_ms
    }

    pub async fn heartbeat_running(&self) -> bool {
        self.ticker.lock().await.is_running()
    }

    /// Cancels the heartbeat without touching persisted state. Used on engine
    /// shutdown.
    pub async fn shutdown(&self) {
        self.stop_heartbeat().await;
    }

    fn apply_location(&self, enabled: bool) {
        if !enabled {
            if let Err(err) = self.location.stop_updates() {
                log_warn!("Could not stop location updates: {err:#}");
            }
            return;
        }

        if !self.permissions.location_authorized() {
            log_warn!("Location requested but not authorized; skipping updates");
            return;
        }
        if let Err(err) = self.location.start_updates() {
            log_warn!("Could not start location updates: {err:#}");
        }
    }

    /// A `stop` may land between releasing the record lock and starting the
    /// ticker, so the record is checked again once the loop is running.
    async fn start_heartbeat(&self) {
        if !self.heartbeat_enabled {
            return;
        }
        let mut ticker = self.ticker.lock().await;
        if let Err(err) = ticker
            .start(
                self.record.clone(),
                self.events.clone(),
                self.heartbeat_interval,
                self.debug,
            )
            .await
        {
            log_error!("Failed to restart heartbeat: {err:#}");
            return;
        }

        let still_active = self.record.lock().await.active;
        if !still_active {
            if let Err(err) = ticker.stop().await {
                log_error!("Failed to stop heartbeat: {err:#}");
            }
        }
    }

    async fn stop_heartbeat(&self) {
        if let Err(err) = self.ticker.lock().await.stop().await {
            log_error!("Failed to stop heartbeat: {err:#}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{EngineEvent, EventKind};
    use crate::platform::BatteryReading;
    use crate::test_support::{
        make_read_only, record_events, FakeBattery, FakeLocation, FakePermissions,
        FakeResourceCache,
    };
    use std::collections::BTreeMap;

    struct Harness {
        db: Database,
        metrics: MetricsAggregator,
        events: EventDispatcher,
        location: Arc<FakeLocation>,
        permissions: Arc<FakePermissions>,
        controller: NotificationController,
    }

    fn quiet_config() -> EngineConfig {
        EngineConfig {
            heartbeat_enabled: false,
            ..EngineConfig::new("/unused")
        }
    }

    async fn harness_with(db: Database, config: EngineConfig) -> Harness {
        let events = EventDispatcher::new();
        let location = Arc::new(FakeLocation::default());
        let permissions = Arc::new(FakePermissions::new(true));
        let metrics = MetricsAggregator::load(
            db.clone(),
            Arc::new(FakeBattery::new(Some(BatteryReading {
                level: 90,
                is_charging: false,
            }))),
            Arc::new(FakeResourceCache::new(None)),
        )
        .await
        .unwrap();
        let controller = NotificationController::load(
            db.clone(),
            metrics.clone(),
            events.clone(),
            location.clone(),
            permissions.clone(),
            &config,
        )
        .await
        .unwrap();
        Harness {
            db,
            metrics,
            events,
            location,
            permissions,
            controller,
        }
    }

    async fn harness() -> Harness {
        harness_with(Database::open_in_memory().unwrap(), quiet_config()).await
    }

    fn ride() -> NotificationState {
        NotificationState {
            subtitle: Some("B".into()),
            location_enabled: true,
            ..NotificationState::titled("A")
        }
    }

    #[tokio::test]
    async fn start_requires_a_title() {
        let h = harness().await;
        let err = h
            .controller
            .start(NotificationState::titled("  "))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::MissingField("title")));
        assert!(!h.controller.is_active().await);
    }

    #[tokio::test]
    async fn update_merges_into_baseline() {
        let h = harness().await;
        h.controller.start(ride()).await.unwrap();

        let effective = h
            .controller
            .update(NotificationUpdate {
                title: Some("X".into()),
                ..NotificationUpdate::default()
            })
            .await
            .unwrap();

        assert_eq!(effective.title, "X");
        assert_eq!(effective.subtitle.as_deref(), Some("B"));
        assert_eq!(h.controller.state().await, effective);
        assert_eq!(h.metrics.get_metrics().await.notification_update_count, 2);
    }

    #[tokio::test]
    async fn update_before_start_builds_placeholder_baseline() {
        let h = harness().await;
        let effective = h
            .controller
            .update(NotificationUpdate {
                view_data: Some(BTreeMap::from([("txtEta".to_string(), "5 min".to_string())])),
                ..NotificationUpdate::default()
            })
            .await
            .unwrap();

        assert_eq!(effective.title, "");
        assert_eq!(effective.view_data["txtEta"], "5 min");
        assert!(!h.controller.is_active().await);
    }

    #[tokio::test]
    async fn stop_clears_state_and_is_idempotent() {
        let h = harness().await;
        h.controller.start(ride()).await.unwrap();
        assert!(h.location.is_running());

        h.controller.stop().await.unwrap();
        assert!(!h.controller.is_active().await);
        assert_eq!(h.controller.state().await, NotificationState::default());
        assert!(!h.location.is_running());
        assert!(h.db.get(keys::NOTIFICATION_STATE).await.unwrap().is_none());

        h.controller.stop().await.unwrap();
        assert!(!h.metrics.get_metrics().await.service.is_running);
    }

    #[tokio::test]
    async fn location_needs_authorization() {
        let h = harness().await;
        h.permissions.set(false);

        h.controller.start(ride()).await.unwrap();
        assert!(!h.location.is_running());
        assert!(h.controller.is_active().await);
    }

    #[tokio::test]
    async fn toggling_location_through_update() {
        let h = harness().await;
        h.controller.start(ride()).await.unwrap();
        assert!(h.location.is_running());

        h.controller
            .update(NotificationUpdate {
                location_enabled: Some(false),
                ..NotificationUpdate::default()
            })
            .await
            .unwrap();
        assert!(!h.location.is_running());
    }

    #[tokio::test]
    async fn start_tracks_uptime_and_battery() {
        let h = harness().await;
        h.controller.start(ride()).await.unwrap();

        let metrics = h.metrics.get_metrics().await;
        assert!(metrics.service.is_running);
        assert_eq!(metrics.battery_drain, Some(0));
    }

    #[tokio::test]
    async fn active_service_resumes_after_reload() {
        let db = Database::open_in_memory().unwrap();
        let started_at = {
            let h = harness_with(db.clone(), quiet_config()).await;
            h.controller.start(ride()).await.unwrap();
            h.controller.started_at_ms().await
        };

        let relaunched = harness_with(db, quiet_config()).await;
        assert!(relaunched.controller.is_active().await);
        assert_eq!(relaunched.controller.started_at_ms().await, started_at);
        assert_eq!(relaunched.controller.state().await.title, "A");

        assert!(relaunched.controller.resume().await);
        assert!(relaunched.location.is_running());
    }

    #[tokio::test]
    async fn restarting_keeps_the_clock_anchor() {
        let h = harness().await;
        h.controller.start(ride()).await.unwrap();
        let first = h.controller.started_at_ms().await;

        tokio::time::sleep(Duration::from_millis(5)).await;
        h.controller.start(NotificationState::titled("Again")).await.unwrap();
        assert_eq!(h.controller.started_at_ms().await, first);
    }

    #[tokio::test]
    async fn heartbeat_ticks_while_active() {
        let config = EngineConfig {
            heartbeat_interval: Duration::from_millis(10),
            ..EngineConfig::new("/unused")
        };
        let h = harness_with(Database::open_in_memory().unwrap(), config).await;
        let beats = record_events(&h.events, EventKind::Heartbeat);

        h.controller
            .start(NotificationState {
                timer_view_id: Some("txtTimer".into()),
                ..NotificationState::titled("Tracking")
            })
            .await
            .unwrap();
        assert!(h.controller.heartbeat_running().await);

        tokio::time::sleep(Duration::from_millis(80)).await;
        h.controller.stop().await.unwrap();
        assert!(!h.controller.heartbeat_running().await);

        let count = {
            let beats = beats.lock().unwrap();
            assert!(!beats.is_empty());
            match &beats[0] {
                EngineEvent::Heartbeat(beat) => {
                    assert_eq!(beat.tick, 1);
                    assert_eq!(beat.timer_view_id.as_deref(), Some("txtTimer"));
                    assert_eq!(beat.clock, "00:00:00");
                }
                other => panic!("unexpected event {other:?}"),
            }
            beats.len()
        };

        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(beats.lock().unwrap().len(), count);
    }

    #[tokio::test]
    async fn failed_write_keeps_previous_baseline() {
        let h = harness().await;
        h.controller.start(ride()).await.unwrap();
        make_read_only(&h.db).await;

        assert!(h
            .controller
            .update(NotificationUpdate {
                title: Some("lost".into()),
                ..NotificationUpdate::default()
            })
            .await
            .is_err());
        assert_eq!(h.controller.state().await.title, "A");

        assert!(h.controller.stop().await.is_err());
        assert!(h.controller.is_active().await);
    }
    /// Location provider whose `start_updates` takes a while to return.
    #[derive(Default)]
    struct SlowLocation {
        entered: std::sync::atomic::AtomicBool,
        running: std::sync::atomic::AtomicBool,
    }

    impl LocationUpdates for SlowLocation {
        fn start_updates(&self) -> anyhow::Result<()> {
            use std::sync::atomic::Ordering;
            self.entered.store(true, Ordering::SeqCst);
            std::thread::sleep(Duration::from_millis(100));
            self.running.store(true, Ordering::SeqCst);
            Ok(())
        }

        fn stop_updates(&self) -> anyhow::Result<()> {
            self.running
                .store(false, std::sync::atomic::Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn stop_during_slow_location_start_leaves_tracking_off() {
        use std::sync::atomic::Ordering;

        let db = Database::open_in_memory().unwrap();
        let events = EventDispatcher::new();
        let location = Arc::new(SlowLocation::default());
        let metrics = MetricsAggregator::load(
            db.clone(),
            Arc::new(FakeBattery::new(None)),
            Arc::new(FakeResourceCache::new(None)),
        )
        .await
        .unwrap();
        let config = EngineConfig {
            heartbeat_interval: Duration::from_millis(10),
            ..EngineConfig::new("/unused")
        };
        let controller = NotificationController::load(
            db,
            metrics,
            events,
            location.clone(),
            Arc::new(FakePermissions::new(true)),
            &config,
        )
        .await
        .unwrap();

        let starter = controller.clone();
        let start = tokio::spawn(async move { starter.start(ride()).await });
        while !location.entered.load(Ordering::SeqCst) {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }

        controller.stop().await.unwrap();
        start.await.unwrap().unwrap();

        assert!(!controller.is_active().await);
        assert!(!location.running.load(Ordering::SeqCst));
        assert!(!controller.heartbeat_running().await);
    }
}
