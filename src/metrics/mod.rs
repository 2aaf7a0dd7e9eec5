mod types;

pub use types::{
    BatteryMetrics, CacheMetrics, GeofenceMetrics, LocationMetrics, MetricsCounters,
    MetricsSnapshot, ServiceMetrics, TaskExecutionStats, TaskStatsView,
};

use std::{collections::HashMap, sync::Arc};

use tokio::sync::Mutex;

use crate::{
    db::{keys, now_ms, Database, StoreOp},
    error::StoreError,
    geofence::TransitionKind,
    platform::{BatteryMonitor, ResourceCacheStats},
};

const MS_PER_HOUR: f64 = 3_600_000.0;

const ENABLE_LOGS: bool = true;

use crate::{log_info, log_warn};

/// Counters and timers for the whole engine.
///
/// Other services hand their own pending writes to the `record_*` methods so
/// that their record and the counter bump commit in one transaction. Callers
/// holding a collection lock acquire this aggregator's lock second.
#[derive(Clone)]
pub struct MetricsAggregator {
    db: Database,
    battery: Arc<dyn BatteryMonitor>,
    resource_cache: Arc<dyn ResourceCacheStats>,
    inner: Arc<Mutex<MetricsState>>,
}

#[derive(Default)]
struct MetricsState {
    counters: MetricsCounters,
    tasks: HashMap<String, TaskExecutionStats>,
}

impl MetricsAggregator {
    pub async fn load(
        db: Database,
        battery: Arc<dyn BatteryMonitor>,
        resource_cache: Arc<dyn ResourceCacheStats>,
    ) -> Result<Self, StoreError> {
        let counters = match db.get_record::<MetricsCounters>(keys::METRICS_COUNTERS).await {
            Ok(found) => found.unwrap_or_default(),
            Err(StoreError::Corrupt { key, reason }) => {
                log_warn!("Discarding unreadable counters at {key}: {reason}");
                MetricsCounters::default()
            }
            Err(err) => return Err(err),
        };

        let tasks = db
            .list_records::<TaskExecutionStats>(keys::METRICS_TASKS)
            .await?
            .into_iter()
            .collect::<HashMap<_, _>>();

        Ok(Self {
            db,
            battery,
            resource_cache,
            inner: Arc::new(Mutex::new(MetricsState { counters, tasks })),
        })
    }

    /// Commits `staged` together with the updated stats for `task_id`.
    pub(crate) async fn record_task_execution(
        &self,
        mut staged: Vec<StoreOp>,
        task_id: &str,
        duration_ms: u64,
        executed_at_ms: i64,
    ) -> Result<TaskExecutionStats, StoreError> {
        let mut state = self.inner.lock().await;

        let mut counters = state.counters.clone();
        counters.task_execution_count += 1;
        counters.total_task_execution_time_ms = counters
            .total_task_execution_time_ms
            .saturating_add(duration_ms);

        let mut stats = state
            .tasks
            .get(task_id)
            .cloned()
            .unwrap_or_else(|| TaskExecutionStats::new(task_id));
        stats.execution_count += 1;
        stats.total_time_ms = stats.total_time_ms.saturating_add(duration_ms);
        stats.last_execution_timestamp_ms = executed_at_ms;

        staged.push(StoreOp::put_record(keys::METRICS_COUNTERS, &counters)?);
        staged.push(StoreOp::put_record(keys::task_stats(task_id), &stats)?);
        self.db.commit(staged).await?;

        state.counters = counters;
        state.tasks.insert(task_id.to_string(), stats.clone());
        Ok(stats)
    }

    /// Commits `staged` together with the removal of `task_id`'s stats.
    pub(crate) async fn forget_task(
        &self,
        mut staged: Vec<StoreOp>,
        task_id: &str,
    ) -> Result<(), StoreError> {
        let mut state = self.inner.lock().await;
        staged.push(StoreOp::delete(keys::task_stats(task_id)));
        self.db.commit(staged).await?;
        state.tasks.remove(task_id);
        Ok(())
    }

    pub(crate) async fn record_notification_update(
        &self,
        staged: Vec<StoreOp>,
    ) -> Result<(), StoreError> {
        self.commit_counters(staged, |counters| {
            counters.notification_update_count += 1;
        })
        .await
    }

    /// Counts the start as a notification update and opens an uptime
    /// session unless one is already running.
    pub(crate) async fn record_service_start(
        &self,
        staged: Vec<StoreOp>,
        started_at_ms: i64,
    ) -> Result<(), StoreError> {
        let battery_level = self.battery.reading().map(|reading| reading.level);
        self.commit_counters(staged, |counters| {
            counters.notification_update_count += 1;
            if counters.service_started_at_ms.is_none() {
                counters.service_started_at_ms = Some(started_at_ms);
                counters.initial_battery_level = battery_level;
            }
        })
        .await
    }

    /// Folds the running uptime session, if any, into the accumulated total.
    pub(crate) async fn record_service_stop(
        &self,
        staged: Vec<StoreOp>,
        stopped_at_ms: i64,
    ) -> Result<(), StoreError> {
        self.commit_counters(staged, |counters| {
            if let Some(started_at) = counters.service_started_at_ms.take() {
                let session_ms = elapsed_ms(started_at, stopped_at_ms);
                counters.service_uptime_accumulated_ms = counters
                    .service_uptime_accumulated_ms
                    .saturating_add(session_ms);
            }
        })
        .await
    }

    pub async fn record_geofence_trigger(&self, kind: TransitionKind) -> Result<(), StoreError> {
        self.commit_counters(Vec::new(), |counters| {
            counters.geofence_trigger_count += 1;
            *counters
                .geofence_triggers_by_type
                .entry(kind.as_str().to_string())
                .or_insert(0) += 1;
        })
        .await
    }

    pub async fn record_location_update(&self, distance_km: f64) -> Result<(), StoreError> {
        let now = now_ms();
        let distance_km = if distance_km.is_finite() && distance_km > 0.0 {
            distance_km
        } else {
            0.0
        };
        self.commit_counters(Vec::new(), |counters| {
            counters.location_update_count += 1;
            counters.location_total_distance_km += distance_km;
            counters.location_first_update_ms.get_or_insert(now);
            counters.location_last_update_ms = Some(now);
        })
        .await
    }

    pub async fn get_task_stats(&self, task_id: &str) -> Option<TaskExecutionStats> {
        self.inner.lock().await.tasks.get(task_id).cloned()
    }

    pub async fn get_metrics(&self) -> MetricsSnapshot {
        let state = self.inner.lock().await;
        let counters = &state.counters;
        let now = now_ms();

        let running_ms = counters
            .service_started_at_ms
            .map(|started_at| elapsed_ms(started_at, now))
            .unwrap_or(0);
        let uptime_ms = counters
            .service_uptime_accumulated_ms
            .saturating_add(running_ms);
        let uptime_hours = uptime_ms as f64 / MS_PER_HOUR;

        let avg_task_execution_time = if counters.task_execution_count == 0 {
            0.0
        } else {
            counters.total_task_execution_time_ms as f64 / counters.task_execution_count as f64
        };

        let battery = self.battery.reading();
        let current_battery_level = battery.map(|reading| reading.level);
        let battery_drain = match (counters.initial_battery_level, current_battery_level) {
            (Some(initial), Some(current)) => Some(i32::from(initial) - i32::from(current)),
            _ => None,
        };

        let resource_cache = self.resource_cache.counters().map(|cache| {
            let lookups = cache.hits.saturating_add(cache.misses);
            CacheMetrics {
                hits: cache.hits,
                misses: cache.misses,
                size: cache.size,
                hit_rate: if lookups == 0 {
                    0.0
                } else {
                    cache.hits as f64 / lookups as f64 * 100.0
                },
            }
        });

        MetricsSnapshot {
            task_execution_count: counters.task_execution_count,
            total_task_execution_time: counters.total_task_execution_time_ms,
            avg_task_execution_time,
            tasks: state
                .tasks
                .iter()
                .map(|(task_id, stats)| (task_id.clone(), TaskStatsView::from(stats)))
                .collect(),
            notification_update_count: counters.notification_update_count,
            location_update_count: counters.location_update_count,
            location: LocationMetrics {
                update_count: counters.location_update_count,
                total_distance_km: counters.location_total_distance_km,
                first_update_time: counters.location_first_update_ms,
                last_update_time: counters.location_last_update_ms,
            },
            geofence_trigger_count: counters.geofence_trigger_count,
            geofences: GeofenceMetrics {
                total_triggers: counters.geofence_trigger_count,
                triggers_by_type: counters.geofence_triggers_by_type.clone(),
            },
            service_uptime: uptime_ms,
            service_uptime_hours: uptime_hours,
            service: ServiceMetrics {
                total_uptime_ms: uptime_ms,
                total_uptime_hours: uptime_hours,
                notification_update_count: counters.notification_update_count,
                is_running: counters.service_started_at_ms.is_some(),
            },
            current_battery_level,
            battery_drain,
            battery: battery.map(|reading| BatteryMetrics {
                battery_level: reading.level,
                is_charging: reading.is_charging,
            }),
            resource_cache,
        }
    }

    /// Zeroes every counter and drops per-task stats. Registrations are not
    /// touched. A running service keeps being tracked from now on.
    pub async fn reset_metrics(&self) -> Result<(), StoreError> {
        let mut state = self.inner.lock().await;

        let mut counters = MetricsCounters::default();
        if state.counters.service_started_at_ms.is_some() {
            counters.service_started_at_ms = Some(now_ms());
            counters.initial_battery_level = self.battery.reading().map(|reading| reading.level);
        }

        self.db
            .commit(vec![
                StoreOp::delete_prefix(keys::METRICS_TASKS),
                StoreOp::put_record(keys::METRICS_COUNTERS, &counters)?,
            ])
            .await?;

        state.counters = counters;
        state.tasks.clear();
        log_info!("All metrics reset");
        Ok(())
    }

    async fn commit_counters<F>(&self, mut staged: Vec<StoreOp>, update: F) -> Result<(), StoreError>
    where
        F: FnOnce(&mut MetricsCounters),
    {
        let mut state = self.inner.lock().await;
        let mut counters = state.counters.clone();
        update(&mut counters);

        staged.push(StoreOp::put_record(keys::METRICS_COUNTERS, &counters)?);
        self.db.commit(staged).await?;

        state.counters = counters;
        Ok(())
    }
}

fn elapsed_ms(from_ms: i64, to_ms: i64) -> u64 {
    u64::try_from(to_ms.saturating_sub(from_ms)).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::{BatteryReading, CacheCounters};
    use crate::test_support::{FakeBattery, FakeResourceCache};

    async fn aggregator(db: Database) -> MetricsAggregator {
        MetricsAggregator::load(
            db,
            Arc::new(FakeBattery::new(None)),
            Arc::new(FakeResourceCache::new(None)),
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn empty_metrics_never_divide_by_zero() {
        let metrics = aggregator(Database::open_in_memory().unwrap()).await;
        let snapshot = metrics.get_metrics().await;

        assert_eq!(snapshot.task_execution_count, 0);
        assert_eq!(snapshot.avg_task_execution_time, 0.0);
        assert_eq!(snapshot.service_uptime, 0);
        assert!(snapshot.resource_cache.is_none());
        assert!(snapshot.battery.is_none());
    }

    #[tokio::test]
    async fn task_executions_accumulate_per_task() {
        let metrics = aggregator(Database::open_in_memory().unwrap()).await;
        metrics.record_task_execution(Vec::new(), "a", 100, 10).await.unwrap();
        metrics.record_task_execution(Vec::new(), "a", 300, 20).await.unwrap();
        metrics.record_task_execution(Vec::new(), "b", 50, 30).await.unwrap();

        let snapshot = metrics.get_metrics().await;
        assert_eq!(snapshot.task_execution_count, 3);
        assert_eq!(snapshot.total_task_execution_time, 450);
        assert_eq!(snapshot.avg_task_execution_time, 150.0);
        assert_eq!(snapshot.tasks["a"].execution_count, 2);
        assert_eq!(snapshot.tasks["a"].average_time_ms, 200.0);
        assert_eq!(snapshot.tasks["a"].last_execution_time, 20);

        let b = metrics.get_task_stats("b").await.unwrap();
        assert_eq!(b.execution_count, 1);
        assert_eq!(b.total_time_ms, 50);
    }

    #[tokio::test]
    async fn counters_survive_reload() {
        let db = Database::open_in_memory().unwrap();
        {
            let metrics = aggregator(db.clone()).await;
            metrics.record_task_execution(Vec::new(), "a", 10, 1).await.unwrap();
            metrics.record_geofence_trigger(TransitionKind::Enter).await.unwrap();
            metrics.record_notification_update(Vec::new()).await.unwrap();
        }

        let reloaded = aggregator(db).await.get_metrics().await;
        assert_eq!(reloaded.task_execution_count, 1);
        assert_eq!(reloaded.geofence_trigger_count, 1);
        assert_eq!(reloaded.geofences.triggers_by_type["ENTER"], 1);
        assert_eq!(reloaded.notification_update_count, 1);
        assert_eq!(reloaded.tasks["a"].execution_count, 1);
    }

    #[tokio::test]
    async fn uptime_accumulates_across_sessions() {
        let metrics = aggregator(Database::open_in_memory().unwrap()).await;

        metrics.record_service_start(Vec::new(), 1_000).await.unwrap();
        // A second start while running keeps the first anchor.
        metrics.record_service_start(Vec::new(), 5_000).await.unwrap();
        metrics.record_service_stop(Vec::new(), 3_601_000).await.unwrap();

        let snapshot = metrics.get_metrics().await;
        assert_eq!(snapshot.service_uptime, 3_600_000);
        assert_eq!(snapshot.service_uptime_hours, 1.0);
        assert_eq!(snapshot.notification_update_count, 2);
        assert!(!snapshot.service.is_running);

        // Stopping twice is harmless.
        metrics.record_service_stop(Vec::new(), 9_999_999).await.unwrap();
        assert_eq!(metrics.get_metrics().await.service_uptime, 3_600_000);
    }

    #[tokio::test]
    async fn battery_drain_and_cache_hit_rate() {
        let battery = Arc::new(FakeBattery::new(Some(BatteryReading {
            level: 80,
            is_charging: false,
        })));
        let cache = Arc::new(FakeResourceCache::new(Some(CacheCounters {
            hits: 3,
            misses: 1,
            size: 4,
        })));
        let metrics = MetricsAggregator::load(
            Database::open_in_memory().unwrap(),
            battery.clone(),
            cache,
        )
        .await
        .unwrap();

        metrics.record_service_start(Vec::new(), now_ms()).await.unwrap();
        battery.set(Some(BatteryReading {
            level: 72,
            is_charging: true,
        }));

        let snapshot = metrics.get_metrics().await;
        assert_eq!(snapshot.current_battery_level, Some(72));
        assert_eq!(snapshot.battery_drain, Some(8));
        assert!(snapshot.battery.unwrap().is_charging);

        let cache = snapshot.resource_cache.unwrap();
        assert_eq!(cache.hit_rate, 75.0);
        assert_eq!(cache.size, 4);
    }

    #[tokio::test]
    async fn huge_cache_counters_do_not_overflow() {
        let cache = Arc::new(FakeResourceCache::new(Some(CacheCounters {
            hits: u64::MAX,
            misses: 10,
            size: 1,
        })));
        let metrics = MetricsAggregator::load(
            Database::open_in_memory().unwrap(),
            Arc::new(FakeBattery::new(None)),
            cache,
        )
        .await
        .unwrap();

        let cache = metrics.get_metrics().await.resource_cache.unwrap();
        assert_eq!(cache.hits, u64::MAX);
        assert!(cache.hit_rate > 99.0 && cache.hit_rate <= 100.0);
    }

    #[tokio::test]
    async fn location_updates_track_distance() {
        let metrics = aggregator(Database::open_in_memory().unwrap()).await;
        metrics.record_location_update(1.5).await.unwrap();
        metrics.record_location_update(f64::NAN).await.unwrap();

        let snapshot = metrics.get_metrics().await;
        assert_eq!(snapshot.location_update_count, 2);
        assert_eq!(snapshot.location.total_distance_km, 1.5);
        assert!(snapshot.location.first_update_time.is_some());
    }

    #[tokio::test]
    async fn reset_clears_counters_and_task_stats() {
        let db = Database::open_in_memory().unwrap();
        let metrics = aggregator(db.clone()).await;
        metrics.record_task_execution(Vec::new(), "a", 10, 1).await.unwrap();
        metrics.record_location_update(2.0).await.unwrap();

        metrics.reset_metrics().await.unwrap();

        let snapshot = metrics.get_metrics().await;
        assert_eq!(snapshot.task_execution_count, 0);
        assert_eq!(snapshot.avg_task_execution_time, 0.0);
        assert!(snapshot.tasks.is_empty());
        assert_eq!(snapshot.location_update_count, 0);
        assert!(db.list_by_prefix(keys::METRICS_TASKS).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn failed_commit_leaves_counters_untouched() {
        let db = Database::open_in_memory().unwrap();
        let metrics = aggregator(db.clone()).await;
        metrics.record_notification_update(Vec::new()).await.unwrap();

        crate::test_support::make_read_only(&db).await;
        assert!(metrics.record_notification_update(Vec::new()).await.is_err());

        assert_eq!(metrics.get_metrics().await.notification_update_count, 1);
    }
}
