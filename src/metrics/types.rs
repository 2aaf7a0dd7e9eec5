use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Per-task execution bookkeeping, persisted under `metrics/task/<id>`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskExecutionStats {
    pub task_id: String,
    pub execution_count: u64,
    pub total_time_ms: u64,
    pub last_execution_timestamp_ms: i64,
}

impl TaskExecutionStats {
    pub fn new(task_id: &str) -> Self {
        Self {
            task_id: task_id.to_string(),
            execution_count: 0,
            total_time_ms: 0,
            last_execution_timestamp_ms: 0,
        }
    }

    pub fn average_time_ms(&self) -> f64 {
        if self.execution_count == 0 {
            0.0
        } else {
            self.total_time_ms as f64 / self.execution_count as f64
        }
    }
}

/// Running counters, persisted as one record under `metrics/counters`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MetricsCounters {
    pub task_execution_count: u64,
    pub total_task_execution_time_ms: u64,
    pub notification_update_count: u64,
    pub location_update_count: u64,
    pub location_total_distance_km: f64,
    pub location_first_update_ms: Option<i64>,
    pub location_last_update_ms: Option<i64>,
    pub geofence_trigger_count: u64,
    pub geofence_triggers_by_type: BTreeMap<String, u64>,
    pub service_uptime_accumulated_ms: u64,
    /// Present only while the service is active.
    pub service_started_at_ms: Option<i64>,
    pub initial_battery_level: Option<u8>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskStatsView {
    pub task_id: String,
    pub execution_count: u64,
    pub total_time_ms: u64,
    pub average_time_ms: f64,
    pub last_execution_time: i64,
}

impl From<&TaskExecutionStats> for TaskStatsView {
    fn from(stats: &TaskExecutionStats) -> Self {
        Self {
            task_id: stats.task_id.clone(),
            execution_count: stats.execution_count,
            total_time_ms: stats.total_time_ms,
            average_time_ms: stats.average_time_ms(),
            last_execution_time: stats.last_execution_timestamp_ms,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LocationMetrics {
    pub update_count: u64,
    pub total_distance_km: f64,
    pub first_update_time: Option<i64>,
    pub last_update_time: Option<i64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GeofenceMetrics {
    pub total_triggers: u64,
    pub triggers_by_type: BTreeMap<String, u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceMetrics {
    pub total_uptime_ms: u64,
    pub total_uptime_hours: f64,
    pub notification_update_count: u64,
    pub is_running: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatteryMetrics {
    pub battery_level: u8,
    pub is_charging: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheMetrics {
    pub hits: u64,
    pub misses: u64,
    pub size: u64,
    /// Percentage, 0 when nothing was looked up yet.
    pub hit_rate: f64,
}

/// Computed on every `get_metrics`; never stored.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsSnapshot {
    pub task_execution_count: u64,
    pub total_task_execution_time: u64,
    pub avg_task_execution_time: f64,
    pub tasks: BTreeMap<String, TaskStatsView>,

    pub notification_update_count: u64,

    pub location_update_count: u64,
    pub location: LocationMetrics,

    pub geofence_trigger_count: u64,
    pub geofences: GeofenceMetrics,

    /// Milliseconds
    pub service_uptime: u64,
    pub service_uptime_hours: f64,
    pub service: ServiceMetrics,

    pub current_battery_level: Option<u8>,
    pub battery_drain: Option<i32>,
    pub battery: Option<BatteryMetrics>,

    pub resource_cache: Option<CacheMetrics>,
}
