//! Key layout of the store. Each prefix is owned by exactly one service.

pub const TASK_DESCRIPTORS: &str = "tasks/descriptor/";
pub const TASK_RESULTS: &str = "tasks/result/";
pub const GEOFENCES: &str = "geofences/";
pub const CUSTOM_THEMES: &str = "themes/custom/";
pub const CURRENT_THEME: &str = "themes/current";
pub const NOTIFICATION_STATE: &str = "notification/state";
pub const METRICS_COUNTERS: &str = "metrics/counters";
pub const METRICS_TASKS: &str = "metrics/task/";
pub const APP_STATE: &str = "state/current";
pub const STATE_CONFIGS: &str = "state/config/";

pub fn task_descriptor(task_id: &str) -> String {
    format!("{TASK_DESCRIPTORS}{task_id}")
}

pub fn task_result(task_id: &str) -> String {
    format!("{TASK_RESULTS}{task_id}")
}

pub fn task_stats(task_id: &str) -> String {
    format!("{METRICS_TASKS}{task_id}")
}

pub fn geofence(id: &str) -> String {
    format!("{GEOFENCES}{id}")
}

pub fn custom_theme(name: &str) -> String {
    format!("{CUSTOM_THEMES}{name}")
}

pub fn state_config(state: &str) -> String {
    format!("{STATE_CONFIGS}{state}")
}
