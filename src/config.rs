use std::{path::PathBuf, time::Duration};

use log::warn;

/// Tunables for one engine instance.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Directory holding the SQLite file; created on open.
    pub data_dir: PathBuf,
    pub database_file: String,

    /// Upper bound for `radiusMeters`; the lower bound is always exclusive zero.
    pub max_geofence_radius_m: f64,

    /// Cadence of the elapsed-time heartbeat while the service is active
    pub heartbeat_interval: Duration,
    pub heartbeat_enabled: bool,

    /// Logs every heartbeat tick instead of one in sixty.
    pub debug: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("."),
            database_file: "fgservice.sqlite3".into(),
            max_geofence_radius_m: 100_000.0,
            heartbeat_interval: Duration::from_secs(1),
            heartbeat_enabled: true,
            debug: false,
        }
    }
}

impl EngineConfig {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            ..Self::default()
        }
    }

    /// Like [`EngineConfig::new`], then overlays `FGSERVICE_DEBUG`,
    /// `FGSERVICE_HEARTBEAT_MS` and `FGSERVICE_MAX_GEOFENCE_RADIUS_M`.
    pub fn from_env(data_dir: impl Into<PathBuf>) -> Self {
        let mut config = Self::new(data_dir);
        config.apply_overrides(|name| std::env::var(name).ok());
        config
    }

    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join(&self.database_file)
    }

    fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup("FGSERVICE_DEBUG") {
            self.debug = value == "1" || value.eq_ignore_ascii_case("true");
        }

        if let Some(value) = lookup("FGSERVICE_HEARTBEAT_MS") {
            match value.parse::<u64>() {
                Ok(0) => self.heartbeat_enabled = false,
                Ok(ms) => self.heartbeat_interval = Duration::from_millis(ms),
                Err(_) => warn!("Ignoring FGSERVICE_HEARTBEAT_MS={value}: not an integer"),
            }
        }

        if let Some(value) = lookup("FGSERVICE_MAX_GEOFENCE_RADIUS_M") {
            match value.parse::<f64>() {
                Ok(radius) if radius.is_finite() && radius > 0.0 => {
                    self.max_geofence_radius_m = radius
                }
                _ => warn!("Ignoring FGSERVICE_MAX_GEOFENCE_RADIUS_M={value}: not a positive number"),
            }
        }
    }
}
