//! Narrow interfaces to the OS facilities the engine drives but does not own.
//!
//! The host bridge implements these for Android or iOS and hands them to
//! [`crate::Engine::open`]. Calls are best-effort: a failing collaborator is
//! logged and never rolls back engine state, since the OS projection is
//! rebuilt from the store by the `restore` paths.

use std::sync::Arc;

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};

use crate::geofence::GeofenceRegion;

/// Wakes the process for a registered task at roughly the requested cadence.
pub trait WakeScheduler: Send + Sync {
    /// Replaces any earlier request for the same `task_id`.
    fn schedule_wake(&self, task_id: &str, interval_ms: u64) -> Result<()>;
    fn cancel_wake(&self, task_id: &str) -> Result<()>;
}

/// Watches circular regions and reports transitions back through
/// [`crate::geofence::GeofenceManager::on_region_transition`].
pub trait RegionMonitor: Send + Sync {
    /// Replaces any earlier projection with the same id.
    fn start_monitoring(&self, region: &GeofenceRegion) -> Result<()>;
    fn stop_monitoring(&self, id: &str) -> Result<()>;
}

pub trait PermissionCheck: Send + Sync {
    fn location_authorized(&self) -> bool;
}

pub trait LocationUpdates: Send + Sync {
    fn start_updates(&self) -> Result<()>;
    fn stop_updates(&self) -> Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatteryReading {
    /// 0-100
    pub level: u8,
    pub is_charging: bool,
}

pub trait BatteryMonitor: Send + Sync {
    fn reading(&self) -> Option<BatteryReading>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheCounters {
    pub hits: u64,
    pub misses: u64,
    pub size: u64,
}

/// Hit/miss counters of the host's resource-id cache, when it has one.
pub trait ResourceCacheStats: Send + Sync {
    fn counters(&self) -> Option<CacheCounters>;
}

/// Every collaborator the engine talks to.
#[derive(Clone)]
pub struct Platform {
    pub wake: Arc<dyn WakeScheduler>,
    pub regions: Arc<dyn RegionMonitor>,
    pub permissions: Arc<dyn PermissionCheck>,
    pub location: Arc<dyn LocationUpdates>,
    pub battery: Arc<dyn BatteryMonitor>,
    pub resource_cache: Arc<dyn ResourceCacheStats>,
}

impl Default for Platform {
    fn default() -> Self {
        let unsupported = Arc::new(Unsupported);
        Self {
            wake: unsupported.clone(),
            regions: unsupported.clone(),
            permissions: unsupported.clone(),
            location: unsupported.clone(),
            battery: unsupported.clone(),
            resource_cache: unsupported,
        }
    }
}

/// Stand-in for hosts lacking a facility: schedules nothing, authorizes nothing.
pub struct Unsupported;

impl WakeScheduler for Unsupported {
    fn schedule_wake(&self, task_id: &str, _interval_ms: u64) -> Result<()> {
        bail!("no wake scheduler on this platform (task {task_id})")
    }

    fn cancel_wake(&self, _task_id: &str) -> Result<()> {
        Ok(())
    }
}

impl RegionMonitor for Unsupported {
    fn start_monitoring(&self, region: &GeofenceRegion) -> Result<()> {
        bail!("no region monitor on this platform (geofence {})", region.id)
    }

    fn stop_monitoring(&self, _id: &str) -> Result<()> {
        Ok(())
    }
}

impl PermissionCheck for Unsupported {
    fn location_authorized(&self) -> bool {
        false
    }
}

impl LocationUpdates for Unsupported {
    fn start_updates(&self) -> Result<()> {
        bail!("no location provider on this platform")
    }

    fn stop_updates(&self) -> Result<()> {
        Ok(())
    }
}

impl BatteryMonitor for Unsupported {
    fn reading(&self) -> Option<BatteryReading> {
        None
    }
}

impl ResourceCacheStats for Unsupported {
    fn counters(&self) -> Option<CacheCounters> {
        None
    }
}
