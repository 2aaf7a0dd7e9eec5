//! Recording fakes for the platform collaborators.

use std::{
    collections::BTreeMap,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex,
    },
};

use anyhow::{bail, Result};

use crate::{
    db::Database,
    events::{EngineEvent, EventDispatcher, EventKind},
    geofence::GeofenceRegion,
    platform::{
        BatteryMonitor, BatteryReading, CacheCounters, LocationUpdates, PermissionCheck, Platform,
        RegionMonitor, ResourceCacheStats, WakeScheduler,
    },
};

fn locked<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Every later write on `db` fails; reads keep working.
pub async fn make_read_only(db: &Database) {
    db.execute(|conn| {
        conn.execute_batch("PRAGMA query_only = ON;")?;
        Ok(())
    })
    .await
    .unwrap();
}

pub fn record_events(events: &EventDispatcher, kind: EventKind) -> Arc<Mutex<Vec<EngineEvent>>> {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    events.add_listener(kind, move |event| {
        locked(&sink).push(event.clone());
    });
    seen
}

#[derive(Default)]
pub struct FakeWake {
    scheduled: Mutex<BTreeMap<String, u64>>,
    failing: AtomicBool,
}

impl FakeWake {
    /// Current wake-up requests by task id.
    pub fn scheduled(&self) -> BTreeMap<String, u64> {
        locked(&self.scheduled).clone()
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

impl WakeScheduler for FakeWake {
    fn schedule_wake(&self, task_id: &str, interval_ms: u64) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            bail!("scheduler unavailable");
        }
        locked(&self.scheduled).insert(task_id.to_string(), interval_ms);
        Ok(())
    }

    fn cancel_wake(&self, task_id: &str) -> Result<()> {
        locked(&self.scheduled).remove(task_id);
        Ok(())
    }
}

#[derive(Default)]
pub struct FakeRegions {
    monitored: Mutex<BTreeMap<String, GeofenceRegion>>,
    starts: Mutex<Vec<String>>,
    stops: Mutex<Vec<String>>,
}

impl FakeRegions {
    /// Ids currently watched, sorted.
    pub fn monitored(&self) -> Vec<String> {
        locked(&self.monitored).keys().cloned().collect()
    }

    pub fn start_count(&self, id: &str) -> usize {
        locked(&self.starts).iter().filter(|started| *started == id).count()
    }

    /// Every id passed to `stop_monitoring`, in call order.
    pub fn stopped(&self) -> Vec<String> {
        locked(&self.stops).clone()
    }
}

impl RegionMonitor for FakeRegions {
    fn start_monitoring(&self, region: &GeofenceRegion) -> Result<()> {
        locked(&self.starts).push(region.id.clone());
        locked(&self.monitored).insert(region.id.clone(), region.clone());
        Ok(())
    }

    fn stop_monitoring(&self, id: &str) -> Result<()> {
        locked(&self.stops).push(id.to_string());
        locked(&self.monitored).remove(id);
        Ok(())
    }
}

pub struct FakePermissions {
    authorized: AtomicBool,
}

impl FakePermissions {
    pub fn new(authorized: bool) -> Self {
        Self {
            authorized: AtomicBool::new(authorized),
        }
    }

    pub fn set(&self, authorized: bool) {
        self.authorized.store(authorized, Ordering::SeqCst);
    }
}

impl PermissionCheck for FakePermissions {
    fn location_authorized(&self) -> bool {
        self.authorized.load(Ordering::SeqCst)
    }
}

#[derive(Default)]
pub struct FakeLocation {
    running: AtomicBool,
}

impl FakeLocation {
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

impl LocationUpdates for FakeLocation {
    fn start_updates(&self) -> Result<()> {
        self.running.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn stop_updates(&self) -> Result<()> {
        self.running.store(false, Ordering::SeqCst);
        Ok(())
    }
}

pub struct FakeBattery {
    reading: Mutex<Option<BatteryReading>>,
}

impl FakeBattery {
    pub fn new(reading: Option<BatteryReading>) -> Self {
        Self {
            reading: Mutex::new(reading),
        }
    }

    pub fn set(&self, reading: Option<BatteryReading>) {
        *locked(&self.reading) = reading;
    }
}

impl BatteryMonitor for FakeBattery {
    fn reading(&self) -> Option<BatteryReading> {
        *locked(&self.reading)
    }
}

pub struct FakeResourceCache {
    counters: Mutex<Option<CacheCounters>>,
}

impl FakeResourceCache {
    pub fn new(counters: Option<CacheCounters>) -> Self {
        Self {
            counters: Mutex::new(counters),
        }
    }
}

impl ResourceCacheStats for FakeResourceCache {
    fn counters(&self) -> Option<CacheCounters> {
        *locked(&self.counters)
    }
}

/// Handles on the fakes behind a [`Platform`] built by [`fake_platform`].
pub struct Fakes {
    pub wake: Arc<FakeWake>,
    pub regions: Arc<FakeRegions>,
    pub permissions: Arc<FakePermissions>,
    pub location: Arc<FakeLocation>,
    pub battery: Arc<FakeBattery>,
    pub resource_cache: Arc<FakeResourceCache>,
}

pub fn fake_platform() -> (Platform, Fakes) {
    let fakes = Fakes {
        wake: Arc::new(FakeWake::default()),
        regions: Arc::new(FakeRegions::default()),
        permissions: Arc::new(FakePermissions::new(true)),
        location: Arc::new(FakeLocation::default()),
        battery: Arc::new(FakeBattery::new(Some(BatteryReading {
            level: 100,
            is_charging: true,
        }))),
        resource_cache: Arc::new(FakeResourceCache::new(Some(CacheCounters {
            hits: 0,
            misses: 0,
            size: 0,
        }))),
    };
    let platform = Platform {
        wake: fakes.wake.clone(),
        regions: fakes.regions.clone(),
        permissions: fakes.permissions.clone(),
        location: fakes.location.clone(),
        battery: fakes.battery.clone(),
        resource_cache: fakes.resource_cache.clone(),
    };
    (platform, fakes)
}
