use std::{collections::HashMap, sync::Arc};

use tokio::sync::Mutex;

use crate::{
    db::{keys, Database, StoreOp},
    error::Result,
    events::{EngineEvent, EventDispatcher, GeofenceEvent},
    metrics::MetricsAggregator,
    platform::{PermissionCheck, RegionMonitor},
};

use super::{GeofenceRegion, TransitionKind};

const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_info, log_warn};

/// What a region transition led to.
#[derive(Debug, Clone, PartialEq)]
pub enum TransitionOutcome {
    /// Counted and delivered to listeners.
    Dispatched(GeofenceEvent),
    /// Counted; the region has no action for this transition.
    Counted,
    /// No such region any more; monitoring for it was stopped.
    Stale,
}

/// Owns the `geofences/` key-space. The OS monitoring set is a projection of
/// it and is rebuilt by [`GeofenceManager::restore`].
#[derive(Clone)]
pub struct GeofenceManager {
    db: Database,
    metrics: MetricsAggregator,
    events: EventDispatcher,
    regions_monitor: Arc<dyn RegionMonitor>,
    permissions: Arc<dyn PermissionCheck>,
    max_radius_m: f64,
    regions: Arc<Mutex<HashMap<String, GeofenceRegion>>>,
}

impl GeofenceManager {
    pub async fn load(
        db: Database,
        metrics: MetricsAggregator,
        events: EventDispatcher,
        regions_monitor: Arc<dyn RegionMonitor>,
        permissions: Arc<dyn PermissionCheck>,
        max_radius_m: f64,
    ) -> Result<Self> {
        let regions = db
            .list_records::<GeofenceRegion>(keys::GEOFENCES)
            .await?
            .into_iter()
            .collect::<HashMap<_, _>>();

        log_debug!("Loaded {} geofences", regions.len());

        Ok(Self {
            db,
            metrics,
            events,
            regions_monitor,
            permissions,
            max_radius_m,
            regions: Arc::new(Mutex::new(regions)),
        })
    }

    /// Persists `region`, replacing any region with the same id, and arms
    /// monitoring when location access is authorized.
    pub async fn add_geofence(&self, region: GeofenceRegion) -> Result<()> {
        region.validate(self.max_radius_m)?;

        let mut regions = self.regions.lock().await;
        self.db
            .put_record(&keys::geofence(&region.id), &region)
            .await?;

        let replaced = regions.insert(region.id.clone(), region.clone()).is_some();
        if replaced {
            log_debug!("Geofence {} replaced", region.id);
        }

        self.arm(&region);
        log_info!(
            "Geofence added: {} ({}, {}) r={}m",
            region.id,
            region.latitude,
            region.longitude,
            region.radius_meters
        );
        Ok(())
    }

    pub async fn remove_geofence(&self, id: &str) -> Result<()> {
        let mut regions = self.regions.lock().await;
        if !regions.contains_key(id) {
            log_debug!("Geofence {id} not found; nothing to remove");
            return Ok(());
        }

        self.db.delete(&keys::geofence(id)).await?;
        regions.remove(id);
        self.disarm(id);

        log_info!("Geofence removed: {id}");
        Ok(())
    }

    pub async fn remove_all_geofences(&self) -> Result<()> {
        let mut regions = self.regions.lock().await;
        if regions.is_empty() {
            return Ok(());
        }

        self.db
            .commit(vec![StoreOp::delete_prefix(keys::GEOFENCES)])
            .await?;

        let removed: Vec<String> = regions.drain().map(|(id, _)| id).collect();
        for id in &removed {
            self.disarm(id);
        }

        log_info!("All geofences removed ({})", removed.len());
        Ok(())
    }

    pub async fn get_geofence(&self, id: &str) -> Option<GeofenceRegion> {
        self.regions.lock().await.get(id).cloned()
    }

    /// Sorted by id.
    pub async fn list_geofences(&self) -> Vec<GeofenceRegion> {
        let regions = self.regions.lock().await;
        let mut list: Vec<GeofenceRegion> = regions.values().cloned().collect();
        list.sort_by(|a, b| a.id.cmp(&b.id));
        list
    }

    /// Called by the region monitor when the device crosses a boundary.
    ///
    /// Every transition on a known region is counted. An event is dispatched
    /// only when the region carries an action for that transition.
    pub async fn on_region_transition(
        &self,
        id: &str,
        kind: TransitionKind,
    ) -> Result<TransitionOutcome> {
        let event = {
            let regions = self.regions.lock().await;
            let Some(region) = regions.get(id).cloned() else {
                drop(regions);
                log_warn!(
                    "Transition {} for unknown geofence {id}; stopping its monitoring",
                    kind.as_str()
                );
                self.disarm(id);
                return Ok(TransitionOutcome::Stale);
            };

            self.metrics.record_geofence_trigger(kind).await?;

            region.action_for(kind).map(|action| GeofenceEvent {
                geofence_id: region.id.clone(),
                event_type: kind,
                action: action.to_string(),
                latitude: region.latitude,
                longitude: region.longitude,
                extras: region.extras.clone(),
            })
        };

        match event {
            Some(event) => {
                log_info!(
                    "Geofence event: {} -> {} (id: {id})",
                    kind.as_str(),
                    event.action
                );
                self.events
                    .dispatch(&EngineEvent::GeofenceEvent(event.clone()));
                Ok(TransitionOutcome::Dispatched(event))
            }
            None => {
                log_debug!("Geofence {id} {} has no action", kind.as_str());
                Ok(TransitionOutcome::Counted)
            }
        }
    }

    /// Re-arms monitoring for every persisted region after a relaunch.
    /// Returns how many regions are being watched.
    pub async fn restore(&self) -> usize {
        let regions = self.regions.lock().await;
        if regions.is_empty() {
            return 0;
        }
        if !self.permissions.location_authorized() {
            log_warn!(
                "Location not authorized; {} geofence(s) stay unmonitored",
                regions.len()
            );
            return 0;
        }

        let armed = regions.values().filter(|region| self.arm(region)).count();
        log_info!("Restored monitoring for {armed}/{} geofences", regions.len());
        armed
    }

    fn arm(&self, region: &GeofenceRegion) -> bool {
        if !self.permissions.location_authorized() {
            log_warn!(
                "Location not authorized; geofence {} saved but not monitored",
                region.id
            );
            return false;
        }
        match self.regions_monitor.start_monitoring(region) {
            Ok(()) => true,
            Err(err) => {
                log_warn!("Could not start monitoring geofence {}: {err:#}", region.id);
                false
            }
        }
    }

    fn disarm(&self, id: &str) {
        if let Err(err) = self.regions_monitor.stop_monitoring(id) {
            log_warn!("Could not stop monitoring geofence {id}: {err:#}");
        }
    }
}
