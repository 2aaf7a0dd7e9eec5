use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::notification::{NotificationButton, NotificationState, NotificationUpdate};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AppState {
    /// Service stopped.
    Offline,
    /// Service running and available.
    Online,
    OnRide,
    WaitingPickup,
    Driving,
    Arrived,
    Completed,
    /// Anything the host names that is not listed above.
    Custom,
}

impl AppState {
    pub const ALL: [AppState; 8] = [
        AppState::Offline,
        AppState::Online,
        AppState::OnRide,
        AppState::WaitingPickup,
        AppState::Driving,
        AppState::Arrived,
        AppState::Completed,
        AppState::Custom,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AppState::Offline => "offline",
            AppState::Online => "online",
            AppState::OnRide => "on_ride",
            AppState::WaitingPickup => "waiting_pickup",
            AppState::Driving => "driving",
            AppState::Arrived => "arrived",
            AppState::Completed => "completed",
            AppState::Custom => "custom",
        }
    }

    /// Case-insensitive on both `on_ride` and `ON_RIDE`. Blank means
    /// offline; unknown names map to [`AppState::Custom`].
    pub fn parse(value: &str) -> Self {
        let value = value.trim();
        if value.is_empty() {
            return AppState::Offline;
        }
        Self::ALL
            .into_iter()
            .find(|state| state.as_str().eq_ignore_ascii_case(value))
            .unwrap_or(AppState::Custom)
    }

    pub fn is_initial(&self) -> bool {
        matches!(self, AppState::Online)
    }

    pub fn is_final(&self) -> bool {
        matches!(self, AppState::Arrived | AppState::Completed)
    }
}

/// Which states may follow which. Staying in the same state is always allowed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransitionTable {
    allowed: BTreeMap<AppState, BTreeSet<AppState>>,
}

impl Default for TransitionTable {
    fn default() -> Self {
        use AppState::*;

        let mut table = Self::empty();
        table
            .allow(Offline, Online)
            .allow(Online, OnRide)
            .allow(OnRide, WaitingPickup)
            .allow(OnRide, Driving)
            .allow(WaitingPickup, Driving)
            .allow(WaitingPickup, OnRide)
            .allow(Driving, Arrived)
            .allow(Driving, OnRide)
            .allow(Arrived, Completed)
            .allow(Arrived, Online)
            .allow(Completed, Online);

        // Emergency stop from anywhere.
        for state in AppState::ALL {
            if state != Offline {
                table.allow(state, Offline);
            }
        }
        table
    }
}

impl TransitionTable {
    pub fn empty() -> Self {
        Self {
            allowed: BTreeMap::new(),
        }
    }

    pub fn allow(&mut self, from: AppState, to: AppState) -> &mut Self {
        self.allowed.entry(from).or_default().insert(to);
        self
    }

    pub fn forbid(&mut self, from: AppState, to: AppState) -> &mut Self {
        if let Some(targets) = self.allowed.get_mut(&from) {
            targets.remove(&to);
        }
        self
    }

    pub fn is_allowed(&self, from: AppState, to: AppState) -> bool {
        from == to
            || self
                .allowed
                .get(&from)
                .is_some_and(|targets| targets.contains(&to))
    }

    /// Sorted in declaration order of [`AppState`].
    pub fn allowed_from(&self, from: AppState) -> Vec<AppState> {
        self.allowed
            .get(&from)
            .map(|targets| targets.iter().copied().collect())
            .unwrap_or_default()
    }
}

/// Notification content shown while the app is in one state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StateConfig {
    pub layout: Option<String>,
    pub title_view_id: Option<String>,
    pub subtitle_view_id: Option<String>,
    pub timer_view_id: Option<String>,
    pub title: Option<String>,
    pub subtitle: Option<String>,
    pub enable_location: bool,
    pub sounds_enabled: bool,
    pub view_data: Option<BTreeMap<String, String>>,
    pub buttons: Option<Vec<NotificationButton>>,
}

impl StateConfig {
    fn preset(
        layout: &str,
        (title_view_id, subtitle_view_id, timer_view_id): (&str, &str, &str),
        title: &str,
        subtitle: &str,
        enable_location: bool,
        sounds_enabled: bool,
    ) -> Self {
        Self {
            layout: Some(layout.into()),
            title_view_id: Some(title_view_id.into()),
            subtitle_view_id: Some(subtitle_view_id.into()),
            timer_view_id: Some(timer_view_id.into()),
            title: Some(title.into()),
            subtitle: Some(subtitle.into()),
            enable_location,
            sounds_enabled,
            view_data: None,
            buttons: None,
        }
    }

    /// Merge applied to a running service. Unset fields keep what the
    /// notification already shows.
    pub fn to_update(&self) -> NotificationUpdate {
        NotificationUpdate {
            title: self.title.clone(),
            subtitle: self.subtitle.clone(),
            custom_layout: self.layout.clone(),
            title_view_id: self.title_view_id.clone(),
            subtitle_view_id: self.subtitle_view_id.clone(),
            timer_view_id: self.timer_view_id.clone(),
            view_data: self.view_data.clone(),
            buttons: self.buttons.clone(),
            sounds_enabled: Some(self.sounds_enabled),
            location_enabled: Some(self.enable_location),
        }
    }

    /// Baseline for starting the service in `state`. A missing title falls
    /// back to the state name.
    pub fn to_state(&self, state: AppState) -> NotificationState {
        let title = self
            .title
            .clone()
            .filter(|title| !title.trim().is_empty())
            .unwrap_or_else(|| state.as_str().to_string());

        NotificationState {
            title,
            subtitle: self.subtitle.clone(),
            custom_layout: self.layout.clone(),
            title_view_id: self.title_view_id.clone(),
            subtitle_view_id: self.subtitle_view_id.clone(),
            timer_view_id: self.timer_view_id.clone(),
            view_data: self.view_data.clone().unwrap_or_default(),
            buttons: self.buttons.clone().unwrap_or_default(),
            sounds_enabled: self.sounds_enabled,
            location_enabled: self.enable_location,
        }
    }
}

/// Built-in notification content for the ride lifecycle.
pub fn default_configs() -> BTreeMap<AppState, StateConfig> {
    BTreeMap::from([
        (
            AppState::Online,
            StateConfig::preset(
                "notification_online",
                ("txtDriverStatus", "txtWaiting", "txtTimer"),
                "Available",
                "Waiting for rides",
                true,
                false,
            ),
        ),
        (
            AppState::OnRide,
            StateConfig::preset(
                "notification_riding",
                ("txtDriverStatus", "txtDestination", "txtElapsedTime"),
                "On a ride",
                "Heading to the destination",
                true,
                false,
            ),
        ),
        (
            AppState::WaitingPickup,
            StateConfig::preset(
                "notification_waiting",
                ("txtWaitingTitle", "txtClientInfo", "txtWaitTime"),
                "Waiting",
                "Waiting for the client",
                true,
                true,
            ),
        ),
        (
            AppState::Driving,
            StateConfig::preset(
                "notification_riding",
                ("txtDriverStatus", "txtDestination", "txtElapsedTime"),
                "Driving",
                "Driving",
                true,
                false,
            ),
        ),
        (
            AppState::Arrived,
            StateConfig::preset(
                "notification_arrived",
                ("txtArrivalTitle", "txtArrivalInfo", "txtArrivalTime"),
                "Arrived",
                "Client picked up",
                true,
                true,
            ),
        ),
        (
            AppState::Completed,
            StateConfig::preset(
                "notification_default",
                ("txtTitle", "txtSubtitle", "txtTimer"),
                "Ride completed",
                "Mission completed",
                false,
                true,
            ),
        ),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_is_lenient() {
        assert_eq!(AppState::parse("on_ride"), AppState::OnRide);
        assert_eq!(AppState::parse("WAITING_PICKUP"), AppState::WaitingPickup);
        assert_eq!(AppState::parse(" Online "), AppState::Online);
        assert_eq!(AppState::parse("boarding"), AppState::Custom);
        assert_eq!(AppState::parse("  "), AppState::Offline);
    }

    #[test]
    fn serde_uses_snake_case_names() {
        assert_eq!(
            serde_json::to_value(AppState::WaitingPickup).unwrap(),
            "waiting_pickup"
        );
        let state: AppState = serde_json::from_str("\"on_ride\"").unwrap();
        assert_eq!(state, AppState::OnRide);
    }

    #[test]
    fn default_table_follows_the_ride_lifecycle() {
        let table = TransitionTable::default();
        assert!(table.is_allowed(AppState::Offline, AppState::Online));
        assert!(table.is_allowed(AppState::Driving, AppState::Arrived));
        assert!(!table.is_allowed(AppState::Offline, AppState::Driving));
        assert!(!table.is_allowed(AppState::Completed, AppState::Driving));
        assert!(!table.is_allowed(AppState::Offline, AppState::Custom));
        assert!(table.is_allowed(AppState::Custom, AppState::Offline));
        assert!(table.is_allowed(AppState::Driving, AppState::Driving));

        assert_eq!(
            table.allowed_from(AppState::OnRide),
            vec![AppState::Offline, AppState::WaitingPickup, AppState::Driving]
        );
        assert_eq!(table.allowed_from(AppState::Offline), vec![AppState::Online]);
    }

    #[test]
    fn custom_tables_can_be_edited() {
        let mut table = TransitionTable::empty();
        assert!(table.allowed_from(AppState::Online).is_empty());
        assert!(table.is_allowed(AppState::Online, AppState::Online));

        table.allow(AppState::Online, AppState::Custom);
        assert!(table.is_allowed(AppState::Online, AppState::Custom));
        table.forbid(AppState::Online, AppState::Custom);
        assert!(!table.is_allowed(AppState::Online, AppState::Custom));
    }

    #[test]
    fn initial_and_final_states() {
        assert!(AppState::Online.is_initial());
        assert!(!AppState::OnRide.is_initial());
        assert!(AppState::Completed.is_final());
        assert!(AppState::Arrived.is_final());
        assert!(!AppState::Driving.is_final());
    }

    #[test]
    fn config_maps_onto_notification() {
        let config = default_configs()[&AppState::WaitingPickup].clone();

        let update = config.to_update();
        assert_eq!(update.title.as_deref(), Some("Waiting"));
        assert_eq!(update.custom_layout.as_deref(), Some("notification_waiting"));
        assert_eq!(update.sounds_enabled, Some(true));
        assert!(update.view_data.is_none());

        let state = StateConfig::default().to_state(AppState::Custom);
        assert_eq!(state.title, "custom");
        assert!(!state.location_enabled);
    }
}
