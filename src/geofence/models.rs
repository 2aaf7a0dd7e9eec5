use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};

/// A circular region watched for entry and exit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeofenceRegion {
    pub id: String,
    pub latitude: f64,
    pub longitude: f64,
    pub radius_meters: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_enter_action: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_exit_action: Option<String>,
    #[serde(default)]
    pub extras: BTreeMap<String, String>,
}

impl GeofenceRegion {
    pub fn new(id: impl Into<String>, latitude: f64, longitude: f64, radius_meters: f64) -> Self {
        Self {
            id: id.into(),
            latitude,
            longitude,
            radius_meters,
            on_enter_action: None,
            on_exit_action: None,
            extras: BTreeMap::new(),
        }
    }

    pub fn with_actions(mut self, on_enter: Option<&str>, on_exit: Option<&str>) -> Self {
        self.on_enter_action = on_enter.map(str::to_string);
        self.on_exit_action = on_exit.map(str::to_string);
        self
    }

    /// Coordinates must be finite and within WGS84 bounds; the radius must lie
    /// in `(0, max_radius_m]`.
    pub fn validate(&self, max_radius_m: f64) -> Result<()> {
        if self.id.trim().is_empty() {
            return Err(EngineError::MissingField("id"));
        }
        if !self.latitude.is_finite() || !(-90.0..=90.0).contains(&self.latitude) {
            return Err(EngineError::InvalidGeometry(format!(
                "latitude {} is outside [-90, 90]",
                self.latitude
            )));
        }
        if !self.longitude.is_finite() || !(-180.0..=180.0).contains(&self.longitude) {
            return Err(EngineError::InvalidGeometry(format!(
                "longitude {} is outside [-180, 180]",
                self.longitude
            )));
        }
        if !self.radius_meters.is_finite()
            || self.radius_meters <= 0.0
            || self.radius_meters > max_radius_m
        {
            return Err(EngineError::InvalidGeometry(format!(
                "radius {}m is outside (0, {max_radius_m}]",
                self.radius_meters
            )));
        }
        Ok(())
    }

    /// The action configured for `kind`, ignoring blank strings.
    pub fn action_for(&self, kind: TransitionKind) -> Option<&str> {
        let action = match kind {
            TransitionKind::Enter => self.on_enter_action.as_deref(),
            TransitionKind::Exit => self.on_exit_action.as_deref(),
        };
        action.filter(|action| !action.is_empty())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TransitionKind {
    Enter,
    Exit,
}

impl TransitionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransitionKind::Enter => "ENTER",
            TransitionKind::Exit => "EXIT",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MAX: f64 = 100_000.0;

    #[test]
    fn radius_bounds() {
        assert!(GeofenceRegion::new("home", 48.85, 2.35, 0.0).validate(MAX).is_err());
        assert!(GeofenceRegion::new("home", 48.85, 2.35, -5.0).validate(MAX).is_err());
        assert!(GeofenceRegion::new("home", 48.85, 2.35, 100.0).validate(MAX).is_ok());
        assert!(GeofenceRegion::new("home", 48.85, 2.35, MAX).validate(MAX).is_ok());
        assert!(GeofenceRegion::new("home", 48.85, 2.35, MAX + 1.0).validate(MAX).is_err());
        assert!(GeofenceRegion::new("home", 48.85, 2.35, f64::NAN).validate(MAX).is_err());
    }

    #[test]
    fn coordinate_bounds() {
        assert!(GeofenceRegion::new("p", 90.0, 180.0, 10.0).validate(MAX).is_ok());
        assert!(GeofenceRegion::new("p", -90.0, -180.0, 10.0).validate(MAX).is_ok());
        assert!(matches!(
            GeofenceRegion::new("p", 90.1, 0.0, 10.0).validate(MAX),
            Err(EngineError::InvalidGeometry(_))
        ));
        assert!(matches!(
            GeofenceRegion::new("p", 0.0, -180.5, 10.0).validate(MAX),
            Err(EngineError::InvalidGeometry(_))
        ));
        assert!(matches!(
            GeofenceRegion::new("", 0.0, 0.0, 10.0).validate(MAX),
            Err(EngineError::MissingField("id"))
        ));
    }

    #[test]
    fn blank_actions_count_as_unset() {
        let region =
            GeofenceRegion::new("office", 0.0, 0.0, 50.0).with_actions(Some("ARRIVED"), Some(""));
        assert_eq!(region.action_for(TransitionKind::Enter), Some("ARRIVED"));
        assert_eq!(region.action_for(TransitionKind::Exit), None);
    }

    #[test]
    fn transition_kind_wire_names() {
        assert_eq!(serde_json::to_value(TransitionKind::Enter).unwrap(), "ENTER");
        let kind: TransitionKind = serde_json::from_str("\"EXIT\"").unwrap();
        assert_eq!(kind, TransitionKind::Exit);
    }
}
