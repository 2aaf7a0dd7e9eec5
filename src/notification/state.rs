use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationButton {
    pub view_id: String,
    pub action: String,
    #[serde(default)]
    pub extras: BTreeMap<String, String>,
}

/// Everything the renderer needs to draw the service notification.
///
/// `view_data` values are loosely typed; see [`classify_view_value`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct NotificationState {
    pub title: String,
    pub subtitle: Option<String>,
    pub custom_layout: Option<String>,
    pub title_view_id: Option<String>,
    pub subtitle_view_id: Option<String>,
    pub timer_view_id: Option<String>,
    pub view_data: BTreeMap<String, String>,
    pub buttons: Vec<NotificationButton>,
    pub sounds_enabled: bool,
    pub location_enabled: bool,
}

impl NotificationState {
    pub fn titled(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Self::default()
        }
    }

    /// Overwrites every field present in `update`. `view_data` and `buttons`
    /// are replaced wholesale, never merged entry by entry.
    pub fn merge(&mut self, update: NotificationUpdate) {
        let NotificationUpdate {
            title,
            subtitle,
            custom_layout,
            title_view_id,
            subtitle_view_id,
            timer_view_id,
            view_data,
            buttons,
            sounds_enabled,
            location_enabled,
        } = update;

        if let Some(title) = title {
            self.title = title;
        }
        if subtitle.is_some() {
            self.subtitle = subtitle;
        }
        if custom_layout.is_some() {
            self.custom_layout = custom_layout;
        }
        if title_view_id.is_some() {
            self.title_view_id = title_view_id;
        }
        if subtitle_view_id.is_some() {
            self.subtitle_view_id = subtitle_view_id;
        }
        if timer_view_id.is_some() {
            self.timer_view_id = timer_view_id;
        }
        if let Some(view_data) = view_data {
            self.view_data = view_data;
        }
        if let Some(buttons) = buttons {
            self.buttons = buttons;
        }
        if let Some(sounds_enabled) = sounds_enabled {
            self.sounds_enabled = sounds_enabled;
        }
        if let Some(location_enabled) = location_enabled {
            self.location_enabled = location_enabled;
        }
    }
}

/// A partial [`NotificationState`]; absent fields keep their stored value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct NotificationUpdate {
    pub title: Option<String>,
    pub subtitle: Option<String>,
    pub custom_layout: Option<String>,
    pub title_view_id: Option<String>,
    pub subtitle_view_id: Option<String>,
    pub timer_view_id: Option<String>,
    pub view_data: Option<BTreeMap<String, String>>,
    pub buttons: Option<Vec<NotificationButton>>,
    pub sounds_enabled: Option<bool>,
    pub location_enabled: Option<bool>,
}

/// How a `view_data` value is meant to be rendered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ViewValueKind {
    /// `data:image...` or `base64,...`
    InlineImage,
    /// `http://` or `https://`
    RemoteImage,
    /// A bundled resource name or literal text; the target view decides.
    Plain,
}

pub fn classify_view_value(value: &str) -> ViewValueKind {
    if value.starts_with("data:image") || value.starts_with("base64,") {
        ViewValueKind::InlineImage
    } else if value.starts_with("http://") || value.starts_with("https://") {
        ViewValueKind::RemoteImage
    } else {
        ViewValueKind::Plain
    }
}

/// `HH:MM:SS`; hours keep growing past 99.
pub fn format_elapsed(elapsed_ms: u64) -> String {
    let total_seconds = elapsed_ms / 1000;
    let hours = total_seconds / 3600;
    let minutes = (total_seconds % 3600) / 60;
    let seconds = total_seconds % 60;
    format!("{hours:02}:{minutes:02}:{seconds:02}")
}

/// What is stored under `notification/state`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub(crate) struct PersistedNotification {
    pub state: NotificationState,
    pub active: bool,
    /// Anchor of the elapsed-time clock, kept across relaunches.
    pub started_at_ms: Option<i64>,
}
