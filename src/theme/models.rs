use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};

pub const DEFAULT_THEME: &str = "default";

/// Always present, never removable, never overwritable.
pub const BUILT_IN_THEMES: [&str; 6] = ["default", "dark", "blue", "green", "orange", "red"];

pub fn is_built_in(name: &str) -> bool {
    BUILT_IN_THEMES.contains(&name)
}

/// Visual attributes applied to the notification surface.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThemeConfig {
    /// Filled from the registry key when a bridge request leaves it out.
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub background_color: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title_color: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subtitle_color: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accent_color: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon_tint_color: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timer_color: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub button_background_color: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub button_text_color: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub font_size: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub font_family: Option<String>,
}

impl ThemeConfig {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Every set color must be `#RRGGBB`; a set font size must be positive.
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(EngineError::MissingField("name"));
        }

        let colors = [
            ("backgroundColor", &self.background_color),
            ("titleColor", &self.title_color),
            ("subtitleColor", &self.subtitle_color),
            ("accentColor", &self.accent_color),
            ("iconTintColor", &self.icon_tint_color),
            ("timerColor", &self.timer_color),
            ("buttonBackgroundColor", &self.button_background_color),
            ("buttonTextColor", &self.button_text_color),
        ];
        for (field, value) in colors {
            if let Some(value) = value {
                validation::validate_color(value).map_err(|_| EngineError::InvalidColor {
                    field,
                    value: value.clone(),
                })?;
            }
        }

        if let Some(size) = self.font_size {
            if size <= 0 {
                return Err(EngineError::InvalidFontSize(size));
            }
        }

        Ok(())
    }
}

pub mod validation {
    use anyhow::{bail, Result};

    pub fn validate_color(color: &str) -> Result<()> {
        let Some(hex_part) = color.strip_prefix('#') else {
            bail!("Invalid color format. Must be hex (#RRGGBB)");
        };

        if hex_part.len() != 6 {
            bail!("Invalid color format. Must be exactly six hex digits (#RRGGBB)");
        }

        if !hex_part.chars().all(|c| c.is_ascii_hexdigit()) {
            bail!("Invalid color format. Must be hex (#RRGGBB)");
        }

        Ok(())
    }
}

fn palette(name: &str, background: &str, title: &str, subtitle: &str, accent: &str) -> ThemeConfig {
    ThemeConfig {
        name: name.to_string(),
        background_color: Some(background.to_string()),
        title_color: Some(title.to_string()),
        subtitle_color: Some(subtitle.to_string()),
        accent_color: Some(accent.to_string()),
        icon_tint_color: Some(accent.to_string()),
        ..ThemeConfig::default()
    }
}

pub fn built_in_theme(name: &str) -> Option<ThemeConfig> {
    let theme = match name {
        "default" => palette("default", "#FFFFFF", "#000000", "#666666", "#2196F3"),
        "dark" => palette("dark", "#212121", "#FFFFFF", "#B0B0B0", "#64B5F6"),
        "blue" => palette("blue", "#E3F2FD", "#1565C0", "#424242", "#1976D2"),
        // "online"
        "green" => palette("green", "#E8F5E9", "#2E7D32", "#424242", "#4CAF50"),
        // "pending"
        "orange" => palette("orange", "#FFF3E0", "#E65100", "#424242", "#FF9800"),
        // "urgent"
        "red" => palette("red", "#FFEBEE", "#C62828", "#424242", "#F44336"),
        _ => return None,
    };
    Some(theme)
}

pub fn default_theme() -> ThemeConfig {
    palette(DEFAULT_THEME, "#FFFFFF", "#000000", "#666666", "#2196F3")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn color_format() {
        assert!(validation::validate_color("#1A2b3C").is_ok());
        assert!(validation::validate_color("1A2B3C").is_err());
        assert!(validation::validate_color("#1A2B3").is_err());
        assert!(validation::validate_color("#1A2B3C4D").is_err());
        assert!(validation::validate_color("#GGGGGG").is_err());
        assert!(validation::validate_color("").is_err());
    }

    #[test]
    fn invalid_color_names_the_field() {
        let theme = ThemeConfig {
            timer_color: Some("blue".into()),
            ..ThemeConfig::named("corporate")
        };
        match theme.validate() {
            Err(EngineError::InvalidColor { field, value }) => {
                assert_eq!(field, "timerColor");
                assert_eq!(value, "blue");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn font_size_must_be_positive() {
        let theme = ThemeConfig {
            font_size: Some(0),
            ..ThemeConfig::named("tiny")
        };
        assert!(matches!(theme.validate(), Err(EngineError::InvalidFontSize(0))));

        let theme = ThemeConfig {
            font_size: Some(14),
            ..ThemeConfig::named("normal")
        };
        assert!(theme.validate().is_ok());
    }

    #[test]
    fn every_built_in_is_valid() {
        for name in BUILT_IN_THEMES {
            let theme = built_in_theme(name).unwrap();
            assert_eq!(theme.name, name);
            theme.validate().unwrap();
        }
        assert_eq!(built_in_theme("default"), Some(default_theme()));
        assert!(built_in_theme("corporate").is_none());
    }

    #[test]
    fn unset_fields_are_omitted_on_the_wire() {
        let json = serde_json::to_value(ThemeConfig::named("bare")).unwrap();
        assert_eq!(json, serde_json::json!({ "name": "bare" }));
    }
}
