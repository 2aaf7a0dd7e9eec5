//! Named visual configurations for the notification surface.

pub mod models;
pub mod registry;

pub use models::{built_in_theme, ThemeConfig, BUILT_IN_THEMES, DEFAULT_THEME};
pub use registry::ThemeRegistry;
