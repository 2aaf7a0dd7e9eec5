//! The service notification: persisted baseline, merge updates, heartbeat.

pub mod controller;
mod heartbeat;
pub mod state;

pub use controller::NotificationController;
pub use state::{
    classify_view_value, format_elapsed, NotificationButton, NotificationState,
    NotificationUpdate, ViewValueKind,
};
