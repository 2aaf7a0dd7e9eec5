//! Geographic regions monitored for entry and exit.

pub mod manager;
pub mod models;

pub use manager::{GeofenceManager, TransitionOutcome};
pub use models::{GeofenceRegion, TransitionKind};
