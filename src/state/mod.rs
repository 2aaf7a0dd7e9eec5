//! App lifecycle states and the notification content each one shows.

pub mod machine;
pub mod models;

pub use machine::{StateChange, StateMachine};
pub use models::{default_configs, AppState, StateConfig, TransitionTable};
