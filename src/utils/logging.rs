//! Gated logging macros.
//!
//! A module opts in by declaring its own switch before using the macros:
//! ```ignore
//! const ENABLE_LOGS: bool = true;
//!
//! use crate::{log_info, log_warn};
//!
//! log_info!("task {} registered", task_id);
//! ```
//!
//! Lines keep the default `fgservice::<module>` target, so hosts can filter the
//! engine with `RUST_LOG=fgservice=debug`.

/// Debug-level line, emitted only when the calling module's `ENABLE_LOGS` is on.
#[macro_export]
macro_rules! log_debug {
    ($($arg:tt)*) => {
        if ENABLE_LOGS {
            log::debug!($($arg)*);
        }
    };
}

/// Info-level line, emitted only when the calling module's `ENABLE_LOGS` is on.
#[macro_export]
macro_rules! log_info {
    ($($arg:tt)*) => {
        if ENABLE_LOGS {
            log::info!($($arg)*);
        }
    };
}

/// Warn-level line, emitted only when the calling module's `ENABLE_LOGS` is on.
#[macro_export]
macro_rules! log_warn {
    ($($arg:tt)*) => {
        if ENABLE_LOGS {
            log::warn!($($arg)*);
        }
    };
}

/// Error-level line, emitted only when the calling module's `ENABLE_LOGS` is on.
#[macro_export]
macro_rules! log_error {
    ($($arg:tt)*) => {
        if ENABLE_LOGS {
            log::error!($($arg)*);
        }
    };
}

/// Installs `env_logger` with an `Info` default; `RUST_LOG` overrides it.
/// Safe to call more than once, later calls are ignored.
pub fn init() {
    let _ = env_logger::Builder::new()
        .filter_level(log::LevelFilter::Info)
        .parse_default_env()
        .try_init();
}
