//! Failure values returned by the engine.
//!
//! Validation failures are raised before any state is touched. Store failures
//! mean the logical operation did not happen.

use serde::Serialize;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, EngineError>;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum StoreError {
    #[error("write could not be committed: {0}")]
    WriteFailed(String),

    #[error("read failed: {0}")]
    ReadFailed(String),

    #[error("record '{key}' could not be decoded: {reason}")]
    Corrupt { key: String, reason: String },
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("intervalMs must be at least {min_ms} (got {interval_ms})")]
    InvalidInterval { interval_ms: u64, min_ms: u64 },

    #[error("invalid geometry: {0}")]
    InvalidGeometry(String),

    #[error("{field} must be a #RRGGBB color (got '{value}')")]
    InvalidColor { field: &'static str, value: String },

    #[error("fontSize must be a positive integer (got {0})")]
    InvalidFontSize(i64),

    #[error("{0} is required")]
    MissingField(&'static str),

    #[error("theme name '{0}' is reserved for a built-in theme")]
    ReservedName(String),

    #[error("task '{0}' is not registered")]
    TaskNotFound(String),

    #[error("no handler is registered for '{0}'")]
    HandlerNotFound(String),

    #[error("task '{task_id}' failed: {reason}")]
    TaskFailed { task_id: String, reason: String },

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Coarse classification used by callers deciding whether to retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ErrorKind {
    Validation,
    NotFound,
    ReservedName,
    Execution,
    Store,
}

impl EngineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::InvalidInterval { .. }
            | EngineError::InvalidGeometry(_)
            | EngineError::InvalidColor { .. }
            | EngineError::InvalidFontSize(_)
            | EngineError::MissingField(_) => ErrorKind::Validation,
            EngineError::ReservedName(_) => ErrorKind::ReservedName,
            EngineError::TaskNotFound(_) | EngineError::HandlerNotFound(_) => ErrorKind::NotFound,
            EngineError::TaskFailed { .. } => ErrorKind::Execution,
            EngineError::Store(_) => ErrorKind::Store,
        }
    }

    /// Stable identifier handed across the bridge.
    pub fn code(&self) -> &'static str {
        match self {
            EngineError::InvalidInterval { .. } => "INVALID_INTERVAL",
            EngineError::InvalidGeometry(_) => "INVALID_GEOMETRY",
            EngineError::InvalidColor { .. } => "INVALID_COLOR",
            EngineError::InvalidFontSize(_) => "INVALID_FONT_SIZE",
            EngineError::MissingField(_) => "MISSING_FIELD",
            EngineError::ReservedName(_) => "RESERVED_NAME",
            EngineError::TaskNotFound(_) => "TASK_NOT_FOUND",
            EngineError::HandlerNotFound(_) => "HANDLER_NOT_FOUND",
            EngineError::TaskFailed { .. } => "TASK_FAILED",
            EngineError::Store(StoreError::WriteFailed(_)) => "STORE_WRITE_FAILED",
            EngineError::Store(StoreError::ReadFailed(_)) => "STORE_READ_FAILED",
            EngineError::Store(StoreError::Corrupt { .. }) => "STORE_CORRUPT",
        }
    }
}
