use chrono::Utc;
use serde::{de::DeserializeOwned, Serialize};

use crate::error::StoreError;

/// Milliseconds since the Unix epoch.
pub fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

pub fn encode<T: Serialize>(key: &str, record: &T) -> Result<String, StoreError> {
    serde_json::to_string(record)
        .map_err(|err| StoreError::WriteFailed(format!("failed to encode {key}: {err}")))
}

pub fn decode<T: DeserializeOwned>(key: &str, raw: &str) -> Result<T, StoreError> {
    serde_json::from_str(raw).map_err(|err| StoreError::Corrupt {
        key: key.to_string(),
        reason: err.to_string(),
    })
}
