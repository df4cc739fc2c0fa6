//! Component value codec
//!
//! The widget reports its recording as a JSON array of byte values.

use serde_json::Value;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ComponentError {
    #[error("invalid component value: {0}")]
    Json(#[from] serde_json::Error),
}

/// Encodes WAV bytes as the JSON byte array the widget reports
pub fn encode_component_value(bytes: &[u8]) -> Result<String, ComponentError> {
    Ok(serde_json::to_string(bytes)?)
}

/// Decodes a component value.
///
/// Absent, empty or `null` means no recording yet.
pub fn decode_component_value(value: Option<&str>) -> Result<Option<Vec<u8>>, ComponentError> {
    let Some(raw) = value.map(str::trim).filter(|raw| !raw.is_empty()) else {
        return Ok(None);
    };
    match serde_json::from_str::<Value>(raw)? {
        Value::Null => Ok(None),
        other => Ok(Some(serde_json::from_value(other)?)),
    }
}
