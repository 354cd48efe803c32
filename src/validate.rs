//! Reading validator: normalizes a decoded payload into a typed [`Reading`].
//!
//! The validator is deliberately permissive about *absent* data and strict
//! about *malformed* data:
//! - a missing `device_id` (or an empty one) falls back to the `"UNKNOWN"`
//!   sentinel so malformed traffic is still logged and counted;
//! - a missing vital field produces a reading whose `vitals()` is `None`,
//!   which the classification engine turns into a `MISSING_FIELDS` anomaly;
//! - a vital field that is present but not numeric fails the whole ingestion
//!   call with [`PayloadError`] — a client-class error, not an anomaly.
//!
//! Presence is checked explicitly with `Value::get`, never by truthiness, so
//! legitimate zero values (`battery_level: 0`, `signal_strength: 0`) are kept
//! and evaluated by the rule classifier.

use chrono::{DateTime, Utc};
use serde_json::Value;
use thiserror::Error;

use crate::Reading;

// ---

/// Sentinel device id recorded for payloads that do not identify themselves.
pub const UNKNOWN_DEVICE: &str = "UNKNOWN";

/// Rejection reasons for payloads the pipeline cannot classify.
#[derive(Debug, Error)]
pub enum PayloadError {
    #[error("payload must be a JSON object")]
    NotAnObject,
    #[error("field `{0}` must be numeric")]
    NonNumeric(&'static str),
}

// ---

/// Validate a decoded payload and stamp it with its arrival time.
///
/// Extra fields are ignored by classification but preserved verbatim in
/// `raw_payload` for the audit log.
pub fn parse_reading(payload: Value, arrival: DateTime<Utc>) -> Result<Reading, PayloadError> {
    // ---
    let map = payload.as_object().ok_or(PayloadError::NotAnObject)?;

    let device_id = match map.get("device_id").and_then(Value::as_str) {
        Some(id) if !id.is_empty() => id.to_string(),
        _ => UNKNOWN_DEVICE.to_string(),
    };

    let heart_rate = numeric_field(map, "heart_rate")?;
    let body_temp = numeric_field(map, "body_temp")?;
    let signal_strength = numeric_field(map, "signal_strength")?;
    let battery_level = numeric_field(map, "battery_level")?;

    Ok(Reading {
        device_id,
        observed_at: arrival,
        heart_rate,
        body_temp,
        signal_strength,
        battery_level,
        raw_payload: payload,
    })
}

/// Absent is fine (`None`); present-but-non-numeric is a hard rejection.
fn numeric_field(
    map: &serde_json::Map<String, Value>,
    name: &'static str,
) -> Result<Option<f64>, PayloadError> {
    // ---
    match map.get(name) {
        None => Ok(None),
        Some(value) => value
            .as_f64()
            .map(Some)
            .ok_or(PayloadError::NonNumeric(name)),
    }
}
