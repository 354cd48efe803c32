//! Domain types for the telemetry pipeline.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;

// ---

/// One validated telemetry sample.
///
/// Constructed once per inbound message by the validator and immutable
/// afterwards. The four vital fields are individually optional at the payload
/// level; a reading missing any of them short-circuits classification to a
/// `MISSING_FIELDS` verdict. The original decoded payload is retained
/// verbatim for the audit log.
#[derive(Debug, Clone)]
pub struct Reading {
    // ---
    pub device_id: String,
    /// Arrival time assigned by the pipeline, never trusted from the payload.
    pub observed_at: DateTime<Utc>,
    pub heart_rate: Option<f64>,
    pub body_temp: Option<f64>,
    pub signal_strength: Option<f64>,
    pub battery_level: Option<f64>,
    pub raw_payload: Value,
}

/// The complete set of vital fields, available only when all four are present.
#[derive(Debug, Clone, Copy)]
pub struct Vitals {
    // ---
    pub heart_rate: f64,
    pub body_temp: f64,
    pub signal_strength: f64,
    pub battery_level: f64,
}

impl Reading {
    /// All four vital fields, or `None` if any is missing from the payload.
    pub fn vitals(&self) -> Option<Vitals> {
        // ---
        Some(Vitals {
            heart_rate: self.heart_rate?,
            body_temp: self.body_temp?,
            signal_strength: self.signal_strength?,
            battery_level: self.battery_level?,
        })
    }
}

impl Vitals {
    /// Fixed-order feature vector consumed by the statistical classifier.
    pub fn features(&self) -> [f64; 4] {
        // ---
        [
            self.heart_rate,
            self.body_temp,
            self.signal_strength,
            self.battery_level,
        ]
    }
}

// ---

/// Closed set of anomaly codes persisted in the audit log.
///
/// The variant order here is the precedence order used when several rule
/// violations fire for the same reading: heart rate beats temperature beats
/// battery beats signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnomalyCode {
    OutOfRangeHr,
    OutOfRangeTemp,
    LowBattery,
    WeakSignal,
    MlAnomaly,
    MissingFields,
}

/// Escalation severity derived from an anomaly code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Critical,
    Warning,
    Info,
}

impl AnomalyCode {
    pub fn as_str(&self) -> &'static str {
        // ---
        match self {
            AnomalyCode::OutOfRangeHr => "OUT_OF_RANGE_HR",
            AnomalyCode::OutOfRangeTemp => "OUT_OF_RANGE_TEMP",
            AnomalyCode::LowBattery => "LOW_BATTERY",
            AnomalyCode::WeakSignal => "WEAK_SIGNAL",
            AnomalyCode::MlAnomaly => "ML_ANOMALY",
            AnomalyCode::MissingFields => "MISSING_FIELDS",
        }
    }

    /// Medical-range and ML verdicts escalate; incomplete payloads do not.
    pub fn severity(&self) -> Severity {
        // ---
        match self {
            AnomalyCode::OutOfRangeHr | AnomalyCode::OutOfRangeTemp | AnomalyCode::MlAnomaly => {
                Severity::Critical
            }
            AnomalyCode::WeakSignal | AnomalyCode::LowBattery => Severity::Warning,
            AnomalyCode::MissingFields => Severity::Info,
        }
    }
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        // ---
        match self {
            Severity::Critical => "CRITICAL",
            Severity::Warning => "WARNING",
            Severity::Info => "INFO",
        }
    }
}

// ---

/// Which classification stage produced the verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerdictSource {
    Rule,
    Ml,
    None,
}

/// Classification outcome for one reading.
///
/// `anomaly_type` carries the single reported code; `rule_violations` keeps
/// the full ordered set of fired rules for the audit log line.
#[derive(Debug, Clone)]
pub struct Verdict {
    // ---
    pub is_anomaly: bool,
    pub anomaly_type: Option<AnomalyCode>,
    pub source: VerdictSource,
    pub rule_violations: Vec<AnomalyCode>,
}

impl Verdict {
    pub fn normal() -> Self {
        // ---
        Verdict {
            is_anomaly: false,
            anomaly_type: None,
            source: VerdictSource::None,
            rule_violations: Vec::new(),
        }
    }

    pub fn missing_fields() -> Self {
        // ---
        Verdict {
            is_anomaly: true,
            anomaly_type: Some(AnomalyCode::MissingFields),
            source: VerdictSource::None,
            rule_violations: Vec::new(),
        }
    }

    /// Rule verdict: the first violation in the set is the highest-precedence
    /// code and becomes the reported type.
    pub fn rule(violations: Vec<AnomalyCode>) -> Self {
        // ---
        Verdict {
            is_anomaly: true,
            anomaly_type: violations.first().copied(),
            source: VerdictSource::Rule,
            rule_violations: violations,
        }
    }

    pub fn ml() -> Self {
        // ---
        Verdict {
            is_anomaly: true,
            anomaly_type: Some(AnomalyCode::MlAnomaly),
            source: VerdictSource::Ml,
            rule_violations: Vec::new(),
        }
    }
}

// ---

/// Per-device aggregate state from the `devices` table.
#[derive(Debug, Serialize, sqlx::FromRow)]
pub struct DeviceRecord {
    // ---
    pub device_id: String,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub total_readings: i64,
    pub status: String,
}

/// One persisted reading plus its verdict from the `anomalies` table.
#[derive(Debug, Serialize, sqlx::FromRow)]
pub struct AnomalyRecord {
    // ---
    pub id: i64,
    pub timestamp: DateTime<Utc>,
    pub device_id: String,
    pub heart_rate: Option<f64>,
    pub body_temp: Option<f64>,
    pub signal_strength: Option<f64>,
    pub battery_level: Option<f64>,
    pub is_anomaly: bool,
    pub anomaly_type: Option<String>,
    pub raw_data: String,
}

/// Escalation record from the `alerts` table.
#[derive(Debug, Serialize, sqlx::FromRow)]
pub struct Alert {
    // ---
    pub id: i64,
    pub timestamp: DateTime<Utc>,
    pub device_id: String,
    pub alert_type: String,
    pub severity: String,
    pub message: String,
    pub is_resolved: bool,
}

/// Per-device statistics served by `/api/devices/{device_id}/stats`.
#[derive(Debug, Serialize)]
pub struct DeviceStats {
    // ---
    pub device_id: String,
    pub total_readings: i64,
    pub anomalies: i64,
    pub anomaly_rate: f64,
    pub first_seen: Option<DateTime<Utc>>,
    pub last_seen: Option<DateTime<Utc>>,
    pub status: String,
}

// ---

/// Result of one ingestion call, returned to the request-style transport and
/// logged by the subscribe-style transport.
///
/// Business-level failures (bad data) are `Rejected`, never an error; only
/// storage unavailability surfaces as a hard error from the coordinator.
#[derive(Debug)]
pub enum Outcome {
    Accepted { record_id: i64, verdict: Verdict },
    Rejected { reason: String },
}
