//! Rule classifier and the classification engine combining it with the
//! statistical model.
//!
//! Rule evaluation is a pure function over complete vitals; the engine owns
//! the precedence policy: `MISSING_FIELDS` short-circuits everything, rule
//! violations always beat the model verdict, and the model only speaks when
//! every rule is satisfied. This keeps explainable medical thresholds in
//! charge even when the opaque model also fires.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::model::{AnomalyModel, ModelVerdict};
use crate::{AnomalyCode, Reading, Verdict, Vitals};

// ---

/// Inclusive normal range for heart rate (bpm).
pub const HEART_RATE_RANGE: (f64, f64) = (60.0, 100.0);
/// Inclusive normal range for body temperature (degrees C).
pub const BODY_TEMP_RANGE: (f64, f64) = (36.0, 37.5);
/// Battery percentage below this is a warning.
pub const BATTERY_FLOOR: f64 = 10.0;
/// Signal strength (dBm) below this is a warning. No upper bound is enforced.
pub const SIGNAL_FLOOR: f64 = -100.0;

/// Evaluate the fixed medical reference ranges over a complete reading.
///
/// Returns every violated rule, in precedence order; the engine reports the
/// first entry and keeps the rest for the audit log.
pub fn rule_violations(vitals: &Vitals) -> Vec<AnomalyCode> {
    // ---
    let mut violations = Vec::new();

    if !(HEART_RATE_RANGE.0..=HEART_RATE_RANGE.1).contains(&vitals.heart_rate) {
        violations.push(AnomalyCode::OutOfRangeHr);
    }
    if !(BODY_TEMP_RANGE.0..=BODY_TEMP_RANGE.1).contains(&vitals.body_temp) {
        violations.push(AnomalyCode::OutOfRangeTemp);
    }
    if vitals.battery_level < BATTERY_FLOOR {
        violations.push(AnomalyCode::LowBattery);
    }
    if vitals.signal_strength < SIGNAL_FLOOR {
        violations.push(AnomalyCode::WeakSignal);
    }

    violations
}

// ---

/// Combines the rule classifier and the statistical model into one verdict.
pub struct Engine {
    // ---
    model: Arc<dyn AnomalyModel>,
    ml_timeout: Duration,
}

impl Engine {
    pub fn new(model: Arc<dyn AnomalyModel>, ml_timeout: Duration) -> Self {
        // ---
        Engine { model, ml_timeout }
    }

    pub fn model_loaded(&self) -> bool {
        self.model.is_loaded()
    }

    /// Classify one reading.
    ///
    /// Incomplete readings become `MISSING_FIELDS` without consulting either
    /// stage. Otherwise both stages run and rule violations take precedence
    /// over the model verdict.
    pub async fn classify(&self, reading: &Reading) -> Verdict {
        // ---
        let Some(vitals) = reading.vitals() else {
            return Verdict::missing_fields();
        };

        let violations = rule_violations(&vitals);
        let model_verdict = self.model_verdict(vitals.features()).await;

        if !violations.is_empty() {
            debug!(
                device_id = %reading.device_id,
                rules = ?violations,
                model = ?model_verdict,
                "rule violation takes precedence"
            );
            Verdict::rule(violations)
        } else if model_verdict == ModelVerdict::Anomalous {
            Verdict::ml()
        } else {
            Verdict::normal()
        }
    }

    /// Ask the model, degrading errors and slow answers to `NoOpinion`.
    /// A hung inference backend must not block ingestion.
    async fn model_verdict(&self, features: [f64; 4]) -> ModelVerdict {
        // ---
        match tokio::time::timeout(self.ml_timeout, self.model.classify(features)).await {
            Ok(Ok(verdict)) => verdict,
            Ok(Err(e)) => {
                warn!("statistical classifier failed, continuing without it: {e}");
                ModelVerdict::NoOpinion
            }
            Err(_) => {
                warn!(
                    timeout_ms = self.ml_timeout.as_millis() as u64,
                    "statistical classifier timed out, continuing without it"
                );
                ModelVerdict::NoOpinion
            }
        }
    }
}
