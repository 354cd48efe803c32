//! Ingestion coordinator: the single entry point both transports call.
//!
//! Per reading: validate, classify, commit, return an [`Outcome`]. Business
//! conditions (malformed values, missing fields, model unavailability) never
//! surface as errors — they become `Rejected` outcomes or anomaly verdicts.
//! Only storage unavailability is a hard error for the caller to map to a
//! server-class response (HTTP) or a replayable error log (MQTT).

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::{debug, warn};

use crate::classify::Engine;
use crate::store::Store;
use crate::{validate, Outcome};

// ---

pub struct Pipeline {
    // ---
    engine: Engine,
    store: Store,
}

impl Pipeline {
    pub fn new(engine: Engine, store: Store) -> Self {
        // ---
        Pipeline { engine, store }
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn model_loaded(&self) -> bool {
        self.engine.model_loaded()
    }

    /// Ingest one decoded payload.
    ///
    /// The arrival time is stamped by the transport at delivery, not taken
    /// from the device. Returns `Ok(Rejected)` for payloads the pipeline
    /// cannot classify and `Err` only when the commit itself fails.
    pub async fn ingest(&self, payload: Value, arrival: DateTime<Utc>) -> Result<Outcome> {
        // ---
        let reading = match validate::parse_reading(payload, arrival) {
            Ok(reading) => reading,
            Err(e) => {
                return Ok(Outcome::Rejected {
                    reason: e.to_string(),
                })
            }
        };

        let verdict = self.engine.classify(&reading).await;
        let record_id = self.store.commit(&reading, &verdict).await?;

        if verdict.is_anomaly {
            warn!(
                device_id = %reading.device_id,
                record_id,
                anomaly_type = verdict.anomaly_type.map(|c| c.as_str()).unwrap_or("?"),
                rules = ?verdict.rule_violations,
                data = %reading.raw_payload,
                "anomaly detected"
            );
        } else {
            debug!(device_id = %reading.device_id, record_id, "reading accepted");
        }

        Ok(Outcome::Accepted { record_id, verdict })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    // ---
    use super::*;
    use serde_json::json;
    use std::sync::Arc;
    use std::time::Duration;

    use crate::model::{AnomalyModel, ModelVerdict, NullModel};
    use crate::registry;
    use crate::store::tests::memory_pool;

    /// Pipeline over a fresh in-memory database and the given model.
    pub(crate) async fn test_pipeline(model: Arc<dyn AnomalyModel>) -> Pipeline {
        // ---
        let store = Store::new(memory_pool().await);
        let engine = Engine::new(model, Duration::from_millis(250));
        Pipeline::new(engine, store)
    }

    fn payload(device_id: &str) -> Value {
        // ---
        json!({
            "device_id": device_id,
            "heart_rate": 72.0,
            "body_temp": 36.8,
            "signal_strength": -60.0,
            "battery_level": 80.0
        })
    }

    #[tokio::test]
    async fn test_normal_payload_accepted() {
        // ---
        let pipeline = test_pipeline(Arc::new(NullModel)).await;
        let outcome = pipeline
            .ingest(payload("wearable_001"), Utc::now())
            .await
            .unwrap();

        match outcome {
            Outcome::Accepted { record_id, verdict } => {
                assert!(record_id > 0);
                assert!(!verdict.is_anomaly);
            }
            Outcome::Rejected { reason } => panic!("unexpected rejection: {reason}"),
        }
    }

    #[tokio::test]
    async fn test_missing_fields_accepted_as_anomaly() {
        // ---
        let pipeline = test_pipeline(Arc::new(NullModel)).await;
        let outcome = pipeline
            .ingest(json!({ "device_id": "wearable_001" }), Utc::now())
            .await
            .unwrap();

        let Outcome::Accepted { verdict, .. } = outcome else {
            panic!("missing fields must be accepted, not rejected");
        };
        assert!(verdict.is_anomaly);
        assert_eq!(
            verdict.anomaly_type.map(|c| c.as_str()),
            Some("MISSING_FIELDS")
        );

        // The reading still lands in the audit log and the registry.
        let device = registry::get_device(pipeline.store().pool(), "wearable_001")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(device.total_readings, 1);
    }

    #[tokio::test]
    async fn test_non_numeric_payload_rejected_without_persisting() {
        // ---
        let pipeline = test_pipeline(Arc::new(NullModel)).await;
        let outcome = pipeline
            .ingest(
                json!({ "device_id": "wearable_001", "heart_rate": "high" }),
                Utc::now(),
            )
            .await
            .unwrap();

        let Outcome::Rejected { reason } = outcome else {
            panic!("non-numeric field must reject the call");
        };
        assert!(reason.contains("heart_rate"));

        let device = registry::get_device(pipeline.store().pool(), "wearable_001")
            .await
            .unwrap();
        assert!(device.is_none());
    }

    #[tokio::test]
    async fn test_unidentified_payload_counted_under_unknown() {
        // ---
        let pipeline = test_pipeline(Arc::new(NullModel)).await;
        pipeline
            .ingest(json!({ "heart_rate": 72.0 }), Utc::now())
            .await
            .unwrap();

        let device = registry::get_device(pipeline.store().pool(), "UNKNOWN")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(device.total_readings, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_ingestion_counts_exactly_once_each() {
        // ---
        let pipeline = Arc::new(test_pipeline(Arc::new(NullModel)).await);
        let n = 20;

        let mut handles = Vec::new();
        for _ in 0..n {
            let pipeline = Arc::clone(&pipeline);
            handles.push(tokio::spawn(async move {
                pipeline.ingest(payload("wearable_001"), Utc::now()).await
            }));
        }

        let mut max_arrival = None;
        for handle in handles {
            let outcome = handle.await.unwrap().unwrap();
            assert!(matches!(outcome, Outcome::Accepted { .. }));
            max_arrival = max_arrival.max(Some(Utc::now()));
        }

        let device = registry::get_device(pipeline.store().pool(), "wearable_001")
            .await
            .unwrap()
            .unwrap();
        // No lost updates, no double counts.
        assert_eq!(device.total_readings, n);
        assert!(device.last_seen <= max_arrival.unwrap());
        assert!(device.first_seen <= device.last_seen);

        let rows: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM anomalies")
            .fetch_one(pipeline.store().pool())
            .await
            .unwrap();
        assert_eq!(rows, n);
    }

    #[tokio::test]
    async fn test_storage_failure_is_a_hard_error() {
        // ---
        let pipeline = test_pipeline(Arc::new(NullModel)).await;
        sqlx::query("DROP TABLE anomalies")
            .execute(pipeline.store().pool())
            .await
            .unwrap();

        let result = pipeline.ingest(payload("wearable_001"), Utc::now()).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_ml_anomaly_flows_through_to_alerts() {
        // ---
        struct AlwaysAnomalous;

        #[async_trait::async_trait]
        impl AnomalyModel for AlwaysAnomalous {
            async fn classify(&self, _features: [f64; 4]) -> anyhow::Result<ModelVerdict> {
                Ok(ModelVerdict::Anomalous)
            }
            fn is_loaded(&self) -> bool {
                true
            }
        }

        let pipeline = test_pipeline(Arc::new(AlwaysAnomalous)).await;
        pipeline
            .ingest(payload("wearable_001"), Utc::now())
            .await
            .unwrap();

        let anomalies = pipeline.store().recent_anomalies(24, None).await.unwrap();
        assert_eq!(anomalies.len(), 1);
        assert_eq!(anomalies[0].anomaly_type.as_deref(), Some("ML_ANOMALY"));

        let alerts = pipeline.store().active_alerts(24).await.unwrap();
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].severity, "CRITICAL");
    }
}
