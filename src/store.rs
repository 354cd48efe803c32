//! Persistence gateway for the telemetry pipeline.
//!
//! `commit` is the single write path: one transaction appends the audit row,
//! upserts the device registry, and inserts an escalation alert when the
//! verdict warrants one. Either everything lands or nothing does — a failed
//! audit write can never leave the registry updated, and an ingestion task
//! aborted before `tx.commit()` leaves no partial state behind.
//!
//! The read side serves the dashboard surface: windowed anomaly listings and
//! unresolved alerts. Device reads live in [`crate::registry`].

use anyhow::Result;
use chrono::{Duration, Utc};
use sqlx::SqlitePool;

use crate::models::Severity;
use crate::{registry, Alert, AnomalyRecord, Reading, Verdict};

// ---

#[derive(Clone)]
pub struct Store {
    // ---
    pool: SqlitePool,
}

impl Store {
    pub fn new(pool: SqlitePool) -> Self {
        // ---
        Store { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Durably commit one classified reading.
    ///
    /// Every accepted reading gets an audit row, anomalous or not; the
    /// registry upsert rides the same transaction, and CRITICAL/WARNING
    /// verdicts additionally insert an alert. Returns the audit row id.
    pub async fn commit(&self, reading: &Reading, verdict: &Verdict) -> Result<i64> {
        // ---
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(
            r#"
            INSERT INTO anomalies (
                timestamp, device_id, heart_rate, body_temp,
                signal_strength, battery_level, is_anomaly, anomaly_type, raw_data
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(reading.observed_at)
        .bind(&reading.device_id)
        .bind(reading.heart_rate)
        .bind(reading.body_temp)
        .bind(reading.signal_strength)
        .bind(reading.battery_level)
        .bind(verdict.is_anomaly)
        .bind(verdict.anomaly_type.map(|code| code.as_str()))
        .bind(reading.raw_payload.to_string())
        .execute(&mut *tx)
        .await?;

        let record_id = result.last_insert_rowid();

        registry::record_reading(&mut *tx, &reading.device_id, reading.observed_at).await?;

        if let Some(code) = verdict.anomaly_type {
            let severity = code.severity();
            if matches!(severity, Severity::Critical | Severity::Warning) {
                sqlx::query(
                    r#"
                    INSERT INTO alerts (timestamp, device_id, alert_type, severity, message)
                    VALUES (?, ?, ?, ?, ?)
                    "#,
                )
                .bind(reading.observed_at)
                .bind(&reading.device_id)
                .bind(code.as_str())
                .bind(severity.as_str())
                .bind(format!("{} reported by {}", code.as_str(), reading.device_id))
                .execute(&mut *tx)
                .await?;
            }
        }

        tx.commit().await?;
        Ok(record_id)
    }

    // ---

    /// Anomalous readings from the last `hours`, newest first, optionally
    /// filtered to one device.
    pub async fn recent_anomalies(
        &self,
        hours: i64,
        device_id: Option<&str>,
    ) -> Result<Vec<AnomalyRecord>> {
        // ---
        let cutoff = Utc::now() - Duration::hours(hours);

        let rows = match device_id {
            Some(id) => {
                sqlx::query_as::<_, AnomalyRecord>(
                    r#"
                    SELECT id, timestamp, device_id, heart_rate, body_temp,
                           signal_strength, battery_level, is_anomaly, anomaly_type, raw_data
                    FROM anomalies
                    WHERE is_anomaly = 1 AND device_id = ? AND timestamp > ?
                    ORDER BY timestamp DESC
                    "#,
                )
                .bind(id)
                .bind(cutoff)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query_as::<_, AnomalyRecord>(
                    r#"
                    SELECT id, timestamp, device_id, heart_rate, body_temp,
                           signal_strength, battery_level, is_anomaly, anomaly_type, raw_data
                    FROM anomalies
                    WHERE is_anomaly = 1 AND timestamp > ?
                    ORDER BY timestamp DESC
                    "#,
                )
                .bind(cutoff)
                .fetch_all(&self.pool)
                .await?
            }
        };

        Ok(rows)
    }

    /// Unresolved alerts from the last `hours`, newest first.
    pub async fn active_alerts(&self, hours: i64) -> Result<Vec<Alert>> {
        // ---
        let cutoff = Utc::now() - Duration::hours(hours);

        let rows = sqlx::query_as::<_, Alert>(
            r#"
            SELECT id, timestamp, device_id, alert_type, severity, message, is_resolved
            FROM alerts
            WHERE is_resolved = 0 AND timestamp > ?
            ORDER BY timestamp DESC
            "#,
        )
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    // ---
    use super::*;
    use serde_json::json;
    use sqlx::sqlite::SqlitePoolOptions;

    use crate::models::AnomalyCode;

    /// Single-connection in-memory database with the full schema applied.
    /// One connection keeps `:memory:` stable for the life of the pool.
    pub(crate) async fn memory_pool() -> SqlitePool {
        // ---
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None::<std::time::Duration>)
            .max_lifetime(None::<std::time::Duration>)
            .connect("sqlite::memory:")
            .await
            .expect("in-memory sqlite");
        crate::schema::create_schema(&pool).await.expect("schema");
        pool
    }

    fn normal_reading(device_id: &str) -> Reading {
        // ---
        let payload = json!({
            "device_id": device_id,
            "heart_rate": 72.0,
            "body_temp": 36.8,
            "signal_strength": -60.0,
            "battery_level": 80.0,
            "firmware": "2.4.1"
        });
        Reading {
            device_id: device_id.to_string(),
            observed_at: Utc::now(),
            heart_rate: Some(72.0),
            body_temp: Some(36.8),
            signal_strength: Some(-60.0),
            battery_level: Some(80.0),
            raw_payload: payload,
        }
    }

    async fn audit_rows(pool: &SqlitePool) -> Vec<AnomalyRecord> {
        // ---
        sqlx::query_as::<_, AnomalyRecord>("SELECT * FROM anomalies ORDER BY id")
            .fetch_all(pool)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_commit_round_trips_reading() {
        // ---
        let store = Store::new(memory_pool().await);
        let reading = normal_reading("wearable_001");

        let id = store.commit(&reading, &Verdict::normal()).await.unwrap();
        assert!(id > 0);

        let rows = audit_rows(store.pool()).await;
        assert_eq!(rows.len(), 1);
        let row = &rows[0];
        assert_eq!(row.id, id);
        assert_eq!(row.device_id, "wearable_001");
        assert_eq!(row.heart_rate, Some(72.0));
        assert_eq!(row.body_temp, Some(36.8));
        assert_eq!(row.signal_strength, Some(-60.0));
        assert_eq!(row.battery_level, Some(80.0));
        assert!(!row.is_anomaly);
        assert_eq!(row.anomaly_type, None);

        // The original payload survives verbatim, extra fields included.
        let raw: serde_json::Value = serde_json::from_str(&row.raw_data).unwrap();
        assert_eq!(raw, reading.raw_payload);
    }

    #[tokio::test]
    async fn test_normal_readings_are_audited_without_alert() {
        // ---
        let store = Store::new(memory_pool().await);
        store
            .commit(&normal_reading("wearable_001"), &Verdict::normal())
            .await
            .unwrap();

        assert_eq!(audit_rows(store.pool()).await.len(), 1);
        assert!(store.active_alerts(24).await.unwrap().is_empty());

        let device = registry::get_device(store.pool(), "wearable_001")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(device.total_readings, 1);
    }

    #[tokio::test]
    async fn test_critical_verdict_creates_alert() {
        // ---
        let store = Store::new(memory_pool().await);
        let verdict = Verdict::rule(vec![AnomalyCode::OutOfRangeHr]);
        store
            .commit(&normal_reading("wearable_001"), &verdict)
            .await
            .unwrap();

        let alerts = store.active_alerts(24).await.unwrap();
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].alert_type, "OUT_OF_RANGE_HR");
        assert_eq!(alerts[0].severity, "CRITICAL");
        assert_eq!(alerts[0].device_id, "wearable_001");
        assert!(!alerts[0].is_resolved);
    }

    #[tokio::test]
    async fn test_warning_verdict_creates_alert_info_does_not() {
        // ---
        let store = Store::new(memory_pool().await);

        let warning = Verdict::rule(vec![AnomalyCode::LowBattery]);
        store
            .commit(&normal_reading("wearable_001"), &warning)
            .await
            .unwrap();
        let alerts = store.active_alerts(24).await.unwrap();
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].severity, "WARNING");

        // MISSING_FIELDS is INFO severity: audited, never escalated.
        store
            .commit(&normal_reading("wearable_002"), &Verdict::missing_fields())
            .await
            .unwrap();
        assert_eq!(store.active_alerts(24).await.unwrap().len(), 1);
        assert_eq!(audit_rows(store.pool()).await.len(), 2);
    }

    #[tokio::test]
    async fn test_recent_anomalies_filters() {
        // ---
        let store = Store::new(memory_pool().await);
        store
            .commit(&normal_reading("wearable_001"), &Verdict::normal())
            .await
            .unwrap();
        store
            .commit(
                &normal_reading("wearable_001"),
                &Verdict::rule(vec![AnomalyCode::OutOfRangeTemp]),
            )
            .await
            .unwrap();
        store
            .commit(&normal_reading("wearable_002"), &Verdict::ml())
            .await
            .unwrap();

        // Only anomalous rows come back.
        let all = store.recent_anomalies(24, None).await.unwrap();
        assert_eq!(all.len(), 2);
        assert!(all.iter().all(|r| r.is_anomaly));

        let filtered = store
            .recent_anomalies(24, Some("wearable_002"))
            .await
            .unwrap();
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[0].anomaly_type.as_deref(), Some("ML_ANOMALY"));
    }

    #[tokio::test]
    async fn test_failed_audit_write_leaves_no_registry_update() {
        // ---
        let store = Store::new(memory_pool().await);
        sqlx::query("DROP TABLE anomalies")
            .execute(store.pool())
            .await
            .unwrap();

        let result = store
            .commit(&normal_reading("wearable_001"), &Verdict::normal())
            .await;
        assert!(result.is_err());

        // The registry upsert rolled back with the transaction.
        let device = registry::get_device(store.pool(), "wearable_001")
            .await
            .unwrap();
        assert!(device.is_none());
    }
}
