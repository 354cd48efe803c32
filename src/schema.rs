//! Database schema management for `vitalflow`.
//!
//! Ensures required tables and indexes exist before serving traffic.
//! Applied once on startup from `main.rs`.

use anyhow::Result;
use sqlx::SqlitePool;

// ---

/// Create the database schema (idempotent).
///
/// Creates the `anomalies` audit log, the `devices` registry, and the
/// `alerts` escalation table. Safe to call on every startup; no-op if the
/// objects already exist.
///
/// Errors are propagated if any SQL execution fails.
pub async fn create_schema(pool: &SqlitePool) -> Result<()> {
    // ---
    let mut tx = pool.begin().await?;

    // Append-only audit log: one row per accepted reading, anomalous or not.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS anomalies (
            id              INTEGER PRIMARY KEY AUTOINCREMENT,
            timestamp       TEXT    NOT NULL,
            device_id       TEXT    NOT NULL,
            heart_rate      REAL,
            body_temp       REAL,
            signal_strength REAL,
            battery_level   REAL,
            is_anomaly      INTEGER NOT NULL,
            anomaly_type    TEXT,
            raw_data        TEXT    NOT NULL
        );
        "#,
    )
    .execute(&mut *tx)
    .await?;

    // Per-device aggregate state, upserted on every accepted reading.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS devices (
            device_id      TEXT PRIMARY KEY,
            first_seen     TEXT    NOT NULL,
            last_seen      TEXT    NOT NULL,
            total_readings INTEGER NOT NULL,
            status         TEXT    NOT NULL
        );
        "#,
    )
    .execute(&mut *tx)
    .await?;

    // Escalations derived from CRITICAL/WARNING verdicts.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS alerts (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            timestamp   TEXT NOT NULL,
            device_id   TEXT NOT NULL,
            alert_type  TEXT NOT NULL,
            severity    TEXT NOT NULL,
            message     TEXT NOT NULL,
            is_resolved INTEGER NOT NULL DEFAULT 0
        );
        "#,
    )
    .execute(&mut *tx)
    .await?;

    // Basic indexes for the dashboard queries
    sqlx::query(
        r#"
        CREATE INDEX IF NOT EXISTS idx_anomalies_device_id
            ON anomalies (device_id);
        "#,
    )
    .execute(&mut *tx)
    .await?;

    sqlx::query(
        r#"
        CREATE INDEX IF NOT EXISTS idx_anomalies_timestamp
            ON anomalies (timestamp);
        "#,
    )
    .execute(&mut *tx)
    .await?;

    sqlx::query(
        r#"
        CREATE INDEX IF NOT EXISTS idx_alerts_timestamp
            ON alerts (timestamp);
        "#,
    )
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;
    Ok(())
}
