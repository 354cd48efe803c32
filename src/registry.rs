//! Device registry: per-device liveness and reading-count state.
//!
//! The write side is a single transactional upsert executed inside the
//! persistence gateway's commit, which gives per-device linearizability at
//! the storage layer: concurrent readings for one device never lose an
//! update and `last_seen` never regresses, with no per-device lock held
//! across I/O. `status` is stored as `ACTIVE` and never downgraded here;
//! staleness is a read-time property consumers derive from `last_seen`.

use chrono::{DateTime, Utc};
use sqlx::{SqliteConnection, SqlitePool};

use crate::{DeviceRecord, DeviceStats};

// ---

/// Record one accepted reading for a device.
///
/// First reading inserts `{first_seen = last_seen = timestamp,
/// total_readings = 1, status = ACTIVE}`; every later reading bumps the
/// counter and advances `last_seen` monotonically (out-of-order delivery
/// cannot move it backwards).
pub async fn record_reading(
    conn: &mut SqliteConnection,
    device_id: &str,
    timestamp: DateTime<Utc>,
) -> Result<(), sqlx::Error> {
    // ---
    sqlx::query(
        r#"
        INSERT INTO devices (device_id, first_seen, last_seen, total_readings, status)
        VALUES (?, ?, ?, 1, 'ACTIVE')
        ON CONFLICT (device_id) DO UPDATE SET
            last_seen = MAX(last_seen, excluded.last_seen),
            total_readings = total_readings + 1
        "#,
    )
    .bind(device_id)
    .bind(timestamp)
    .bind(timestamp)
    .execute(conn)
    .await?;

    Ok(())
}

// ---

/// Full registry listing for `/api/devices`.
pub async fn list_devices(pool: &SqlitePool) -> Result<Vec<DeviceRecord>, sqlx::Error> {
    // ---
    sqlx::query_as::<_, DeviceRecord>(
        r#"
        SELECT device_id, first_seen, last_seen, total_readings, status
        FROM devices
        ORDER BY last_seen DESC
        "#,
    )
    .fetch_all(pool)
    .await
}

pub async fn get_device(
    pool: &SqlitePool,
    device_id: &str,
) -> Result<Option<DeviceRecord>, sqlx::Error> {
    // ---
    sqlx::query_as::<_, DeviceRecord>(
        r#"
        SELECT device_id, first_seen, last_seen, total_readings, status
        FROM devices
        WHERE device_id = ?
        "#,
    )
    .bind(device_id)
    .fetch_optional(pool)
    .await
}

/// Reading/anomaly counts and rate for one device.
///
/// Devices that have never been seen still get a stats row (zero counts,
/// status `UNKNOWN`) so the endpoint answer shape is stable.
pub async fn device_stats(
    pool: &SqlitePool,
    device_id: &str,
) -> Result<DeviceStats, sqlx::Error> {
    // ---
    let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM anomalies WHERE device_id = ?")
        .bind(device_id)
        .fetch_one(pool)
        .await?;

    let anomalies: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM anomalies WHERE device_id = ? AND is_anomaly = 1")
            .bind(device_id)
            .fetch_one(pool)
            .await?;

    let device = get_device(pool, device_id).await?;

    let anomaly_rate = if total > 0 {
        anomalies as f64 / total as f64 * 100.0
    } else {
        0.0
    };

    Ok(DeviceStats {
        device_id: device_id.to_string(),
        total_readings: total,
        anomalies,
        anomaly_rate,
        first_seen: device.as_ref().map(|d| d.first_seen),
        last_seen: device.as_ref().map(|d| d.last_seen),
        status: device
            .map(|d| d.status)
            .unwrap_or_else(|| "UNKNOWN".to_string()),
    })
}
