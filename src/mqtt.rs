//! MQTT subscribe-transport adapter.
//!
//! Runs as a background task for the lifetime of the process: connects to
//! the broker (optionally over TLS), subscribes to the telemetry topic, and
//! feeds every published payload into the ingestion pipeline. This transport
//! has no reply path, so outcomes are logged: rejects at WARN, persistence
//! failures at ERROR with the payload attached so the reading can be
//! replayed. Broker connection failures retry forever with a fixed delay.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS, TlsConfiguration, Transport};
use serde_json::Value;
use tracing::{debug, error, info, warn};

use crate::{Config, Outcome, Pipeline};

// ---

const RETRY_DELAY: Duration = Duration::from_secs(5);

/// Run the MQTT subscriber until the process exits.
///
/// Each connection session subscribes and polls the event loop; on any
/// session error the connection is rebuilt after a delay. Spawned from
/// `main.rs` when `MQTT_ENABLED` is set.
pub async fn run_subscriber(cfg: Config, pipeline: Arc<Pipeline>) {
    // ---
    let mut attempt: u64 = 0;

    loop {
        match run_connection(&cfg, &pipeline).await {
            Ok(()) => {
                // The event loop only returns on error; treat a clean return
                // as a disconnect and reconnect.
                warn!("MQTT session ended, reconnecting");
            }
            Err(e) => {
                attempt += 1;
                error!(
                    attempt,
                    broker = %cfg.mqtt_broker,
                    port = cfg.mqtt_port,
                    "MQTT connection error: {e:#}"
                );
            }
        }
        tokio::time::sleep(RETRY_DELAY).await;
    }
}

/// Run a single MQTT connection session.
async fn run_connection(cfg: &Config, pipeline: &Pipeline) -> Result<()> {
    // ---
    let mut options = MqttOptions::new("vitalflow-backend", &cfg.mqtt_broker, cfg.mqtt_port);
    options.set_keep_alive(Duration::from_secs(60));
    options.set_clean_session(true);

    if cfg.mqtt_use_tls {
        match std::fs::read(&cfg.mqtt_tls_ca_certs) {
            Ok(ca) => {
                options.set_transport(Transport::tls_with_config(TlsConfiguration::Simple {
                    ca,
                    alpn: None,
                    client_auth: None,
                }));
                info!(ca = %cfg.mqtt_tls_ca_certs, "TLS enabled for MQTT connection");
            }
            Err(e) => {
                // Mirror of the broker-side self-signed setup: a missing CA
                // file downgrades to a plain connection rather than keeping
                // the transport down.
                warn!(
                    ca = %cfg.mqtt_tls_ca_certs,
                    "cannot read CA certificate ({e}); falling back to non-TLS connection"
                );
            }
        }
    }

    let (client, mut eventloop) = AsyncClient::new(options, 100);
    client
        .subscribe(&cfg.mqtt_topic, QoS::AtLeastOnce)
        .await
        .context("failed to subscribe")?;

    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(_))) => {
                info!(
                    broker = %cfg.mqtt_broker,
                    port = cfg.mqtt_port,
                    topic = %cfg.mqtt_topic,
                    "connected to MQTT broker"
                );
            }
            Ok(Event::Incoming(Packet::SubAck(_))) => {
                debug!(topic = %cfg.mqtt_topic, "subscription acknowledged");
            }
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                handle_publish(pipeline, &publish.topic, &publish.payload).await;
            }
            Ok(_) => {
                // Other events (outgoing, pings, etc.)
            }
            Err(e) => return Err(e).context("MQTT event loop error"),
        }
    }
}

/// Feed one published payload through the pipeline.
///
/// Undecodable payloads are a transport-level condition: logged and dropped
/// without reaching the core.
async fn handle_publish(pipeline: &Pipeline, topic: &str, payload: &[u8]) {
    // ---
    let value: Value = match serde_json::from_slice(payload) {
        Ok(value) => value,
        Err(e) => {
            warn!(
                topic,
                payload = %String::from_utf8_lossy(payload),
                "invalid JSON payload, dropping: {e}"
            );
            return;
        }
    };

    match pipeline.ingest(value.clone(), Utc::now()).await {
        Ok(Outcome::Accepted { record_id, verdict }) => {
            debug!(
                topic,
                record_id,
                is_anomaly = verdict.is_anomaly,
                "reading ingested"
            );
        }
        Ok(Outcome::Rejected { reason }) => {
            // No caller to notify on this transport.
            warn!(topic, %reason, payload = %value, "reading rejected, dropping");
        }
        Err(e) => {
            // Keep enough context to replay the reading once storage is back.
            error!(topic, payload = %value, "failed to persist reading: {e:#}");
        }
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use crate::model::NullModel;
    use crate::pipeline::tests::test_pipeline;
    use crate::registry;

    #[tokio::test]
    async fn test_publish_feeds_pipeline() {
        // ---
        let pipeline = test_pipeline(Arc::new(NullModel)).await;
        let payload = br#"{
            "device_id": "wearable_001",
            "heart_rate": 72.0,
            "body_temp": 36.8,
            "signal_strength": -60.0,
            "battery_level": 80.0
        }"#;

        handle_publish(&pipeline, "/iot/health", payload).await;

        let device = registry::get_device(pipeline.store().pool(), "wearable_001")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(device.total_readings, 1);
    }

    #[tokio::test]
    async fn test_invalid_json_is_dropped_before_the_core() {
        // ---
        let pipeline = test_pipeline(Arc::new(NullModel)).await;

        handle_publish(&pipeline, "/iot/health", b"not json at all").await;

        let rows: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM anomalies")
            .fetch_one(pipeline.store().pool())
            .await
            .unwrap();
        assert_eq!(rows, 0);
    }

    #[tokio::test]
    async fn test_rejected_payload_is_logged_and_dropped() {
        // ---
        let pipeline = test_pipeline(Arc::new(NullModel)).await;

        // Decodes fine but fails validation: nothing is persisted and the
        // handler does not panic (fire-and-forget semantics).
        handle_publish(
            &pipeline,
            "/iot/health",
            br#"{ "device_id": "wearable_001", "heart_rate": "high" }"#,
        )
        .await;

        let rows: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM anomalies")
            .fetch_one(pipeline.store().pool())
            .await
            .unwrap();
        assert_eq!(rows, 0);
    }
}
