//! Configuration loader for the `vitalflow` backend service.
//!
//! This module centralizes all runtime configuration values and their
//! defaults, loading from environment variables (with optional `.env` file
//! support provided by the caller). By consolidating configuration logic
//! here, we avoid scattering `env::var` calls throughout the codebase.

use std::env;
use std::time::Duration;

use anyhow::{anyhow, Result};

/// Parse an optional integer environment variable with a default value.
macro_rules! parse_env_u32 {
    ($var_name:expr, $default:expr) => {
        env::var($var_name)
            .ok()
            .map(|v| v.parse::<u32>())
            .transpose()
            .map_err(|e| anyhow!("Invalid {}: {}", $var_name, e))?
            .unwrap_or($default)
    };
}

/// Parse an optional boolean environment variable with a default value.
/// Accepts `1`/`true`/`yes` as true, anything else as false.
macro_rules! parse_env_bool {
    ($var_name:expr, $default:expr) => {
        env::var($var_name)
            .ok()
            .map(|v| matches!(v.to_lowercase().as_str(), "1" | "true" | "yes"))
            .unwrap_or($default)
    };
}

/// Read an optional string environment variable with a default value.
macro_rules! env_or {
    ($var_name:expr, $default:expr) => {
        env::var($var_name).unwrap_or_else(|_| $default.to_string())
    };
}

/// Parse a required string environment variable.
macro_rules! require_env {
    ($var_name:expr) => {
        env::var($var_name)
            .map_err(|_| anyhow!("{} must be set in .env or environment", $var_name))?
    };
}

/// Strongly typed application configuration.
///
/// All fields are immutable after loading, ensuring a consistent
/// configuration snapshot for the lifetime of the application.
#[derive(Debug, Clone)]
pub struct Config {
    // ---
    /// SQLite connection string.
    pub db_url: String,

    /// Maximum number of database connections in the pool.
    pub db_pool_max: u32,

    /// Port the HTTP transport listens on.
    pub http_port: u16,

    /// Whether to run the MQTT subscribe transport at all.
    pub mqtt_enabled: bool,

    /// MQTT broker host.
    pub mqtt_broker: String,

    /// MQTT broker port.
    pub mqtt_port: u16,

    /// Topic carrying device telemetry.
    pub mqtt_topic: String,

    /// Whether to wrap the MQTT connection in TLS.
    pub mqtt_use_tls: bool,

    /// CA certificate bundle for the TLS connection.
    pub mqtt_tls_ca_certs: String,

    /// Path to the trained classifier artifact.
    pub model_path: String,

    /// Upper bound on a single model inference call, in milliseconds.
    pub ml_timeout_ms: u32,
}

/// Load configuration from environment variables with defaults.
///
/// Required:
/// - `DATABASE_URL` – SQLite connection string (e.g. `sqlite://vitalflow.db`)
///
/// Optional:
/// - `DB_POOL_MAX` – max DB connections (default: 5)
/// - `HTTP_PORT` – HTTP listen port (default: 8080)
/// - `MQTT_ENABLED` – run the MQTT subscriber (default: true)
/// - `MQTT_BROKER` / `MQTT_PORT` – broker endpoint (default: mosquitto:8883)
/// - `MQTT_TOPIC` – telemetry topic (default: `/iot/health`)
/// - `MQTT_USE_TLS` / `MQTT_TLS_CA_CERTS` – TLS setup (default: on,
///   `/app/certs/ca.crt`)
/// - `MODEL_PATH` – classifier artifact (default: `model.json`)
/// - `ML_TIMEOUT_MS` – inference budget before degrading (default: 250)
///
/// Returns an error if any required variable is missing or invalid.
pub fn load_from_env() -> Result<Config> {
    // ---
    let db_url = require_env!("DATABASE_URL");
    let db_pool_max = parse_env_u32!("DB_POOL_MAX", 5);
    let http_port = parse_env_u32!("HTTP_PORT", 8080) as u16;
    let mqtt_enabled = parse_env_bool!("MQTT_ENABLED", true);
    let mqtt_broker = env_or!("MQTT_BROKER", "mosquitto");
    let mqtt_port = parse_env_u32!("MQTT_PORT", 8883) as u16;
    let mqtt_topic = env_or!("MQTT_TOPIC", "/iot/health");
    let mqtt_use_tls = parse_env_bool!("MQTT_USE_TLS", true);
    let mqtt_tls_ca_certs = env_or!("MQTT_TLS_CA_CERTS", "/app/certs/ca.crt");
    let model_path = env_or!("MODEL_PATH", "model.json");
    let ml_timeout_ms = parse_env_u32!("ML_TIMEOUT_MS", 250);

    Ok(Config {
        db_url,
        db_pool_max,
        http_port,
        mqtt_enabled,
        mqtt_broker,
        mqtt_port,
        mqtt_topic,
        mqtt_use_tls,
        mqtt_tls_ca_certs,
        model_path,
        ml_timeout_ms,
    })
}

impl Config {
    /// Inference budget as a [`Duration`].
    pub fn ml_timeout(&self) -> Duration {
        // ---
        Duration::from_millis(u64::from(self.ml_timeout_ms))
    }

    /// Log the loaded configuration for debugging purposes.
    ///
    /// Masks sensitive information like database passwords while showing
    /// all configuration values that were loaded.
    pub fn log_config(&self) {
        // ---
        // Mask any password embedded in the database URL
        let masked_db_url = if let Some(at_pos) = self.db_url.rfind('@') {
            if let Some(colon_pos) = self.db_url[..at_pos].rfind(':') {
                format!(
                    "{}:****{}",
                    &self.db_url[..colon_pos],
                    &self.db_url[at_pos..]
                )
            } else {
                self.db_url.clone()
            }
        } else {
            self.db_url.clone()
        };

        tracing::info!("Configuration loaded:");
        tracing::info!("  DATABASE_URL      : {}", masked_db_url);
        tracing::info!("  DB_POOL_MAX       : {}", self.db_pool_max);
        tracing::info!("  HTTP_PORT         : {}", self.http_port);
        tracing::info!("  MQTT_ENABLED      : {}", self.mqtt_enabled);
        tracing::info!(
            "  MQTT_BROKER       : {}:{} (TLS: {})",
            self.mqtt_broker,
            self.mqtt_port,
            self.mqtt_use_tls
        );
        tracing::info!("  MQTT_TOPIC        : {}", self.mqtt_topic);
        tracing::info!("  MODEL_PATH        : {}", self.model_path);
        tracing::info!("  ML_TIMEOUT_MS     : {}", self.ml_timeout_ms);
    }
}
