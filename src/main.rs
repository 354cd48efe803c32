//! Application entry point for the `vitalflow` backend service.
//!
//! This binary orchestrates the full startup sequence for the vital-sign
//! telemetry pipeline, including:
//! - Loading configuration from environment variables or `.env`
//! - Initializing structured logging/tracing
//! - Opening the SQLite connection pool (WAL mode, busy timeout)
//! - Creating the database schema if it does not exist
//! - Loading the trained classifier artifact, degrading to a null model
//!   when it is absent
//! - Spawning the MQTT subscribe-transport task
//! - Mounting all API routes via the `routes` gateway (EMBP pattern)
//! - Binding the Axum HTTP server and serving requests
//!
//! # Environment Variables
//! - `DATABASE_URL` (**required**) – SQLite connection string
//! - `DB_POOL_MAX` (optional) – maximum number of DB connections (default: 5)
//! - `MQTT_*` (optional) – broker endpoint, topic, and TLS setup
//! - `MODEL_PATH` (optional) – classifier artifact path (default: model.json)
//! - `AXUM_LOG_LEVEL` (optional) – log verbosity (default: `debug`)
//! - `AXUM_SPAN_EVENTS` (optional) – span event mode for tracing
//!
//! This module follows the Explicit Module Boundary Pattern (EMBP) by
//! delegating schema setup to `schema`, configuration parsing to `config`,
//! and route registration to `routes`.
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use std::{env, net::SocketAddr, path::Path};

use axum::Router;
use dotenvy::dotenv;
use is_terminal::IsTerminal;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::fmt::format::FmtSpan;

use anyhow::Result;

mod classify;
mod config;
mod model;
mod models;
mod mqtt;
mod pipeline;
mod registry;
mod routes;
mod schema;
mod store;
mod validate;

pub use config::Config;
pub use pipeline::Pipeline;
pub use store::Store;

// These are not used here but they are imported to be used by the sibling
// modules, that way refactoring is easier since routes/*.rs do not need
// knowledge of models.rs, only of their parent module (main.rs)
pub use models::{
    Alert, AnomalyCode, AnomalyRecord, DeviceRecord, DeviceStats, Outcome, Reading, Verdict, Vitals,
};

use crate::classify::Engine;
use crate::model::{AnomalyModel, ForestModel, NullModel};

// ---

#[tokio::main]
async fn main() -> Result<()> {
    // ---
    init_tracing();
    dotenv().ok();

    let cfg = config::load_from_env()?;
    cfg.log_config();

    tracing::info!("Attempting to open database: {}", cfg.db_url);

    let connect_options = SqliteConnectOptions::from_str(&cfg.db_url)
        .map_err(|e| anyhow::anyhow!("Invalid DATABASE_URL '{}': {}", cfg.db_url, e))?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(Duration::from_secs(5));

    let pool = SqlitePoolOptions::new()
        .max_connections(cfg.db_pool_max)
        .connect_with(connect_options)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to open database '{}': {}", cfg.db_url, e))?;

    tracing::info!("Successfully opened database");

    schema::create_schema(&pool).await?;

    let model: Arc<dyn AnomalyModel> = match ForestModel::load(Path::new(&cfg.model_path)) {
        Ok(model) => {
            tracing::info!("Model loaded from {}", cfg.model_path);
            Arc::new(model)
        }
        Err(e) => {
            tracing::warn!(
                "Model not available at {} ({e:#}); statistical stage disabled",
                cfg.model_path
            );
            Arc::new(NullModel)
        }
    };

    let store = Store::new(pool.clone());
    let engine = Engine::new(model, cfg.ml_timeout());
    let pipeline = Arc::new(Pipeline::new(engine, store.clone()));

    if cfg.mqtt_enabled {
        tokio::spawn(mqtt::run_subscriber(cfg.clone(), pipeline.clone()));
    } else {
        tracing::info!("MQTT transport disabled by configuration");
    }

    // Build app from routes gateway (EMBP)
    let app: Router = routes::router(pipeline, store);

    let addr = SocketAddr::from(([0, 0, 0, 0], cfg.http_port));
    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

// ---

/// Initialize the global tracing subscriber for structured logging.
///
/// This function configures the [`tracing_subscriber`] with:
/// - Log target, file, and line number output enabled
/// - Color output controlled by TTY detection and `FORCE_COLOR` env var:
///   - `FORCE_COLOR=1|true|yes`: force colors on
///   - `FORCE_COLOR=0|false|no`: force colors off
///   - unset or other values: auto-detect TTY
/// - Span event emission mode controlled by the `AXUM_SPAN_EVENTS` env var:
///   - `"full"`       : emit ENTER, EXIT, and CLOSE events with timing
///   - `"enter_exit"` : emit ENTER and EXIT only
///   - unset or other values: emit CLOSE events only (default)
/// - Log level controlled by the `AXUM_LOG_LEVEL` env var
///
/// This should be called once at application startup before any logging
/// or tracing macros are invoked. It installs the subscriber globally
/// for the lifetime of the process.
fn init_tracing() {
    // ---
    let span_events = match env::var("AXUM_SPAN_EVENTS").as_deref() {
        Ok("full") => FmtSpan::FULL,
        Ok("enter_exit") => FmtSpan::ENTER | FmtSpan::EXIT,
        _ => FmtSpan::CLOSE,
    };

    // Determine if we should use colors
    let use_color = match env::var("FORCE_COLOR").as_deref() {
        Ok("1") | Ok("true") | Ok("yes") => true,
        Ok("0") | Ok("false") | Ok("no") => false,
        _ => std::io::stdout().is_terminal(),
    };

    // Use RUST_LOG if available, otherwise fall back to AXUM_LOG_LEVEL
    let env_filter = if env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        let level = match env::var("AXUM_LOG_LEVEL").ok().as_deref() {
            Some("trace") => "trace",
            Some("debug") => "debug",
            Some("info") => "info",
            Some("warn") => "warn",
            Some("error") => "error",
            _ => "debug",
        };
        EnvFilter::new(format!("{level},sqlx::query=warn,rumqttc=info"))
    };

    tracing_subscriber::fmt()
        .with_target(true)
        .with_file(true)
        .with_line_number(true)
        .with_span_events(span_events)
        .with_env_filter(env_filter)
        .with_ansi(use_color)
        .compact()
        .init();
}
