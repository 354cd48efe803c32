use std::sync::Arc;

use axum::Router;

use crate::{Pipeline, Store};

mod alerts;
mod anomalies;
mod devices;
mod health;
mod telemetry;

// ---

pub fn router(pipeline: Arc<Pipeline>, store: Store) -> Router {
    // ---
    Router::new()
        .merge(telemetry::router())
        .merge(devices::router())
        .merge(anomalies::router())
        .merge(alerts::router())
        .merge(health::router())
        .with_state((pipeline, store))
}
