//! Device registry read endpoints for the dashboard.

use std::sync::Arc;

use axum::{
    extract::Path, extract::State, http::StatusCode, response::IntoResponse, routing::get, Json,
    Router,
};
use tracing::error;

use crate::{registry, Pipeline, Store};

// ---

pub fn router() -> Router<(Arc<Pipeline>, Store)> {
    // ---
    Router::new()
        .route("/api/devices", get(list_handler))
        .route("/api/devices/{device_id}/stats", get(stats_handler))
}

async fn list_handler(State((_, store)): State<(Arc<Pipeline>, Store)>) -> impl IntoResponse {
    // ---
    match registry::list_devices(store.pool()).await {
        Ok(devices) => (StatusCode::OK, Json(devices)).into_response(),
        Err(e) => {
            error!("Failed to list devices: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json("Failed to list devices"),
            )
                .into_response()
        }
    }
}

async fn stats_handler(
    Path(device_id): Path<String>,
    State((_, store)): State<(Arc<Pipeline>, Store)>,
) -> impl IntoResponse {
    // ---
    match registry::device_stats(store.pool(), &device_id).await {
        Ok(stats) => (StatusCode::OK, Json(stats)).into_response(),
        Err(e) => {
            error!("Failed to compute stats for {}: {}", device_id, e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json("Failed to compute device stats"),
            )
                .into_response()
        }
    }
}
