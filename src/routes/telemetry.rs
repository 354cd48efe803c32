//! Request-style ingestion endpoint.
//!
//! `POST /api/telemetry` is the HTTP twin of the MQTT subscriber: both hand
//! the pipeline a decoded payload plus an arrival timestamp. Unlike the
//! subscriber this transport has a reply path, so the outcome is echoed to
//! the caller: validation failures map to a client error, persistence
//! failures to a server error.

use std::sync::Arc;

use axum::{
    extract::State, http::StatusCode, response::IntoResponse, routing::post, Json, Router,
};
use chrono::Utc;
use serde::Serialize;
use serde_json::Value;
use tracing::{error, info};

use crate::{Outcome, Pipeline, Store};

// ---

pub fn router() -> Router<(Arc<Pipeline>, Store)> {
    // ---
    Router::new().route("/api/telemetry", post(handler))
}

#[derive(Serialize)]
struct TelemetryResponse {
    status: &'static str,
    record_id: i64,
    is_anomaly: bool,
    anomaly_type: Option<&'static str>,
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

async fn handler(
    State((pipeline, _)): State<(Arc<Pipeline>, Store)>,
    Json(payload): Json<Value>,
) -> impl IntoResponse {
    // ---
    info!("POST /api/telemetry: {}", payload);

    match pipeline.ingest(payload, Utc::now()).await {
        Ok(Outcome::Accepted { record_id, verdict }) => (
            StatusCode::OK,
            Json(TelemetryResponse {
                status: "received",
                record_id,
                is_anomaly: verdict.is_anomaly,
                anomaly_type: verdict.anomaly_type.map(|c| c.as_str()),
            }),
        )
            .into_response(),
        Ok(Outcome::Rejected { reason }) => {
            (StatusCode::BAD_REQUEST, Json(ErrorResponse { error: reason })).into_response()
        }
        Err(e) => {
            error!("Failed to persist telemetry: {e:#}");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorResponse {
                    error: "storage unavailable".to_string(),
                }),
            )
                .into_response()
        }
    }
}
