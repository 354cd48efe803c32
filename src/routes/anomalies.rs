//! Windowed anomaly listing for the dashboard.

use std::sync::Arc;

use axum::{
    extract::Query, extract::State, http::StatusCode, response::IntoResponse, routing::get, Json,
    Router,
};
use serde::Deserialize;
use tracing::error;

use crate::{Pipeline, Store};

// ---

pub fn router() -> Router<(Arc<Pipeline>, Store)> {
    // ---
    Router::new().route("/api/anomalies", get(handler))
}

/// Query parameters for filtering anomalies.
#[derive(Debug, Deserialize)]
struct AnomaliesQuery {
    /// Look-back window in hours (default: 24).
    hours: Option<i64>,
    device_id: Option<String>,
}

async fn handler(
    Query(params): Query<AnomaliesQuery>,
    State((_, store)): State<(Arc<Pipeline>, Store)>,
) -> impl IntoResponse {
    // ---
    let hours = params.hours.unwrap_or(24);

    match store
        .recent_anomalies(hours, params.device_id.as_deref())
        .await
    {
        Ok(anomalies) => (StatusCode::OK, Json(anomalies)).into_response(),
        Err(e) => {
            error!("Failed to fetch anomalies: {e:#}");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json("Failed to fetch anomalies"),
            )
                .into_response()
        }
    }
}
