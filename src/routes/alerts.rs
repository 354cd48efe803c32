//! Unresolved alert listing for the dashboard.

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
    Router::new().route("/api/alerts", get(handler))
}

#[derive(Debug, Deserialize)]
struct AlertsQuery {
    /// Look-back window in hours (default: 24).
    hours: Option<i64>,
}

async fn handler(
    Query(params): Query<AlertsQuery>,
    State((_, store)): State<(Arc<Pipeline>, Store)>,
) -> impl IntoResponse {
    // ---
    match store.active_alerts(params.hours.unwrap_or(24)).await {
        Ok(alerts) => (StatusCode::OK, Json(alerts)).into_response(),
        Err(e) => {
            error!("Failed to fetch alerts: {e:#}");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json("Failed to fetch alerts"),
            )
                .into_response()
        }
    }
}
