// src/routes/health.rs
//! API health check endpoint for the VitalFlow backend.
//!
//! This module defines the `/health` route used by container orchestrators
//! (e.g., Docker, Kubernetes) and CI pipelines to verify that the service is
//! running and able to respond to HTTP requests. It is a sibling module in
//! the `routes` directory and follows the Explicit Module Boundary Pattern
//! (EMBP):
//! - Internal to this file: endpoint handler(s) and related types
//! - Exports to the gateway (`mod.rs`): a subrouter containing the `/health`
//!   route
//!
//! The gateway merges this subrouter into the top-level API router so that
//! `main.rs` does not need to know about individual endpoints.

use std::sync::Arc;

use axum::{extract::State, routing::get, Json, Router};
use serde::Serialize;

use crate::{Pipeline, Store};

/// JSON response body for the `/health` endpoint.
#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    model_loaded: bool,
}

/// Handle `GET /health`.
///
/// Reports whether the service is reachable and whether a trained classifier
/// artifact is backing the statistical stage. Deliberately lightweight: it
/// does not touch the database or the broker.
async fn health(State((pipeline, _)): State<(Arc<Pipeline>, Store)>) -> Json<HealthResponse> {
    // ---
    Json(HealthResponse {
        status: "running",
        model_loaded: pipeline.model_loaded(),
    })
}

/// Create a subrouter containing the `/health` route.
pub fn router() -> Router<(Arc<Pipeline>, Store)> {
    Router::new().route("/health", get(health))
}
