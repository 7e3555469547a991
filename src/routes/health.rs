// src/routes/health.rs
//! Health check endpoint for the occupancy service.
//!
//! This module defines the `/health` route used by container orchestrators
//! and supervisors to verify that the service is running. Besides the static
//! status it reports the feed's link state, so a supervisor can restart the
//! process when the broker link stays down. It is a sibling module in the
//! `routes` directory:
//! - Internal to this file: endpoint handler(s) and related types
//! - Exports to the gateway (`mod.rs`): a subrouter containing the `/health` route

use axum::{extract::State, routing::get, Json, Router};
use serde::Serialize;

use super::QueryState;
use crate::LinkState;

/// JSON response body for the `/health` endpoint.
#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    feed: LinkState,
}

/// Handle `GET /health`.
///
/// Does not touch the log files.
async fn health(State(state): State<QueryState>) -> Json<HealthResponse> {
    let feed = *state.link.borrow();
    Json(HealthResponse { status: "ok", feed })
}

/// Create a subrouter containing the `/health` route.
pub fn router() -> Router<QueryState> {
    Router::new().route("/health", get(health))
}
