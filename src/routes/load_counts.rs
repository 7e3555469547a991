// src/routes/load_counts.rs
//! Counts log endpoint: latest cumulative usage per known spot.

use axum::{
    extract::State, http::StatusCode, response::IntoResponse, routing::get, Json, Router,
};
use serde::Serialize;
use tracing::info;

use super::{file_name, history_error, load_snapshot, QueryState, PREVIEW_ROWS};
use crate::history;
use crate::{SpotCount, COUNTS_LOG_COLUMNS};

// ---

pub fn router() -> Router<QueryState> {
    // ---
    Router::new().route("/load-counts", get(handler))
}

#[derive(Debug, Serialize)]
struct CountsResponse {
    success: bool,
    filename: String,
    counts: Vec<SpotCount>,
    recent: Vec<Vec<String>>,
}

/// Latest cumulative usage per known spot, for the bar chart.
async fn handler(State(state): State<QueryState>) -> impl IntoResponse {
    // ---
    info!("GET /load-counts - Reading {}", state.counts_path.display());

    let (snapshot, bytes) = match load_snapshot(&state.counts_path, &COUNTS_LOG_COLUMNS).await {
        Ok(loaded) => loaded,
        Err(e) => return history_error(e, "Counts"),
    };

    let events = if bytes.is_empty() {
        Vec::new()
    } else {
        match history::parse_usage_events(&state.counts_path, &bytes) {
            Ok(events) => events,
            Err(e) => return history_error(e, "Counts"),
        }
    };

    let counts = history::latest_totals(&events, &state.known_spots);
    info!(
        "GET /load-counts - {} events across {} spots",
        events.len(),
        counts.len()
    );

    (
        StatusCode::OK,
        Json(CountsResponse {
            success: true,
            filename: file_name(&state.counts_path),
            counts,
            recent: snapshot.tail(PREVIEW_ROWS).to_vec(),
        }),
    )
        .into_response()
}
