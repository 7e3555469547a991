// src/routes/load_log.rs
//! Raw log endpoint.
//!
//! `GET /load-log` returns the raw observation log as columns and rows,
//! optionally narrowed to one spot and to the newest `limit` rows, plus a
//! short preview of the most recent rows.

use axum::{
    extract::Query, extract::State, http::StatusCode, response::IntoResponse, routing::get, Json,
    Router,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::{file_name, history_error, load_snapshot, QueryState, PREVIEW_ROWS};
use crate::{LogSnapshot, RAW_LOG_COLUMNS};

// ---

pub fn router() -> Router<QueryState> {
    // ---
    Router::new().route("/load-log", get(handler))
}

/// Query parameters for filtering the raw log
#[derive(Debug, Deserialize)]
pub struct LogQuery {
    spot: Option<String>,
    /// Newest rows to return (default 1000).
    limit: Option<usize>,
}

#[derive(Debug, Serialize)]
struct LogResponse {
    success: bool,
    filename: String,
    columns: Vec<String>,
    rows: Vec<Vec<String>>,
    row_count: usize,
    recent: Vec<Vec<String>>,
}

async fn handler(
    Query(params): Query<LogQuery>,
    State(state): State<QueryState>,
) -> impl IntoResponse {
    // ---
    info!("GET /load-log - Reading {}", state.log_path.display());

    let snapshot = match load_snapshot(&state.log_path, &RAW_LOG_COLUMNS).await {
        Ok((snapshot, _)) => snapshot,
        Err(e) => return history_error(e, "Log"),
    };
    debug!("GET /load-log - {} rows on disk", snapshot.row_count());

    let filtered = apply_filters(snapshot, &params);
    let recent = filtered.tail(PREVIEW_ROWS).to_vec();

    info!("GET /load-log - Returning {} rows", filtered.row_count());
    (
        StatusCode::OK,
        Json(LogResponse {
            success: true,
            filename: file_name(&state.log_path),
            row_count: filtered.row_count(),
            columns: filtered.columns,
            rows: filtered.rows,
            recent,
        }),
    )
        .into_response()
}

/// Keep rows for the requested spot, then the newest `limit` of them.
fn apply_filters(snapshot: LogSnapshot, params: &LogQuery) -> LogSnapshot {
    // ---
    debug!("Apply filter: {:?}", params);
    let spot_idx = snapshot.column_index("spot");
    let limit = params.limit.unwrap_or(1000);

    let mut rows: Vec<Vec<String>> = snapshot
        .rows
        .into_iter()
        .filter(|row| match (&params.spot, spot_idx) {
            (Some(spot), Some(idx)) => row.get(idx) == Some(spot),
            _ => true,
        })
        .collect();
    let skip = rows.len().saturating_sub(limit);
    rows.drain(..skip);

    LogSnapshot {
        columns: snapshot.columns,
        rows,
    }
}
