use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json, Router,
};
use serde_json::json;
use tokio::sync::watch;
use tracing::{error, warn};

use crate::history::{self, HistoryError};
use crate::{Config, LinkState, LogSnapshot};

mod health;
mod load_counts;
mod load_log;

// ---

/// Shared state for the query routes: where the logs live, never the
/// pipeline's in-memory tracker.
#[derive(Clone)]
pub struct QueryState {
    pub log_path: PathBuf,
    pub counts_path: PathBuf,
    pub known_spots: Arc<Vec<String>>,
    pub link: watch::Receiver<LinkState>,
}

impl QueryState {
    pub fn from_config(cfg: &Config, link: watch::Receiver<LinkState>) -> Self {
        Self {
            log_path: cfg.log_path.clone(),
            counts_path: cfg.counts_path.clone(),
            known_spots: Arc::new(cfg.known_spots.clone()),
            link,
        }
    }
}

pub fn router(state: QueryState) -> Router {
    // ---
    Router::new()
        .merge(load_log::router())
        .merge(load_counts::router())
        .merge(health::router())
        .with_state(state)
}

// ---

/// Read a log into a snapshot; a missing file is an empty snapshot.
async fn load_snapshot(path: &Path, columns: &[&str]) -> Result<(LogSnapshot, Vec<u8>), HistoryError> {
    match history::load_log(path).await? {
        Some(bytes) => Ok((history::parse_snapshot(path, &bytes, columns)?, bytes)),
        None => Ok((LogSnapshot::empty(columns), Vec::new())),
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

/// Map a log read failure onto the JSON error contract.
fn history_error(err: HistoryError, which: &str) -> Response {
    // ---
    if err.is_parse() {
        warn!("Rejecting unreadable {} log: {}", which, err);
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({
                "success": false,
                "error": format!("Invalid CSV file format ({})", which),
            })),
        )
            .into_response();
    }

    error!("Failed to load {} log: {}", which, err);
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({ "success": false, "error": err.to_string() })),
    )
        .into_response()
}

/// Rows returned as the dashboard preview.
const PREVIEW_ROWS: usize = 10;
