//! Parking-spot occupancy pipeline.
//!
//! Sensor status reports arrive over a pub/sub subject, are validated
//! against a closed set of spots, and are persisted to two append-only CSV
//! logs: every accepted observation to the raw log, and every free to
//! occupied transition, with its running total, to the counts log. A small
//! HTTP service reads those logs back for reporting.
//!
//! Module layout (leaves first):
//! - `models` – wire and log record types
//! - `tracker` – last known state per spot
//! - `detector` – free → occupied edge detection
//! - `journal` – append-only log sinks
//! - `pipeline` – validation, planning and the single consumer loop
//! - `feed` – broker subscription
//! - `history` / `recovery` – reading the logs back
//! - `routes` – query service

pub mod config;
pub mod detector;
pub mod feed;
pub mod history;
pub mod journal;
pub mod models;
pub mod pipeline;
pub mod recovery;
pub mod routes;
pub mod tracker;

pub use config::Config;

// Re-exported so routes/*.rs only depend on their parent module.
pub use feed::LinkState;
pub use history::{LogSnapshot, SpotCount};
pub use models::{COUNTS_LOG_COLUMNS, RAW_LOG_COLUMNS};
