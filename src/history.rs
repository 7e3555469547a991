//! Readers for the persisted logs.
//!
//! Shared by the query service and by startup recovery. Nothing here holds
//! a handle on the pipeline; the files are the only source.

use std::{
    collections::HashMap,
    io,
    path::{Path, PathBuf},
};

use serde::{de::DeserializeOwned, Serialize};

use crate::models::{RawObservation, UsageEvent};

// ---

#[derive(Debug, thiserror::Error)]
pub enum HistoryError {
    #[error("cannot read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("invalid CSV in {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },
}

impl HistoryError {
    pub fn is_parse(&self) -> bool {
        matches!(self, Self::Parse { .. })
    }
}

/// Column names plus every row as strings, in file order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LogSnapshot {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl LogSnapshot {
    pub fn empty(columns: &[&str]) -> Self {
        Self {
            columns: columns.iter().map(|c| c.to_string()).collect(),
            rows: Vec::new(),
        }
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    /// The newest `n` rows.
    pub fn tail(&self, n: usize) -> &[Vec<String>] {
        &self.rows[self.rows.len().saturating_sub(n)..]
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }
}

/// Latest cumulative count for one spot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SpotCount {
    pub spot: String,
    pub total_count: u64,
}

/// Read a whole log file; a missing file is `None`.
pub fn read_log(path: &Path) -> Result<Option<Vec<u8>>, HistoryError> {
    match std::fs::read(path) {
        Ok(bytes) => Ok(Some(bytes)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(source) => Err(HistoryError::Io {
            path: path.to_path_buf(),
            source,
        }),
    }
}

/// Async counterpart of [`read_log`] for request handlers.
pub async fn load_log(path: &Path) -> Result<Option<Vec<u8>>, HistoryError> {
    match tokio::fs::read(path).await {
        Ok(bytes) => Ok(Some(bytes)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(source) => Err(HistoryError::Io {
            path: path.to_path_buf(),
            source,
        }),
    }
}

/// Parse log bytes into a string snapshot; empty input yields `default_columns`.
///
/// Rows whose field count differs from the header are a parse error.
pub fn parse_snapshot(
    path: &Path,
    data: &[u8],
    default_columns: &[&str],
) -> Result<LogSnapshot, HistoryError> {
    // ---
    if data.iter().all(u8::is_ascii_whitespace) {
        return Ok(LogSnapshot::empty(default_columns));
    }

    let parse_err = |source| HistoryError::Parse {
        path: path.to_path_buf(),
        source,
    };

    let mut reader = csv::Reader::from_reader(data);
    let columns: Vec<String> = reader
        .headers()
        .map_err(parse_err)?
        .iter()
        .map(str::to_string)
        .collect();

    let mut rows: Vec<Vec<String>> = Vec::new();
    for record in reader.records() {
        let record = record.map_err(parse_err)?;
        rows.push(record.iter().map(str::to_string).collect());
    }

    Ok(LogSnapshot { columns, rows })
}

fn parse_records<T: DeserializeOwned>(path: &Path, data: &[u8]) -> Result<Vec<T>, HistoryError> {
    csv::Reader::from_reader(data)
        .deserialize()
        .collect::<Result<Vec<T>, csv::Error>>()
        .map_err(|source| HistoryError::Parse {
            path: path.to_path_buf(),
            source,
        })
}

pub fn parse_observations(path: &Path, data: &[u8]) -> Result<Vec<RawObservation>, HistoryError> {
    parse_records(path, data)
}

pub fn parse_usage_events(path: &Path, data: &[u8]) -> Result<Vec<UsageEvent>, HistoryError> {
    parse_records(path, data)
}

/// Last `total_count` per known spot, in `known_spots` order, 0 when a spot
/// has no events yet. Events for other spots are ignored.
pub fn latest_totals(events: &[UsageEvent], known_spots: &[String]) -> Vec<SpotCount> {
    // ---
    let mut last: HashMap<&str, u64> = HashMap::new();
    for event in events {
        last.insert(event.spot.as_str(), event.total_count);
    }

    known_spots
        .iter()
        .map(|spot| SpotCount {
            spot: spot.clone(),
            total_count: last.get(spot.as_str()).copied().unwrap_or(0),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use crate::models::{COUNTS_LOG_COLUMNS, RAW_LOG_COLUMNS};
    use tempfile::TempDir;

    const RAW: &str = "timestamp,spot,status,battery\n\
        2025-06-01 08:30:00,A,0,3.9\n\
        2025-06-01 08:31:00,A,1,3.9\n\
        2025-06-01 08:32:00,B,1,\n";

    const COUNTS: &str = "timestamp,spot,event_type,total_count\n\
        2025-06-01 08:31:00,A,occupied,1\n\
        2025-06-01 08:32:00,B,occupied,1\n\
        2025-06-01 08:40:00,A,occupied,2\n";

    fn path() -> PathBuf {
        PathBuf::from("test.csv")
    }

    #[test]
    fn test_snapshot_columns_and_rows() {
        // ---
        let snap = parse_snapshot(&path(), RAW.as_bytes(), &RAW_LOG_COLUMNS).unwrap();

        assert_eq!(snap.columns, vec!["timestamp", "spot", "status", "battery"]);
        assert_eq!(snap.row_count(), 3);
        assert_eq!(snap.rows[2], vec!["2025-06-01 08:32:00", "B", "1", ""]);
        assert_eq!(snap.tail(2).len(), 2);
        assert_eq!(snap.tail(10).len(), 3);
        assert_eq!(snap.column_index("spot"), Some(1));
    }

    #[test]
    fn test_empty_input_uses_default_columns() {
        // ---
        let snap = parse_snapshot(&path(), b"", &COUNTS_LOG_COLUMNS).unwrap();

        assert_eq!(snap.columns, vec!["timestamp", "spot", "event_type", "total_count"]);
        assert_eq!(snap.row_count(), 0);
    }

    #[test]
    fn test_ragged_rows_are_parse_errors() {
        // ---
        let data = "timestamp,spot,status,battery\n2025-06-01 08:30:00,A\n";
        let err = parse_snapshot(&path(), data.as_bytes(), &RAW_LOG_COLUMNS).unwrap_err();

        assert!(err.is_parse());
    }

    #[test]
    fn test_latest_totals_defaults_to_zero() {
        // ---
        let events = parse_usage_events(&path(), COUNTS.as_bytes()).unwrap();
        let known = vec!["A".to_string(), "B".to_string(), "C".to_string()];

        let totals = latest_totals(&events, &known);

        assert_eq!(
            totals,
            vec![
                SpotCount { spot: "A".into(), total_count: 2 },
                SpotCount { spot: "B".into(), total_count: 1 },
                SpotCount { spot: "C".into(), total_count: 0 },
            ]
        );
    }

    #[test]
    fn test_typed_observations() {
        // ---
        let rows = parse_observations(&path(), RAW.as_bytes()).unwrap();

        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0].battery, Some(3.9));
        assert_eq!(rows[2].battery, None);
    }

    #[test]
    fn test_read_missing_file_is_none() {
        // ---
        let dir = TempDir::new().unwrap();
        assert!(read_log(&dir.path().join("absent.csv")).unwrap().is_none());
    }

    #[tokio::test]
    async fn test_load_existing_file() {
        // ---
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("counts.csv");
        std::fs::write(&file, COUNTS).unwrap();

        let bytes = load_log(&file).await.unwrap().unwrap();
        assert_eq!(bytes, COUNTS.as_bytes());
    }
}
