//! Data models for the occupancy pipeline: inbound observations and the
//! two append-only record shapes.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

// ---

/// Local timestamp layout shared by both logs.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Raw log header, in column order.
pub const RAW_LOG_COLUMNS: [&str; 4] = ["timestamp", "spot", "status", "battery"];

/// Counts log header, in column order.
pub const COUNTS_LOG_COLUMNS: [&str; 4] = ["timestamp", "spot", "event_type", "total_count"];

/// The only event type the counts log carries.
pub const OCCUPIED_EVENT: &str = "occupied";

/// Binary occupancy state of a spot. Wire and log encoding is `0` / `1`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum SpotStatus {
    #[default]
    Free,
    Occupied,
}

impl SpotStatus {
    /// Map a wire integer onto a status; anything outside `{0, 1}` is `None`.
    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            0 => Some(Self::Free),
            1 => Some(Self::Occupied),
            _ => None,
        }
    }

    pub fn code(self) -> u8 {
        match self {
            Self::Free => 0,
            Self::Occupied => 1,
        }
    }
}

impl From<SpotStatus> for u8 {
    fn from(status: SpotStatus) -> u8 {
        status.code()
    }
}

impl TryFrom<u8> for SpotStatus {
    type Error = String;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        Self::from_code(i64::from(code)).ok_or_else(|| format!("invalid status code {}", code))
    }
}

/// A validated inbound message: known spot, binary status.
#[derive(Debug, Clone, PartialEq)]
pub struct Observation {
    // ---
    pub spot: String,
    pub status: SpotStatus,
    pub battery: Option<f64>,
}

impl Observation {
    // ---
    pub fn to_raw_record(&self, timestamp: NaiveDateTime) -> RawObservation {
        RawObservation {
            timestamp,
            spot: self.spot.clone(),
            status: self.status,
            battery: self.battery,
        }
    }
}

/// One row of the raw log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawObservation {
    // ---
    #[serde(with = "local_timestamp")]
    pub timestamp: NaiveDateTime,
    pub spot: String,
    pub status: SpotStatus,
    pub battery: Option<f64>,
}

/// One row of the counts log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageEvent {
    // ---
    #[serde(with = "local_timestamp")]
    pub timestamp: NaiveDateTime,
    pub spot: String,
    pub event_type: String,
    pub total_count: u64,
}

/// Serde adapter for the `%Y-%m-%d %H:%M:%S` local timestamp column.
mod local_timestamp {
    use chrono::NaiveDateTime;
    use serde::{de::Error, Deserialize, Deserializer, Serializer};

    use super::TIMESTAMP_FORMAT;

    pub fn serialize<S: Serializer>(ts: &NaiveDateTime, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(&ts.format(TIMESTAMP_FORMAT))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<NaiveDateTime, D::Error> {
        let raw = String::deserialize(deserializer)?;
        NaiveDateTime::parse_from_str(&raw, TIMESTAMP_FORMAT).map_err(D::Error::custom)
    }
}
