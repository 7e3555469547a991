//! Configuration loader for the `parkly-occupancy` service.
//!
//! This module centralizes all runtime configuration values and their defaults,
//! loading from environment variables (with optional `.env` file support
//! provided by the caller). By consolidating configuration logic here, we
//! avoid scattering `env::var` calls throughout the codebase, and every
//! value is validated once at startup so the process never partially
//! initializes on a bad setting.
//!
use std::{env, fmt, path::PathBuf, str::FromStr};

use anyhow::{anyhow, bail, Result};

/// Parse an optional environment variable into `$ty`, falling back to a default.
macro_rules! parse_env {
    ($lookup:expr, $var_name:expr, $ty:ty, $default:expr) => {
        $lookup($var_name)
            .map(|v| v.trim().parse::<$ty>())
            .transpose()
            .map_err(|e| anyhow!("Invalid {}: {}", $var_name, e))?
            .unwrap_or($default)
    };
}

/// Parse a required, non-blank string environment variable.
macro_rules! require_env {
    ($lookup:expr, $var_name:expr) => {
        $lookup($var_name)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .ok_or_else(|| anyhow!("{} must be set in .env or environment", $var_name))?
    };
}

pub const DEFAULT_TOPIC: &str = "esp32.parkly";
pub const DEFAULT_SPOTS: &str = "A,B";
pub const DEFAULT_LOG_PATH: &str = "parkly_log.csv";
pub const DEFAULT_COUNTS_PATH: &str = "parkly_counts.csv";

/// How per-spot counters are seeded when the process starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestorePolicy {
    /// Rebuild counters and last status from the existing logs.
    Replay,
    /// Start every spot at free with a zero counter.
    Reset,
}

impl FromStr for RestorePolicy {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "replay" => Ok(Self::Replay),
            "reset" => Ok(Self::Reset),
            other => bail!("expected 'replay' or 'reset', got '{}'", other),
        }
    }
}

impl fmt::Display for RestorePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Replay => write!(f, "replay"),
            Self::Reset => write!(f, "reset"),
        }
    }
}

/// Strongly typed application configuration.
///
/// All fields are immutable after loading, ensuring a consistent configuration
/// snapshot for the lifetime of the application.
#[derive(Debug, Clone)]
pub struct Config {
    // ---
    /// Pub/sub broker host name or address.
    pub broker_host: String,

    /// Pub/sub broker port.
    pub broker_port: u16,

    /// Subject the sensors publish on.
    pub topic: String,

    /// Closed set of monitored spot identifiers, in declaration order.
    pub known_spots: Vec<String>,

    /// Raw observation log (one row per accepted message).
    pub log_path: PathBuf,

    /// Usage event log (one row per counted transition).
    pub counts_path: PathBuf,

    /// Startup counter policy.
    pub restore: RestorePolicy,

    /// Capacity of the queue between the feed and the pipeline.
    pub queue_depth: usize,

    /// Port the query service listens on.
    pub http_port: u16,
}

/// Load configuration from environment variables with defaults.
///
/// Required:
/// - `BROKER_HOST` – pub/sub broker address
///
/// Optional:
/// - `BROKER_PORT` – broker port (default: 4222)
/// - `PARKLY_TOPIC` – subject to subscribe to (default: `esp32.parkly`)
/// - `PARKLY_SPOTS` – comma-separated known spots (default: `A,B`)
/// - `PARKLY_LOG_PATH` – raw log file (default: `parkly_log.csv`)
/// - `PARKLY_COUNTS_PATH` – counts log file (default: `parkly_counts.csv`)
/// - `PARKLY_RESTORE` – `replay` or `reset` (default: `replay`)
/// - `PARKLY_QUEUE_DEPTH` – feed queue capacity (default: 1024)
/// - `HTTP_PORT` – query service port (default: 8080)
///
/// Returns an error if any required variable is missing or invalid.
pub fn load_from_env() -> Result<Config> {
    load_from(|name| env::var(name).ok())
}

/// Load configuration through an arbitrary variable lookup.
pub fn load_from<F>(lookup: F) -> Result<Config>
where
    F: Fn(&str) -> Option<String>,
{
    // ---
    let broker_host = require_env!(lookup, "BROKER_HOST");
    let broker_port = parse_env!(lookup, "BROKER_PORT", u16, 4222);
    let topic = lookup("PARKLY_TOPIC").unwrap_or_else(|| DEFAULT_TOPIC.to_string());
    let spots = lookup("PARKLY_SPOTS").unwrap_or_else(|| DEFAULT_SPOTS.to_string());
    let log_path = lookup("PARKLY_LOG_PATH").unwrap_or_else(|| DEFAULT_LOG_PATH.to_string());
    let counts_path =
        lookup("PARKLY_COUNTS_PATH").unwrap_or_else(|| DEFAULT_COUNTS_PATH.to_string());
    let restore = parse_env!(lookup, "PARKLY_RESTORE", RestorePolicy, RestorePolicy::Replay);
    let queue_depth = parse_env!(lookup, "PARKLY_QUEUE_DEPTH", usize, 1024);
    let http_port = parse_env!(lookup, "HTTP_PORT", u16, 8080);

    if broker_port == 0 {
        bail!("Invalid BROKER_PORT: must be between 1 and 65535");
    }
    if queue_depth == 0 {
        bail!("Invalid PARKLY_QUEUE_DEPTH: must be at least 1");
    }

    let topic = topic.trim().to_string();
    if topic.is_empty() || topic.chars().any(char::is_whitespace) {
        bail!("Invalid PARKLY_TOPIC '{}': must be non-empty without whitespace", topic);
    }

    let log_path = PathBuf::from(log_path.trim());
    let counts_path = PathBuf::from(counts_path.trim());
    if log_path.as_os_str().is_empty() || counts_path.as_os_str().is_empty() {
        bail!("PARKLY_LOG_PATH and PARKLY_COUNTS_PATH must not be empty");
    }
    if log_path == counts_path {
        bail!(
            "PARKLY_LOG_PATH and PARKLY_COUNTS_PATH must differ (both are {})",
            log_path.display()
        );
    }

    Ok(Config {
        broker_host,
        broker_port,
        topic,
        known_spots: parse_spots(&spots)?,
        log_path,
        counts_path,
        restore,
        queue_depth,
        http_port,
    })
}

/// Split the spot enumeration, rejecting blanks and duplicates.
fn parse_spots(raw: &str) -> Result<Vec<String>> {
    // ---
    let mut spots: Vec<String> = Vec::new();
    for spot in raw.split(',').map(str::trim) {
        if spot.is_empty() {
            bail!("Invalid PARKLY_SPOTS '{}': empty spot identifier", raw);
        }
        if spots.iter().any(|s| s == spot) {
            bail!("Invalid PARKLY_SPOTS '{}': duplicate spot '{}'", raw, spot);
        }
        spots.push(spot.to_string());
    }
    Ok(spots)
}

impl Config {
    /// Connection URL for the pub/sub client.
    pub fn broker_url(&self) -> String {
        format!("nats://{}:{}", self.broker_host, self.broker_port)
    }

    /// Log the loaded configuration for debugging purposes.
    pub fn log_config(&self) {
        // ---
        tracing::info!("Configuration loaded:");
        tracing::info!("  BROKER_HOST        : {}", self.broker_host);
        tracing::info!("  BROKER_PORT        : {}", self.broker_port);
        tracing::info!("  PARKLY_TOPIC       : {}", self.topic);
        tracing::info!("  PARKLY_SPOTS       : {}", self.known_spots.join(","));
        tracing::info!("  PARKLY_LOG_PATH    : {}", self.log_path.display());
        tracing::info!("  PARKLY_COUNTS_PATH : {}", self.counts_path.display());
        tracing::info!("  PARKLY_RESTORE     : {}", self.restore);
        tracing::info!("  PARKLY_QUEUE_DEPTH : {}", self.queue_depth);
        tracing::info!("  HTTP_PORT          : {}", self.http_port);
    }
}
