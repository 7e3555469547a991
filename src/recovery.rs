//! Seeding the tracker at startup.
//!
//! With [`RestorePolicy::Replay`] the counts log restores each spot's counter
//! and the raw log restores its last status, so counting resumes where the
//! previous process stopped. Occupied transitions present in the raw log but
//! missing from the counts log (a stop between the two appends) are counted
//! now and appended to the counts log. With [`RestorePolicy::Reset`] every
//! spot starts free at zero.

use std::collections::{BTreeSet, HashMap};

use anyhow::{Context, Result};
use tracing::{info, warn};

use crate::config::{Config, RestorePolicy};
use crate::detector;
use crate::history;
use crate::journal::LogSink;
use crate::models::{RawObservation, UsageEvent, OCCUPIED_EVENT};
use crate::tracker::StateTracker;

// ---

/// Build the startup tracker for `cfg` according to its restore policy.
///
/// Usage events recovered from the raw log are written through `sink`
/// before the tracker is returned.
pub fn restore<S: LogSink>(cfg: &Config, sink: &mut S) -> Result<StateTracker> {
    // ---
    let mut tracker = StateTracker::new(cfg.known_spots.iter().cloned());

    if cfg.restore == RestorePolicy::Reset {
        info!("Restore policy 'reset': all spots start free with zero usage");
        return Ok(tracker);
    }

    let raw = match history::read_log(&cfg.log_path)? {
        Some(bytes) => history::parse_observations(&cfg.log_path, &bytes)
            .context("Failed to replay raw log")?,
        None => Vec::new(),
    };
    let events = match history::read_log(&cfg.counts_path)? {
        Some(bytes) => history::parse_usage_events(&cfg.counts_path, &bytes)
            .context("Failed to replay counts log")?,
        None => Vec::new(),
    };

    let recovered = replay(&mut tracker, &raw, &events);
    for event in &recovered {
        sink.append_event(event)
            .context("Failed to record recovered usage events")?;
    }

    for (spot, state) in tracker.spots() {
        info!(
            spot = %spot,
            last_status = state.last_status.code(),
            usage_count = state.usage_count,
            "Restored spot state"
        );
    }
    Ok(tracker)
}

/// Apply replayed rows to `tracker`; rows for unknown spots are skipped.
///
/// The raw log is walked through the edge detector from an all-free start.
/// When a spot has more counted edges there than rows in the counts log,
/// the trailing edges were never counted: they are counted onto the
/// tracker and returned as usage events still to be appended.
pub fn replay(
    tracker: &mut StateTracker,
    raw: &[RawObservation],
    events: &[UsageEvent],
) -> Vec<UsageEvent> {
    // ---
    let mut unknown: BTreeSet<&str> = BTreeSet::new();

    let mut edges: HashMap<&str, Vec<&RawObservation>> = HashMap::new();
    for row in raw {
        let Some(previous) = tracker.get_previous(&row.spot) else {
            unknown.insert(&row.spot);
            continue;
        };
        if detector::is_counted_transition(previous, row.status) {
            edges.entry(row.spot.as_str()).or_default().push(row);
        }
        tracker.set_current(&row.spot, row.status);
    }

    let mut rows_per_spot: HashMap<&str, usize> = HashMap::new();
    for event in events {
        let Some(mut state) = tracker.get(&event.spot) else {
            unknown.insert(&event.spot);
            continue;
        };
        state.usage_count = event.total_count;
        tracker.commit(&event.spot, state);
        *rows_per_spot.entry(event.spot.as_str()).or_default() += 1;
    }

    for (spot, rows) in &rows_per_spot {
        let last = tracker.usage_count(spot).unwrap_or_default();
        if *rows as u64 != last {
            warn!(
                spot = %spot,
                rows,
                last_total = last,
                "Counts log rows disagree with last total (counters were reset earlier?); resuming from last total"
            );
        }
    }

    let known: Vec<String> = tracker.spots().map(|(spot, _)| spot.to_string()).collect();
    let mut recovered = Vec::new();
    for spot in &known {
        let counted = rows_per_spot.get(spot.as_str()).copied().unwrap_or(0);
        let uncounted = match edges.get(spot.as_str()) {
            Some(spot_edges) if spot_edges.len() > counted => &spot_edges[counted..],
            _ => continue,
        };
        let Some(mut state) = tracker.get(spot) else {
            continue;
        };

        for row in uncounted {
            state.usage_count += 1;
            recovered.push(UsageEvent {
                timestamp: row.timestamp,
                spot: spot.clone(),
                event_type: OCCUPIED_EVENT.to_string(),
                total_count: state.usage_count,
            });
        }
        tracker.commit(spot, state);
        warn!(
            spot = %spot,
            uncounted = uncounted.len(),
            usage_count = state.usage_count,
            "Raw log has occupied transitions missing from the counts log; counting them now"
        );
    }

    if !unknown.is_empty() {
        warn!(spots = ?unknown, "Ignored log rows for spots outside the known set");
    }
    recovered
}
