//! Validation, transition planning and persistence for inbound messages.
//!
//! Each payload goes through three steps:
//! 1. [`decode`] turns bytes into an [`Observation`] or rejects them.
//! 2. [`plan`] is a pure function of the current tracker state and the
//!    observation; it yields the records to append and the spot's next state.
//! 3. [`Pipeline::apply`] appends the raw row, then the usage row (if any),
//!    and only after every append succeeded commits the next state.
//!
//! Committing last keeps `usage_count` equal to the number of counts rows
//! for every spot: a failed append leaves memory exactly as it was.

use chrono::{Local, NaiveDateTime};
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::detector::{self, TransitionEvent};
use crate::journal::{JournalError, LogSink};
use crate::models::{Observation, RawObservation, SpotStatus, UsageEvent, OCCUPIED_EVENT};
use crate::tracker::{SpotState, StateTracker};

// ---

#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error("malformed payload: {0}")]
    Malformed(String),

    #[error("payload has no 'spot' field")]
    MissingSpot,

    #[error("unknown spot {0}")]
    UnknownSpot(String),

    #[error("invalid status {0}, expected integer 0 or 1")]
    InvalidStatus(String),

    #[error("failed to persist record: {0}")]
    Persist(#[from] JournalError),
}

impl IngestError {
    /// True for messages discarded by validation, false for persistence failures.
    pub fn is_rejection(&self) -> bool {
        !matches!(self, Self::Persist(_))
    }
}

/// Decode and validate a payload against the known spots.
pub fn decode(payload: &[u8], tracker: &StateTracker) -> Result<Observation, IngestError> {
    // ---
    let value: Value =
        serde_json::from_slice(payload).map_err(|e| IngestError::Malformed(e.to_string()))?;
    let fields = match value {
        Value::Object(fields) => fields,
        other => {
            return Err(IngestError::Malformed(format!(
                "expected a JSON object, got {}",
                other
            )))
        }
    };

    let spot = match fields.get("spot") {
        None | Some(Value::Null) => return Err(IngestError::MissingSpot),
        Some(Value::String(spot)) if tracker.is_known(spot) => spot.clone(),
        Some(Value::String(spot)) => return Err(IngestError::UnknownSpot(format!("'{}'", spot))),
        Some(other) => return Err(IngestError::UnknownSpot(other.to_string())),
    };

    let status = match fields.get("status") {
        Some(Value::Number(n)) => n
            .as_i64()
            .and_then(SpotStatus::from_code)
            .ok_or_else(|| IngestError::InvalidStatus(n.to_string()))?,
        Some(other) => return Err(IngestError::InvalidStatus(other.to_string())),
        None => return Err(IngestError::InvalidStatus("(missing)".to_string())),
    };

    let battery = match fields.get("battery") {
        Some(Value::Number(n)) => n.as_f64(),
        None | Some(Value::Null) => None,
        Some(other) => {
            debug!(spot = %spot, battery = %other, "Ignoring non-numeric battery value");
            None
        }
    };

    Ok(Observation {
        spot,
        status,
        battery,
    })
}

/// Records to append for one observation, and the state to commit afterwards.
#[derive(Debug, Clone, PartialEq)]
pub struct Effects {
    pub raw: RawObservation,
    pub event: Option<UsageEvent>,
    pub next: SpotState,
}

/// Work out the effects of `obs` without touching the tracker or any log.
pub fn plan(
    tracker: &StateTracker,
    obs: &Observation,
    now: NaiveDateTime,
) -> Result<Effects, IngestError> {
    // ---
    let mut next = tracker
        .get(&obs.spot)
        .ok_or_else(|| IngestError::UnknownSpot(format!("'{}'", obs.spot)))?;

    let event = detector::evaluate(&obs.spot, &mut next, obs.status).map(|t| UsageEvent {
        timestamp: now,
        spot: t.spot,
        event_type: OCCUPIED_EVENT.to_string(),
        total_count: t.new_count,
    });
    next.last_status = obs.status;

    Ok(Effects {
        raw: obs.to_raw_record(now),
        event,
        next,
    })
}

/// Result of a fully processed message.
#[derive(Debug, Clone, PartialEq)]
pub struct Outcome {
    pub observation: Observation,
    pub transition: Option<TransitionEvent>,
}

/// Running totals for the shutdown summary.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PipelineStats {
    pub accepted: u64,
    pub transitions: u64,
    pub rejected: u64,
    pub failed: u64,
}

/// Owns the tracker and the sink; the single mutation path for both.
pub struct Pipeline<S> {
    tracker: StateTracker,
    sink: S,
    stats: PipelineStats,
}

impl<S: LogSink> Pipeline<S> {
    pub fn new(tracker: StateTracker, sink: S) -> Self {
        Self {
            tracker,
            sink,
            stats: PipelineStats::default(),
        }
    }

    /// Decode, plan and apply one payload.
    pub fn handle(&mut self, payload: &[u8], now: NaiveDateTime) -> Result<Outcome, IngestError> {
        // ---
        let result = self.process(payload, now);

        match &result {
            Ok(outcome) => {
                self.stats.accepted += 1;
                if outcome.transition.is_some() {
                    self.stats.transitions += 1;
                }
            }
            Err(e) if e.is_rejection() => self.stats.rejected += 1,
            Err(_) => self.stats.failed += 1,
        }
        result
    }

    fn process(&mut self, payload: &[u8], now: NaiveDateTime) -> Result<Outcome, IngestError> {
        let observation = decode(payload, &self.tracker)?;
        let effects = plan(&self.tracker, &observation, now)?;
        self.apply(observation, effects)
    }

    /// Append the planned records, then commit the spot's next state.
    pub fn apply(&mut self, observation: Observation, effects: Effects) -> Result<Outcome, IngestError> {
        // ---
        self.sink.append_raw(&effects.raw)?;
        if let Some(event) = &effects.event {
            self.sink.append_event(event)?;
        }

        if !self.tracker.commit(&observation.spot, effects.next) {
            return Err(IngestError::UnknownSpot(format!("'{}'", observation.spot)));
        }

        let transition = effects.event.map(|e| TransitionEvent {
            spot: e.spot,
            new_count: e.total_count,
        });
        Ok(Outcome {
            observation,
            transition,
        })
    }

    pub fn tracker(&self) -> &StateTracker {
        &self.tracker
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn stats(&self) -> PipelineStats {
        self.stats
    }
}

/// Consume payloads until every sender is gone, one message at a time.
///
/// Runs on a blocking thread: appends are synchronous file writes. Returns
/// the pipeline once the queue is drained so the caller can report on it.
pub fn drain<S: LogSink>(mut pipeline: Pipeline<S>, mut rx: mpsc::Receiver<Vec<u8>>) -> Pipeline<S> {
    // ---
    info!("Pipeline consumer started");

    while let Some(payload) = rx.blocking_recv() {
        let now = Local::now().naive_local();
        match pipeline.handle(&payload, now) {
            Ok(Outcome {
                observation,
                transition: Some(t),
            }) => {
                info!(
                    spot = %t.spot,
                    total_count = t.new_count,
                    battery = ?observation.battery,
                    "Spot occupied (0->1), usage event recorded"
                );
            }
            Ok(Outcome { observation, .. }) => {
                debug!(
                    spot = %observation.spot,
                    status = observation.status.code(),
                    "Observation recorded"
                );
            }
            Err(e) if e.is_rejection() => {
                warn!(
                    error = %e,
                    payload = %String::from_utf8_lossy(&payload),
                    "Message discarded"
                );
            }
            Err(e) => {
                error!(
                    error = %e,
                    payload = %String::from_utf8_lossy(&payload),
                    "Message not persisted, state left unchanged"
                );
            }
        }
    }

    let stats = pipeline.stats();
    info!(
        accepted = stats.accepted,
        transitions = stats.transitions,
        rejected = stats.rejected,
        failed = stats.failed,
        "Pipeline consumer drained"
    );
    pipeline
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use crate::journal::MemoryJournal;
    use chrono::NaiveDate;
    use serde_json::json;
    use std::io;
    use std::path::PathBuf;

    fn create_test_pipeline() -> Pipeline<MemoryJournal> {
        Pipeline::new(StateTracker::new(["A", "B"]), MemoryJournal::new())
    }

    fn create_test_timestamp(second: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2025, 3, 26)
            .unwrap()
            .and_hms_opt(18, 45, second)
            .unwrap()
    }

    fn msg(spot: &str, status: i64) -> Vec<u8> {
        json!({ "spot": spot, "status": status, "battery": 3.9 })
            .to_string()
            .into_bytes()
    }

    fn feed<S: LogSink>(pipeline: &mut Pipeline<S>, messages: &[Vec<u8>]) {
        for (i, m) in messages.iter().enumerate() {
            let _ = pipeline.handle(m, create_test_timestamp(i as u32));
        }
    }

    fn counts_for(journal: &MemoryJournal, spot: &str) -> Vec<u64> {
        journal
            .events
            .iter()
            .filter(|e| e.spot == spot)
            .map(|e| e.total_count)
            .collect()
    }

    /// Sink whose appends can be switched to fail.
    #[derive(Default)]
    struct FlakySink {
        inner: MemoryJournal,
        fail_raw: bool,
        fail_events: bool,
    }

    fn flaky_error() -> JournalError {
        JournalError::Io {
            path: PathBuf::from("flaky.csv"),
            source: io::Error::new(io::ErrorKind::Other, "disk full"),
        }
    }

    impl LogSink for FlakySink {
        fn append_raw(&mut self, record: &RawObservation) -> Result<(), JournalError> {
            if self.fail_raw {
                return Err(flaky_error());
            }
            self.inner.append_raw(record)
        }

        fn append_event(&mut self, record: &UsageEvent) -> Result<(), JournalError> {
            if self.fail_events {
                return Err(flaky_error());
            }
            self.inner.append_event(record)
        }
    }

    #[test]
    fn test_boundary_sequence() {
        // ---
        let mut pipeline = create_test_pipeline();
        feed(
            &mut pipeline,
            &[msg("A", 0), msg("A", 1), msg("A", 1), msg("A", 0), msg("A", 1)],
        );

        let journal = pipeline.sink();
        assert_eq!(journal.raw.iter().filter(|r| r.spot == "A").count(), 5);
        assert_eq!(counts_for(journal, "A"), vec![1, 2]);
        assert_eq!(pipeline.tracker().usage_count("A"), Some(2));
        assert_eq!(pipeline.tracker().get_previous("A"), Some(SpotStatus::Occupied));
        assert_eq!(pipeline.tracker().usage_count("B"), Some(0));
    }

    #[test]
    fn test_first_message_uses_implicit_free() {
        // ---
        let mut pipeline = create_test_pipeline();
        let outcome = pipeline.handle(&msg("B", 1), create_test_timestamp(0)).unwrap();

        let transition = outcome.transition.unwrap();
        assert_eq!(transition.spot, "B");
        assert_eq!(transition.new_count, 1);
    }

    #[test]
    fn test_duplicate_delivery_does_not_recount() {
        // ---
        let mut pipeline = create_test_pipeline();
        let m = msg("A", 1);
        feed(&mut pipeline, &[m.clone(), m.clone(), m]);

        assert_eq!(pipeline.tracker().usage_count("A"), Some(1));
        assert_eq!(pipeline.sink().raw.len(), 3);
        assert_eq!(pipeline.sink().events.len(), 1);
    }

    #[test]
    fn test_unknown_spot_rejected_without_effects() {
        // ---
        let mut pipeline = create_test_pipeline();
        let err = pipeline
            .handle(&msg("Z", 1), create_test_timestamp(0))
            .unwrap_err();

        assert!(matches!(err, IngestError::UnknownSpot(ref s) if s == "'Z'"));
        assert!(err.is_rejection());
        assert!(pipeline.sink().raw.is_empty());
        assert!(pipeline.sink().events.is_empty());
        assert_eq!(pipeline.tracker().usage_count("A"), Some(0));
        assert_eq!(pipeline.tracker().usage_count("B"), Some(0));
        assert_eq!(pipeline.stats().rejected, 1);
    }

    fn rejects(payload: &[u8]) -> IngestError {
        let tracker = StateTracker::new(["A", "B"]);
        let err = decode(payload, &tracker).unwrap_err();
        assert!(err.is_rejection(), "not a rejection: {:?}", err);
        err
    }

    #[test]
    fn test_invalid_payloads_rejected() {
        // ---
        assert!(matches!(rejects(b"not json"), IngestError::Malformed(_)));
        assert!(matches!(rejects(b"[1, 2]"), IngestError::Malformed(_)));
        assert!(matches!(rejects(b"\xff\xfe"), IngestError::Malformed(_)));
        assert!(matches!(rejects(br#"{"status": 1}"#), IngestError::MissingSpot));
        assert!(matches!(
            rejects(br#"{"spot": 7, "status": 1}"#),
            IngestError::UnknownSpot(_)
        ));
    }

    #[test]
    fn test_invalid_status_rejected() {
        // ---
        for payload in [
            r#"{"spot": "A"}"#,
            r#"{"spot": "A", "status": "1"}"#,
            r#"{"spot": "A", "status": 1.0}"#,
            r#"{"spot": "A", "status": true}"#,
            r#"{"spot": "A", "status": 2}"#,
            r#"{"spot": "A", "status": -1}"#,
        ] {
            assert!(
                matches!(rejects(payload.as_bytes()), IngestError::InvalidStatus(_)),
                "payload {} should be rejected for its status",
                payload
            );
        }
    }

    #[test]
    fn test_battery_is_optional() {
        // ---
        let tracker = StateTracker::new(["A"]);

        let obs = decode(br#"{"spot": "A", "status": 0}"#, &tracker).unwrap();
        assert_eq!(obs.battery, None);

        let obs = decode(br#"{"spot": "A", "status": 0, "battery": 3.3}"#, &tracker).unwrap();
        assert_eq!(obs.battery, Some(3.3));

        let obs = decode(br#"{"spot": "A", "status": 0, "battery": "low"}"#, &tracker).unwrap();
        assert_eq!(obs.battery, None);
        assert_eq!(obs.status, SpotStatus::Free);
    }

    #[test]
    fn test_plan_is_pure() {
        // ---
        let tracker = StateTracker::new(["A"]);
        let obs = decode(&msg("A", 1), &tracker).unwrap();
        let ts = create_test_timestamp(9);

        let effects = plan(&tracker, &obs, ts).unwrap();

        assert_eq!(effects.raw.timestamp, ts);
        assert_eq!(effects.raw.battery, Some(3.9));
        let event = effects.event.unwrap();
        assert_eq!(event.timestamp, ts);
        assert_eq!(event.event_type, "occupied");
        assert_eq!(event.total_count, 1);
        assert_eq!(effects.next.last_status, SpotStatus::Occupied);
        // Tracker untouched until apply
        assert_eq!(tracker.get("A"), Some(SpotState::default()));
    }

    #[test]
    fn test_counts_rows_match_memory_and_are_monotonic() {
        // ---
        let mut pipeline = create_test_pipeline();
        let statuses = [1, 0, 0, 1, 1, 0, 1, 0, 1, 1, 1, 0];
        let messages: Vec<Vec<u8>> = statuses.iter().map(|s| msg("A", *s)).collect();
        feed(&mut pipeline, &messages);

        let expected_edges = std::iter::once(&0)
            .chain(statuses.iter())
            .zip(statuses.iter())
            .filter(|(prev, cur)| **prev == 0 && **cur == 1)
            .count() as u64;

        let counts = counts_for(pipeline.sink(), "A");
        assert_eq!(counts.len() as u64, expected_edges);
        assert_eq!(pipeline.tracker().usage_count("A"), Some(expected_edges));
        assert_eq!(counts, (1..=expected_edges).collect::<Vec<_>>());
        assert_eq!(pipeline.sink().raw.len(), statuses.len());
    }

    #[test]
    fn test_interleaved_spots_do_not_mix() {
        // ---
        let mut pipeline = create_test_pipeline();
        feed(
            &mut pipeline,
            &[
                msg("A", 1),
                msg("B", 0),
                msg("B", 1),
                msg("A", 1),
                msg("A", 0),
                msg("B", 1),
                msg("A", 1),
                msg("B", 0),
            ],
        );

        assert_eq!(counts_for(pipeline.sink(), "A"), vec![1, 2]);
        assert_eq!(counts_for(pipeline.sink(), "B"), vec![1]);
        assert_eq!(pipeline.tracker().get_previous("A"), Some(SpotStatus::Occupied));
        assert_eq!(pipeline.tracker().get_previous("B"), Some(SpotStatus::Free));
    }

    #[test]
    fn test_raw_append_failure_leaves_state_unchanged() {
        // ---
        let tracker = StateTracker::new(["A"]);
        let mut pipeline = Pipeline::new(
            tracker,
            FlakySink {
                fail_raw: true,
                ..Default::default()
            },
        );

        let err = pipeline.handle(&msg("A", 1), create_test_timestamp(0)).unwrap_err();
        assert!(matches!(err, IngestError::Persist(_)));
        assert!(!err.is_rejection());
        assert_eq!(pipeline.tracker().get("A"), Some(SpotState::default()));
        assert_eq!(pipeline.stats().failed, 1);
    }

    #[test]
    fn test_event_append_failure_keeps_count_consistent() {
        // ---
        let tracker = StateTracker::new(["A"]);
        let mut pipeline = Pipeline::new(
            tracker,
            FlakySink {
                fail_events: true,
                ..Default::default()
            },
        );

        assert!(pipeline.handle(&msg("A", 1), create_test_timestamp(0)).is_err());
        assert_eq!(pipeline.tracker().usage_count("A"), Some(0));
        assert_eq!(pipeline.tracker().get_previous("A"), Some(SpotStatus::Free));

        // Once the sink recovers the next occupied report is counted as 1
        pipeline.sink.fail_events = false;
        let outcome = pipeline.handle(&msg("A", 1), create_test_timestamp(1)).unwrap();
        assert_eq!(outcome.transition.unwrap().new_count, 1);
        assert_eq!(pipeline.sink().inner.events.len(), 1);
        assert_eq!(pipeline.tracker().usage_count("A"), Some(1));
    }

    #[test]
    fn test_drain_processes_queue_then_returns() {
        // ---
        let (tx, rx) = mpsc::channel(8);
        for m in [msg("A", 1), b"garbage".to_vec(), msg("B", 1), msg("A", 1)] {
            tx.try_send(m).unwrap();
        }
        drop(tx);

        let pipeline = drain(create_test_pipeline(), rx);

        let stats = pipeline.stats();
        assert_eq!(stats.accepted, 3);
        assert_eq!(stats.rejected, 1);
        assert_eq!(stats.transitions, 2);
        assert_eq!(pipeline.sink().raw.len(), 3);
    }
}
