//! Free → occupied edge detection.
//!
//! Only the `0 -> 1` edge is counted; vacating a spot (`1 -> 0`) is an
//! observed state change but produces no usage event.

use crate::models::SpotStatus;
use crate::tracker::SpotState;

// ---

/// A counted transition and the spot's counter after it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransitionEvent {
    pub spot: String,
    pub new_count: u64,
}

/// True iff `previous -> current` is the free to occupied edge.
pub fn is_counted_transition(previous: SpotStatus, current: SpotStatus) -> bool {
    previous == SpotStatus::Free && current == SpotStatus::Occupied
}

/// Compare the spot's last status with `current` and, on the counted edge,
/// increment `state.usage_count` by one.
///
/// `state` is the caller's working copy; `last_status` is left untouched so
/// the caller decides when the new status becomes current.
pub fn evaluate(spot: &str, state: &mut SpotState, current: SpotStatus) -> Option<TransitionEvent> {
    // ---
    if !is_counted_transition(state.last_status, current) {
        return None;
    }

    state.usage_count += 1;
    Some(TransitionEvent {
        spot: spot.to_string(),
        new_count: state.usage_count,
    })
}
