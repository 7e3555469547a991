//! Last-known state per monitored spot.
//!
//! The tracker is created once from the closed spot enumeration and never
//! gains or loses entries afterwards. It is owned by a single pipeline, so
//! there is exactly one mutation path.

use std::collections::HashMap;

use crate::models::SpotStatus;

// ---

/// Per-spot state: last observed status and number of counted transitions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SpotState {
    pub last_status: SpotStatus,
    pub usage_count: u64,
}

#[derive(Debug, Clone)]
pub struct StateTracker {
    // ---
    spots: HashMap<String, SpotState>,
    /// Declaration order of the enumeration, for stable reporting.
    order: Vec<String>,
}

impl StateTracker {
    /// Create a tracker with every known spot free and uncounted.
    pub fn new<I, S>(known_spots: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        // ---
        let mut spots = HashMap::new();
        let mut order = Vec::new();
        for spot in known_spots {
            let spot = spot.into();
            if spots.insert(spot.clone(), SpotState::default()).is_none() {
                order.push(spot);
            }
        }
        Self { spots, order }
    }

    pub fn is_known(&self, spot: &str) -> bool {
        self.spots.contains_key(spot)
    }

    /// Last status seen for `spot`, `None` if the spot is not monitored.
    pub fn get_previous(&self, spot: &str) -> Option<SpotStatus> {
        self.spots.get(spot).map(|s| s.last_status)
    }

    /// Overwrite the last status of `spot`. Returns `false` for unknown spots.
    pub fn set_current(&mut self, spot: &str, status: SpotStatus) -> bool {
        match self.spots.get_mut(spot) {
            Some(state) => {
                state.last_status = status;
                true
            }
            None => false,
        }
    }

    pub fn usage_count(&self, spot: &str) -> Option<u64> {
        self.spots.get(spot).map(|s| s.usage_count)
    }

    pub fn get(&self, spot: &str) -> Option<SpotState> {
        self.spots.get(spot).copied()
    }

    /// Replace the whole state of a known spot. Returns `false` for unknown spots.
    pub fn commit(&mut self, spot: &str, state: SpotState) -> bool {
        match self.spots.get_mut(spot) {
            Some(slot) => {
                *slot = state;
                true
            }
            None => false,
        }
    }

    /// Known spots with their state, in enumeration order.
    pub fn spots(&self) -> impl Iterator<Item = (&str, SpotState)> + '_ {
        self.order
            .iter()
            .filter_map(|id| self.spots.get(id).map(|s| (id.as_str(), *s)))
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}
