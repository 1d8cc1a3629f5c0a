//! Waitlist ordering and compaction.
//!
//! The waitlist is not stored separately: it is the set of `Waitlisted`
//! registrations of an event ordered by `waitlist_position`. Positions are kept
//! as the contiguous run `1..=waitlist_count`; every removal carries a
//! [`WaitlistCompaction`] in the same write set, which shifts every later entry
//! down by one.

use crate::ids::EventId;
use crate::registration::{Registration, RegistrationStatus};
use serde::{Deserialize, Serialize};

/// Position of the entry that is promoted next.
pub const HEAD_POSITION: u32 = 1;

/// Close the gap left by removing the entry at `removed_position`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WaitlistCompaction {
    /// Event whose waitlist is compacted
    pub event_id: EventId,
    /// Position that was vacated
    pub removed_position: u32,
}

impl WaitlistCompaction {
    /// Creates a compaction for a vacated position.
    #[must_use]
    pub const fn new(event_id: EventId, removed_position: u32) -> Self {
        Self {
            event_id,
            removed_position,
        }
    }

    /// Whether `registration` is shifted by this compaction.
    #[must_use]
    pub fn affects(&self, registration: &Registration) -> bool {
        registration.event_id == self.event_id
            && registration.status == RegistrationStatus::Waitlisted
            && registration
                .waitlist_position
                .is_some_and(|position| position > self.removed_position)
    }

    /// Shift one record down by one position, bumping its version so any
    /// writer holding the old position fails its conditional update.
    ///
    /// Returns whether the record was changed.
    pub fn apply_to(&self, registration: &mut Registration) -> bool {
        if !self.affects(registration) {
            return false;
        }
        registration.waitlist_position = registration.waitlist_position.map(|p| p - 1);
        registration.version = registration.version.next();
        true
    }
}

/// Check that `positions` form exactly `1..=n` for some `n`.
///
/// Input order does not matter.
#[must_use]
pub fn is_contiguous(positions: impl IntoIterator<Item = u32>) -> bool {
    let mut positions: Vec<u32> = positions.into_iter().collect();
    positions.sort_unstable();
    positions
        .iter()
        .zip(1_u32..)
        .all(|(position, expected)| *position == expected)
}
