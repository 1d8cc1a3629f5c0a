//! Capacity ledger: authoritative seat bookkeeping per event.
//!
//! The ledger record is the single shared counter for an event. Every method
//! here mutates an in-memory copy only; the caller stages the copy into a
//! [`WriteSet`](crate::store::WriteSet) and the store applies it conditionally
//! on the version the copy was read at.
//!
//! Invariants maintained by every operation:
//!
//! - `held_seats <= capacity`
//! - `waitlist_count` never underflows

use crate::ids::EventId;
use crate::version::Version;
use serde::{Deserialize, Serialize};

/// Result of asking the ledger for a seat.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReserveOutcome {
    /// A seat was held for the caller.
    Reserved,
    /// The event is full; the caller joins the waitlist at `position` (1-based).
    Waitlisted {
        /// Position assigned under the same update that grew the waitlist.
        position: u32,
    },
}

/// Per-event capacity record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapacityRecord {
    /// Event this record belongs to
    pub event_id: EventId,
    /// Fixed maximum number of seats
    pub capacity: u32,
    /// Seats held by `Registered` and `PromotionPending` registrations
    pub held_seats: u32,
    /// Number of `Waitlisted` registrations
    pub waitlist_count: u32,
    /// Version for conditional updates
    pub version: Version,
}

impl CapacityRecord {
    /// Creates an empty ledger for an event.
    #[must_use]
    pub const fn new(event_id: EventId, capacity: u32) -> Self {
        Self {
            event_id,
            capacity,
            held_seats: 0,
            waitlist_count: 0,
            version: Version::INITIAL,
        }
    }

    /// Seats not held by anyone.
    #[must_use]
    pub const fn available_seats(&self) -> u32 {
        self.capacity.saturating_sub(self.held_seats)
    }

    /// Whether every seat is held.
    #[must_use]
    pub const fn is_full(&self) -> bool {
        self.held_seats >= self.capacity
    }

    /// Hold a seat if one is free, otherwise grow the waitlist.
    pub fn reserve(&mut self) -> ReserveOutcome {
        if self.held_seats < self.capacity {
            self.held_seats += 1;
            ReserveOutcome::Reserved
        } else {
            self.waitlist_count += 1;
            ReserveOutcome::Waitlisted {
                position: self.waitlist_count,
            }
        }
    }

    /// Give a held seat back.
    ///
    /// Returns `false` and leaves the record untouched when nothing is held,
    /// so a duplicated release can never drive the count negative.
    pub fn release(&mut self) -> bool {
        if self.held_seats == 0 {
            return false;
        }
        self.held_seats -= 1;
        true
    }

    /// Move the waitlist head onto a free seat for a promotion offer.
    ///
    /// Returns `false` (no change) if there is no free seat or nobody waiting.
    pub fn hold_for_offer(&mut self) -> bool {
        if self.waitlist_count == 0 || self.held_seats >= self.capacity {
            return false;
        }
        self.held_seats += 1;
        self.waitlist_count -= 1;
        true
    }

    /// Remove one entry from the waitlist count.
    pub fn leave_waitlist(&mut self) -> bool {
        if self.waitlist_count == 0 {
            return false;
        }
        self.waitlist_count -= 1;
        true
    }

    /// Caller-facing view of the record.
    #[must_use]
    pub const fn snapshot(&self, pending_offers: u32) -> CapacitySnapshot {
        CapacitySnapshot {
            event_id: self.event_id,
            capacity: self.capacity,
            held_seats: self.held_seats,
            waitlist_count: self.waitlist_count,
            available_seats: self.available_seats(),
            is_full: self.is_full(),
            pending_offers,
        }
    }
}

/// Result of `get_event_capacity`.
///
/// Seats held for an outstanding promotion offer count as occupied in
/// `held_seats`/`available_seats`; `pending_offers` reports them separately
/// for callers that want to show a soft hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapacitySnapshot {
    /// Event identifier
    pub event_id: EventId,
    /// Total capacity
    pub capacity: u32,
    /// Held seats (confirmed + pending offers)
    pub held_seats: u32,
    /// Users waiting for a seat
    pub waitlist_count: u32,
    /// `capacity - held_seats`
    pub available_seats: u32,
    /// Whether no seat is available
    pub is_full: bool,
    /// Seats held for offers not yet accepted
    pub pending_offers: u32,
}
