//! Registration records and their state machine.
//!
//! The lifecycle is a closed set of states with an explicit transition table
//! ([`RegistrationStatus::apply`]). Call sites never compare status strings;
//! they ask the table whether a [`Transition`] is legal and get the target
//! state back.
//!
//! ```text
//!            create
//!     ┌────────┴─────────┐
//!     ▼                  ▼
//! Registered ◄──┐    Waitlisted
//!   │  │  │     │        │ promote (head only)
//!   │  │  │  accept      ▼
//!   │  │  │     └── PromotionPending
//!   │  │  │              │ decline / expire / cancel
//!   │  │  └─ cancel ─────┼──────► Cancelled ◄── cancel ── Waitlisted
//!   │  └─ check-in ──► Attended
//!   └──── no-show ───► NoShow
//! ```

use crate::ids::{EventId, IdempotencyKey, QrCode, RegistrationId, UserId};
use crate::ledger::ReserveOutcome;
use crate::version::Version;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Lifecycle state of a registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RegistrationStatus {
    /// Holds a confirmed seat
    Registered,
    /// Waiting for a seat
    Waitlisted,
    /// Holds a seat under a time-boxed promotion offer
    PromotionPending,
    /// Checked in at the event (terminal)
    Attended,
    /// Did not show up (terminal)
    NoShow,
    /// Cancelled, declined or expired (terminal)
    Cancelled,
}

impl RegistrationStatus {
    /// Storage representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Registered => "registered",
            Self::Waitlisted => "waitlisted",
            Self::PromotionPending => "promotion_pending",
            Self::Attended => "attended",
            Self::NoShow => "no_show",
            Self::Cancelled => "cancelled",
        }
    }

    /// Parse the storage representation.
    ///
    /// # Errors
    ///
    /// Returns the unrecognised input if it is not a known status.
    pub fn parse(s: &str) -> Result<Self, String> {
        match s {
            "registered" => Ok(Self::Registered),
            "waitlisted" => Ok(Self::Waitlisted),
            "promotion_pending" => Ok(Self::PromotionPending),
            "attended" => Ok(Self::Attended),
            "no_show" => Ok(Self::NoShow),
            "cancelled" => Ok(Self::Cancelled),
            other => Err(format!("Invalid registration status: {other}")),
        }
    }

    /// Whether the registration still participates in seat accounting.
    #[must_use]
    pub const fn is_live(&self) -> bool {
        matches!(
            self,
            Self::Registered | Self::Waitlisted | Self::PromotionPending
        )
    }

    /// Whether the registration counts against `held_seats`.
    #[must_use]
    pub const fn holds_seat(&self) -> bool {
        matches!(self, Self::Registered | Self::PromotionPending)
    }

    /// Whether no further transition is possible.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        !self.is_live()
    }

    /// The transition table.
    ///
    /// Returns the target state, or `None` if `transition` is not allowed from
    /// `self`.
    #[must_use]
    pub const fn apply(self, transition: &Transition) -> Option<Self> {
        match (self, transition) {
            (Self::Waitlisted, Transition::Promote { .. }) => Some(Self::PromotionPending),
            (Self::PromotionPending, Transition::Accept) => Some(Self::Registered),
            (Self::PromotionPending, Transition::Decline | Transition::Expire)
            | (
                Self::Registered | Self::Waitlisted | Self::PromotionPending,
                Transition::Cancel,
            ) => Some(Self::Cancelled),
            (Self::Registered, Transition::CheckIn) => Some(Self::Attended),
            (Self::Registered, Transition::MarkNoShow) => Some(Self::NoShow),
            _ => None,
        }
    }
}

impl fmt::Display for RegistrationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a registration ended up `Cancelled`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CancelReason {
    /// The user cancelled.
    UserCancelled,
    /// The user declined a promotion offer.
    Declined,
    /// A promotion offer passed its deadline.
    Expired,
}

impl CancelReason {
    /// Storage representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::UserCancelled => "user_cancelled",
            Self::Declined => "declined",
            Self::Expired => "expired",
        }
    }

    /// Parse the storage representation.
    ///
    /// # Errors
    ///
    /// Returns the unrecognised input if it is not a known reason.
    pub fn parse(s: &str) -> Result<Self, String> {
        match s {
            "user_cancelled" => Ok(Self::UserCancelled),
            "declined" => Ok(Self::Declined),
            "expired" => Ok(Self::Expired),
            other => Err(format!("Invalid cancel reason: {other}")),
        }
    }
}

impl fmt::Display for CancelReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Every state change a registration can undergo after creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Waitlist head receives an offer expiring at `deadline`.
    Promote {
        /// Last instant at which the offer can be accepted
        deadline: DateTime<Utc>,
    },
    /// Offer accepted.
    Accept,
    /// Offer declined.
    Decline,
    /// Offer deadline passed.
    Expire,
    /// User-initiated cancellation.
    Cancel,
    /// Attendance verified.
    CheckIn,
    /// Event ended without a check-in.
    MarkNoShow,
}

impl Transition {
    /// Short name used in errors and logs.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Promote { .. } => "promote",
            Self::Accept => "accept",
            Self::Decline => "decline",
            Self::Expire => "expire",
            Self::Cancel => "cancel",
            Self::CheckIn => "check_in",
            Self::MarkNoShow => "mark_no_show",
        }
    }
}

/// A transition that the table does not allow.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("Cannot {transition} a registration in state {from}")]
pub struct InvalidTransition {
    /// State the registration was in
    pub from: RegistrationStatus,
    /// Name of the rejected transition
    pub transition: &'static str,
}

/// Persisted registration record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Registration {
    /// Unique identifier
    pub id: RegistrationId,
    /// Event registered for
    pub event_id: EventId,
    /// Registering user
    pub user_id: UserId,
    /// Current lifecycle state
    pub status: RegistrationStatus,
    /// 1-based queue rank, present only while `Waitlisted`
    pub waitlist_position: Option<u32>,
    /// Check-in token, immutable after creation
    pub qr_code: QrCode,
    /// When the registration was created
    pub registered_at: DateTime<Utc>,
    /// When the attendee checked in (only on `Attended`)
    pub attended_at: Option<DateTime<Utc>>,
    /// Offer deadline (only while `PromotionPending`)
    pub promotion_deadline: Option<DateTime<Utc>>,
    /// Key that created this registration, if any
    pub idempotency_key: Option<IdempotencyKey>,
    /// Audit reason (only on `Cancelled`)
    pub cancel_reason: Option<CancelReason>,
    /// Time of the last transition
    pub updated_at: DateTime<Utc>,
    /// Version for conditional updates
    pub version: Version,
}

impl Registration {
    /// Build a new record from the ledger's decision.
    #[must_use]
    pub fn create(
        event_id: EventId,
        user_id: UserId,
        outcome: ReserveOutcome,
        idempotency_key: Option<IdempotencyKey>,
        now: DateTime<Utc>,
    ) -> Self {
        let (status, waitlist_position) = match outcome {
            ReserveOutcome::Reserved => (RegistrationStatus::Registered, None),
            ReserveOutcome::Waitlisted { position } => {
                (RegistrationStatus::Waitlisted, Some(position))
            }
        };

        Self {
            id: RegistrationId::new(),
            event_id,
            user_id,
            status,
            waitlist_position,
            qr_code: QrCode::generate(),
            registered_at: now,
            attended_at: None,
            promotion_deadline: None,
            idempotency_key,
            cancel_reason: None,
            updated_at: now,
            version: Version::INITIAL,
        }
    }

    /// Apply a transition in place, keeping the optional fields consistent with
    /// the new state.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidTransition`] (and leaves the record untouched) if the
    /// transition table rejects the move.
    pub fn transition(
        &mut self,
        transition: Transition,
        now: DateTime<Utc>,
    ) -> Result<(), InvalidTransition> {
        let Some(next) = self.status.apply(&transition) else {
            return Err(InvalidTransition {
                from: self.status,
                transition: transition.name(),
            });
        };

        match transition {
            Transition::Promote { deadline } => {
                self.waitlist_position = None;
                self.promotion_deadline = Some(deadline);
            }
            Transition::Accept => {
                self.promotion_deadline = None;
            }
            Transition::Decline => self.cancel(CancelReason::Declined),
            Transition::Expire => self.cancel(CancelReason::Expired),
            Transition::Cancel => self.cancel(CancelReason::UserCancelled),
            Transition::CheckIn => {
                self.attended_at = Some(now);
            }
            Transition::MarkNoShow => {}
        }

        self.status = next;
        self.updated_at = now;
        Ok(())
    }

    fn cancel(&mut self, reason: CancelReason) {
        self.waitlist_position = None;
        self.promotion_deadline = None;
        self.cancel_reason = Some(reason);
    }

    /// Whether a pending offer's deadline has passed at `now`.
    #[must_use]
    pub fn offer_expired(&self, now: DateTime<Utc>) -> bool {
        self.promotion_deadline.is_some_and(|deadline| now > deadline)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use chrono::Duration;

    const ALL: [RegistrationStatus; 6] = [
        RegistrationStatus::Registered,
        RegistrationStatus::Waitlisted,
        RegistrationStatus::PromotionPending,
        RegistrationStatus::Attended,
        RegistrationStatus::NoShow,
        RegistrationStatus::Cancelled,
    ];

    fn waitlisted(position: u32) -> Registration {
        Registration::create(
            EventId::new(),
            UserId::new(),
            ReserveOutcome::Waitlisted { position },
            None,
            Utc::now(),
        )
    }

    #[test]
    fn create_follows_ledger_outcome() {
        let now = Utc::now();
        let registered = Registration::create(
            EventId::new(),
            UserId::new(),
            ReserveOutcome::Reserved,
            None,
            now,
        );
        assert_eq!(registered.status, RegistrationStatus::Registered);
        assert_eq!(registered.waitlist_position, None);
        assert_eq!(registered.version, Version::INITIAL);

        let queued = waitlisted(4);
        assert_eq!(queued.status, RegistrationStatus::Waitlisted);
        assert_eq!(queued.waitlist_position, Some(4));
    }

    #[test]
    fn promote_then_accept() {
        let now = Utc::now();
        let deadline = now + Duration::hours(24);
        let mut registration = waitlisted(1);

        registration
            .transition(Transition::Promote { deadline }, now)
            .unwrap();
        assert_eq!(registration.status, RegistrationStatus::PromotionPending);
        assert_eq!(registration.waitlist_position, None);
        assert_eq!(registration.promotion_deadline, Some(deadline));

        registration.transition(Transition::Accept, now).unwrap();
        assert_eq!(registration.status, RegistrationStatus::Registered);
        assert_eq!(registration.promotion_deadline, None);
    }

    #[test]
    fn decline_and_expire_record_reason() {
        let now = Utc::now();
        for (transition, reason) in [
            (Transition::Decline, CancelReason::Declined),
            (Transition::Expire, CancelReason::Expired),
        ] {
            let mut registration = waitlisted(1);
            registration
                .transition(
                    Transition::Promote {
                        deadline: now + Duration::hours(1),
                    },
                    now,
                )
                .unwrap();
            registration.transition(transition, now).unwrap();

            assert_eq!(registration.status, RegistrationStatus::Cancelled);
            assert_eq!(registration.cancel_reason, Some(reason));
            assert_eq!(registration.promotion_deadline, None);
        }
    }

    #[test]
    fn check_in_stamps_attended_at() {
        let now = Utc::now();
        let mut registration = Registration::create(
            EventId::new(),
            UserId::new(),
            ReserveOutcome::Reserved,
            None,
            now,
        );
        registration.transition(Transition::CheckIn, now).unwrap();
        assert_eq!(registration.status, RegistrationStatus::Attended);
        assert_eq!(registration.attended_at, Some(now));
    }

    #[test]
    fn rejected_transition_leaves_record_untouched() {
        let now = Utc::now();
        let mut registration = waitlisted(2);
        let before = registration.clone();

        let error = registration.transition(Transition::Accept, now).unwrap_err();
        assert_eq!(error.from, RegistrationStatus::Waitlisted);
        assert_eq!(error.transition, "accept");
        assert_eq!(registration, before);
    }

    #[test]
    fn terminal_states_accept_nothing() {
        let transitions = [
            Transition::Promote {
                deadline: Utc::now(),
            },
            Transition::Accept,
            Transition::Decline,
            Transition::Expire,
            Transition::Cancel,
            Transition::CheckIn,
            Transition::MarkNoShow,
        ];

        for status in ALL.iter().filter(|s| s.is_terminal()) {
            for transition in &transitions {
                assert_eq!(status.apply(transition), None, "{status} / {transition:?}");
            }
        }
    }

    #[test]
    fn only_seat_holding_states_are_counted() {
        let holding: Vec<_> = ALL.iter().filter(|s| s.holds_seat()).collect();
        assert_eq!(
            holding,
            vec![
                &RegistrationStatus::Registered,
                &RegistrationStatus::PromotionPending
            ]
        );
    }

    #[test]
    fn status_round_trips_through_storage_form() {
        for status in ALL {
            assert_eq!(RegistrationStatus::parse(status.as_str()), Ok(status));
        }
        assert!(RegistrationStatus::parse("confirmed").is_err());
    }

    #[test]
    fn offer_expiry_is_strictly_after_deadline() {
        let now = Utc::now();
        let mut registration = waitlisted(1);
        registration
            .transition(Transition::Promote { deadline: now }, now)
            .unwrap();

        assert!(!registration.offer_expired(now));
        assert!(registration.offer_expired(now + Duration::seconds(1)));
    }
}
