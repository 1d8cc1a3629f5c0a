//! Caller-facing error taxonomy.
//!
//! Every mutating operation returns either the resulting record or one of these
//! named kinds. Backend failures are folded into [`RegistrationError::Storage`];
//! optimistic-concurrency losses only surface as
//! [`RegistrationError::ConcurrencyConflict`] once the engine's retries are
//! exhausted.

use crate::catalog::CatalogError;
use crate::ids::{EventId, ParseIdempotencyKeyError, RegistrationId, UserId};
use crate::registration::{InvalidTransition, RegistrationStatus};
use crate::store::StoreError;
use chrono::{DateTime, Utc};
use thiserror::Error;

/// Errors returned by the registration engine.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistrationError {
    /// Unknown event.
    #[error("Event not found: {0}")]
    EventNotFound(EventId),

    /// Unknown registration.
    #[error("Registration not found: {0}")]
    RegistrationNotFound(RegistrationId),

    /// The user already holds a registration for the event.
    #[error("User {user_id} is already registered for event {event_id} ({existing})")]
    AlreadyRegistered {
        /// Event
        event_id: EventId,
        /// User
        user_id: UserId,
        /// The registration that blocks the request
        existing: RegistrationId,
    },

    /// The operation is not valid in the registration's current state.
    #[error("Cannot {operation} registration {registration_id} in state {status}")]
    InvalidState {
        /// Registration
        registration_id: RegistrationId,
        /// State it was found in
        status: RegistrationStatus,
        /// Operation that was attempted
        operation: &'static str,
    },

    /// Accept/decline attempted after the offer deadline.
    #[error("Promotion offer for registration {registration_id} expired at {deadline}")]
    PromotionExpired {
        /// Registration
        registration_id: RegistrationId,
        /// The deadline that passed
        deadline: DateTime<Utc>,
    },

    /// Presented check-in code does not match.
    #[error("Check-in code mismatch for registration {0}")]
    CheckInMismatch(RegistrationId),

    /// Optimistic update kept losing races until retries ran out.
    #[error("Concurrency conflict: {0}")]
    ConcurrencyConflict(String),

    /// The event does not accept registrations.
    #[error("Registration closed for event {event_id}: {reason}")]
    RegistrationClosed {
        /// Event
        event_id: EventId,
        /// Why it is closed
        reason: String,
    },

    /// Check-in attempted outside the event's scheduled window.
    #[error("Check-in window is not open for event {0}")]
    CheckInWindowClosed(EventId),

    /// The idempotency key is malformed.
    #[error(transparent)]
    InvalidIdempotencyKey(#[from] ParseIdempotencyKeyError),

    /// Backend (store or catalog) failure.
    #[error("Storage error: {0}")]
    Storage(String),
}

impl RegistrationError {
    /// Whether the engine should retry the operation with fresh state.
    #[must_use]
    pub const fn is_conflict(&self) -> bool {
        matches!(self, Self::ConcurrencyConflict(_))
    }

    /// Map a rejected state-machine transition onto the taxonomy.
    #[must_use]
    pub const fn invalid_state(registration_id: RegistrationId, error: InvalidTransition) -> Self {
        Self::InvalidState {
            registration_id,
            status: error.from,
            operation: error.transition,
        }
    }

    /// Stable machine-readable kind, for metrics labels and API mapping.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::EventNotFound(_) => "event_not_found",
            Self::RegistrationNotFound(_) => "registration_not_found",
            Self::AlreadyRegistered { .. } => "already_registered",
            Self::InvalidState { .. } => "invalid_state",
            Self::PromotionExpired { .. } => "promotion_expired",
            Self::CheckInMismatch(_) => "check_in_mismatch",
            Self::ConcurrencyConflict(_) => "concurrency_conflict",
            Self::RegistrationClosed { .. } => "registration_closed",
            Self::CheckInWindowClosed(_) => "check_in_window_closed",
            Self::InvalidIdempotencyKey(_) => "invalid_idempotency_key",
            Self::Storage(_) => "storage",
        }
    }
}

impl From<StoreError> for RegistrationError {
    fn from(error: StoreError) -> Self {
        match error {
            StoreError::ConcurrencyConflict { .. } => Self::ConcurrencyConflict(error.to_string()),
            StoreError::Duplicate(_)
            | StoreError::Database(_)
            | StoreError::Serialization(_) => Self::Storage(error.to_string()),
        }
    }
}

impl From<CatalogError> for RegistrationError {
    fn from(error: CatalogError) -> Self {
        Self::Storage(error.to_string())
    }
}
