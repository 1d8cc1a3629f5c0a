//! Domain events emitted on every registration state transition.
//!
//! The engine does not deliver notifications. It hands each event to a
//! [`DomainEventPublisher`] after the transition has been committed; fan-out,
//! retries and real-time push are the dispatcher's concern.
//!
//! # Delivery Contract
//!
//! - **Commit first**: an event is only published after its write set committed
//! - **Fire-and-forget**: a publish failure is logged and never rolls back the transition
//! - **At-least-once attempt**: every committed transition gets one publish attempt;
//!   consumers must tolerate duplicates (a retried operation may re-publish)
//!
//! # Serialization
//!
//! Events are encoded with `bincode` for the outbox, with a versioned
//! [`RegistrationEvent::kind`] stored next to the bytes for routing.

use crate::ids::{EventId, RegistrationId, UserId};
use crate::registration::{CancelReason, Registration, RegistrationStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// Error types for event operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EventError {
    /// Failed to serialize event to bytes.
    #[error("Failed to serialize event: {0}")]
    SerializationError(String),

    /// Failed to deserialize event from bytes.
    #[error("Failed to deserialize event: {0}")]
    DeserializationError(String),
}

/// Something that happened to a registration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RegistrationEvent {
    /// A registration was created, either holding a seat or waitlisted.
    Created {
        /// Registration
        registration_id: RegistrationId,
        /// Event
        event_id: EventId,
        /// User
        user_id: UserId,
        /// `Registered` or `Waitlisted`
        status: RegistrationStatus,
        /// Queue rank when waitlisted
        waitlist_position: Option<u32>,
        /// When
        occurred_at: DateTime<Utc>,
    },

    /// The waitlist head received a time-boxed offer.
    Promoted {
        /// Registration
        registration_id: RegistrationId,
        /// Event
        event_id: EventId,
        /// User
        user_id: UserId,
        /// Last instant the offer can be accepted
        deadline: DateTime<Utc>,
        /// When
        occurred_at: DateTime<Utc>,
    },

    /// An offer was accepted.
    Accepted {
        /// Registration
        registration_id: RegistrationId,
        /// Event
        event_id: EventId,
        /// User
        user_id: UserId,
        /// When
        occurred_at: DateTime<Utc>,
    },

    /// An offer was declined or expired.
    OfferLapsed {
        /// Registration
        registration_id: RegistrationId,
        /// Event
        event_id: EventId,
        /// User
        user_id: UserId,
        /// `Declined` or `Expired`
        reason: CancelReason,
        /// When
        occurred_at: DateTime<Utc>,
    },

    /// The user cancelled.
    Cancelled {
        /// Registration
        registration_id: RegistrationId,
        /// Event
        event_id: EventId,
        /// User
        user_id: UserId,
        /// State before cancellation
        previous_status: RegistrationStatus,
        /// When
        occurred_at: DateTime<Utc>,
    },

    /// The attendee checked in.
    CheckedIn {
        /// Registration
        registration_id: RegistrationId,
        /// Event
        event_id: EventId,
        /// User
        user_id: UserId,
        /// When
        occurred_at: DateTime<Utc>,
    },

    /// The event ended without a check-in.
    MarkedNoShow {
        /// Registration
        registration_id: RegistrationId,
        /// Event
        event_id: EventId,
        /// User
        user_id: UserId,
        /// When
        occurred_at: DateTime<Utc>,
    },
}

impl RegistrationEvent {
    /// Stable, versioned event kind used for routing.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Created { .. } => "RegistrationCreated.v1",
            Self::Promoted { .. } => "RegistrationPromoted.v1",
            Self::Accepted { .. } => "PromotionAccepted.v1",
            Self::OfferLapsed { .. } => "PromotionLapsed.v1",
            Self::Cancelled { .. } => "RegistrationCancelled.v1",
            Self::CheckedIn { .. } => "AttendeeCheckedIn.v1",
            Self::MarkedNoShow { .. } => "AttendeeNoShow.v1",
        }
    }

    /// Registration the event is about.
    #[must_use]
    pub const fn registration_id(&self) -> RegistrationId {
        match self {
            Self::Created { registration_id, .. }
            | Self::Promoted { registration_id, .. }
            | Self::Accepted { registration_id, .. }
            | Self::OfferLapsed { registration_id, .. }
            | Self::Cancelled { registration_id, .. }
            | Self::CheckedIn { registration_id, .. }
            | Self::MarkedNoShow { registration_id, .. } => *registration_id,
        }
    }

    /// Catalog event the registration belongs to.
    #[must_use]
    pub const fn event_id(&self) -> EventId {
        match self {
            Self::Created { event_id, .. }
            | Self::Promoted { event_id, .. }
            | Self::Accepted { event_id, .. }
            | Self::OfferLapsed { event_id, .. }
            | Self::Cancelled { event_id, .. }
            | Self::CheckedIn { event_id, .. }
            | Self::MarkedNoShow { event_id, .. } => *event_id,
        }
    }

    /// `Created` for a freshly inserted record.
    #[must_use]
    pub const fn created(registration: &Registration) -> Self {
        Self::Created {
            registration_id: registration.id,
            event_id: registration.event_id,
            user_id: registration.user_id,
            status: registration.status,
            waitlist_position: registration.waitlist_position,
            occurred_at: registration.registered_at,
        }
    }

    /// `Promoted` for a record that just became `PromotionPending`.
    ///
    /// Returns `None` if the record carries no deadline.
    #[must_use]
    pub fn promoted(registration: &Registration) -> Option<Self> {
        registration.promotion_deadline.map(|deadline| Self::Promoted {
            registration_id: registration.id,
            event_id: registration.event_id,
            user_id: registration.user_id,
            deadline,
            occurred_at: registration.updated_at,
        })
    }

    /// Serialize this event to bincode bytes.
    ///
    /// # Errors
    ///
    /// Returns `EventError::SerializationError` if the event cannot be serialized.
    pub fn to_bytes(&self) -> Result<Vec<u8>, EventError> {
        bincode::serialize(self).map_err(|e| EventError::SerializationError(e.to_string()))
    }

    /// Deserialize an event from bincode bytes.
    ///
    /// # Errors
    ///
    /// Returns `EventError::DeserializationError` if the bytes are corrupted or
    /// were written by an incompatible schema.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, EventError> {
        bincode::deserialize(bytes).map_err(|e| EventError::DeserializationError(e.to_string()))
    }

    /// JSON form of the event, for consumers that cannot read bincode.
    ///
    /// # Errors
    ///
    /// Returns `EventError::SerializationError` if the event cannot be serialized.
    pub fn to_json(&self) -> Result<serde_json::Value, EventError> {
        serde_json::to_value(self).map_err(|e| EventError::SerializationError(e.to_string()))
    }
}

/// Errors that can occur when handing an event to the dispatcher.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PublishError {
    /// The dispatcher rejected or could not receive the event.
    #[error("Publish failed for {kind}: {reason}")]
    PublishFailed {
        /// Event kind
        kind: String,
        /// The reason for failure
        reason: String,
    },

    /// The event could not be encoded.
    #[error(transparent)]
    Encoding(#[from] EventError),
}

/// Boxed future returned by publishers.
pub type PublishFuture<'a> = Pin<Box<dyn Future<Output = Result<(), PublishError>> + Send + 'a>>;

/// Domain event dispatcher interface.
///
/// # Dyn Compatibility
///
/// Returns a boxed future so the engine can hold an `Arc<dyn DomainEventPublisher>`.
pub trait DomainEventPublisher: Send + Sync {
    /// Hand one event to the dispatcher.
    ///
    /// # Errors
    ///
    /// Returns [`PublishError`] if the event could not be handed over. The
    /// engine logs the error and moves on.
    fn publish(&self, event: &RegistrationEvent) -> PublishFuture<'_>;
}
