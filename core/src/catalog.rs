//! Read-only view of the event catalog.
//!
//! Event content (title, description, location, publishing workflow) is owned
//! elsewhere. The engine only needs the fields that govern seat accounting and
//! the check-in window.

use crate::ids::EventId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// Publishing status of a catalog event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventStatus {
    /// Not yet visible to users
    Draft,
    /// Open for registration
    Published,
    /// Called off by the organiser
    Cancelled,
    /// Archived after it took place
    Completed,
}

impl EventStatus {
    /// Storage representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Published => "published",
            Self::Cancelled => "cancelled",
            Self::Completed => "completed",
        }
    }

    /// Parse the storage representation.
    ///
    /// # Errors
    ///
    /// Returns [`CatalogError::Decode`] for unknown values.
    pub fn parse(s: &str) -> Result<Self, CatalogError> {
        match s {
            "draft" => Ok(Self::Draft),
            "published" => Ok(Self::Published),
            "cancelled" => Ok(Self::Cancelled),
            "completed" => Ok(Self::Completed),
            other => Err(CatalogError::Decode(format!("Invalid event status: {other}"))),
        }
    }
}

/// The catalog fields the engine depends on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogEvent {
    /// Event identifier
    pub event_id: EventId,
    /// Fixed seat count
    pub capacity: u32,
    /// Scheduled start
    pub start_time: DateTime<Utc>,
    /// Scheduled end
    pub end_time: DateTime<Utc>,
    /// Publishing status
    pub status: EventStatus,
}

impl CatalogEvent {
    /// Why the event refuses new registrations at `now`, if it does.
    #[must_use]
    pub fn registration_block(&self, now: DateTime<Utc>) -> Option<String> {
        if self.status != EventStatus::Published {
            return Some(format!("event is {}", self.status.as_str()));
        }
        if now >= self.end_time {
            return Some("event has ended".to_string());
        }
        None
    }

    /// Whether check-in is allowed at `now`.
    #[must_use]
    pub fn check_in_open(&self, now: DateTime<Utc>) -> bool {
        now >= self.start_time && now <= self.end_time
    }

    /// Whether the event is over at `now`.
    #[must_use]
    pub fn has_ended(&self, now: DateTime<Utc>) -> bool {
        now > self.end_time
    }
}

/// Errors from the catalog provider.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CatalogError {
    /// The provider could not be reached.
    #[error("Catalog unavailable: {0}")]
    Unavailable(String),

    /// The provider returned data that could not be interpreted.
    #[error("Catalog decode error: {0}")]
    Decode(String),
}

/// Boxed future returned by catalog methods.
pub type CatalogFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, CatalogError>> + Send + 'a>>;

/// Event catalog provider (read-only to the engine).
pub trait EventCatalog: Send + Sync {
    /// Look up one event.
    ///
    /// # Errors
    ///
    /// Returns [`CatalogError`] if the provider fails. An unknown id is `Ok(None)`.
    fn event(&self, event_id: EventId) -> CatalogFuture<'_, Option<CatalogEvent>>;

    /// Events whose `end_time` falls in `[from, to)`, used by the no-show sweep.
    ///
    /// # Errors
    ///
    /// Returns [`CatalogError`] if the provider fails.
    fn ended_between(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> CatalogFuture<'_, Vec<CatalogEvent>>;
}
