//! Catalog and publisher doubles

#![allow(clippy::unwrap_used)] // Test infrastructure uses unwrap for simplicity
#![allow(clippy::missing_panics_doc)] // Panics only on a poisoned lock

use chrono::{DateTime, Utc};
use rollcall_core::catalog::{CatalogEvent, CatalogFuture, EventCatalog, EventStatus};
use rollcall_core::event::{DomainEventPublisher, PublishError, PublishFuture, RegistrationEvent};
use rollcall_core::ids::EventId;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

/// Catalog backed by a map the test fills in.
#[derive(Clone, Debug, Default)]
pub struct StaticCatalog {
    events: Arc<RwLock<HashMap<EventId, CatalogEvent>>>,
}

impl StaticCatalog {
    /// Create an empty catalog
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace an event.
    pub fn insert(&self, event: CatalogEvent) {
        self.events.write().unwrap().insert(event.event_id, event);
    }

    /// Change an event's publishing status.
    pub fn set_status(&self, event_id: EventId, status: EventStatus) {
        if let Some(event) = self.events.write().unwrap().get_mut(&event_id) {
            event.status = status;
        }
    }
}

impl EventCatalog for StaticCatalog {
    fn event(&self, event_id: EventId) -> CatalogFuture<'_, Option<CatalogEvent>> {
        let event = self.events.read().unwrap().get(&event_id).cloned();
        Box::pin(async move { Ok(event) })
    }

    fn ended_between(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> CatalogFuture<'_, Vec<CatalogEvent>> {
        let ended = self
            .events
            .read()
            .unwrap()
            .values()
            .filter(|e| e.end_time >= from && e.end_time < to)
            .cloned()
            .collect();
        Box::pin(async move { Ok(ended) })
    }
}

/// Publisher that records every event it receives.
///
/// Can be switched into a failing mode to check that publish failures never
/// roll back a committed transition.
#[derive(Clone, Debug, Default)]
pub struct RecordingPublisher {
    events: Arc<RwLock<Vec<RegistrationEvent>>>,
    failing: Arc<AtomicBool>,
}

impl RecordingPublisher {
    /// Create a new recording publisher
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject every publish from now on (or stop rejecting).
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Everything published so far, in order.
    #[must_use]
    pub fn events(&self) -> Vec<RegistrationEvent> {
        self.events.read().unwrap().clone()
    }

    /// Kinds of everything published so far, in order.
    #[must_use]
    pub fn kinds(&self) -> Vec<&'static str> {
        self.events
            .read()
            .unwrap()
            .iter()
            .map(RegistrationEvent::kind)
            .collect()
    }

    /// Forget recorded events.
    pub fn clear(&self) {
        self.events.write().unwrap().clear();
    }
}

impl DomainEventPublisher for RecordingPublisher {
    fn publish(&self, event: &RegistrationEvent) -> PublishFuture<'_> {
        let result = if self.failing.load(Ordering::SeqCst) {
            Err(PublishError::PublishFailed {
                kind: event.kind().to_string(),
                reason: "dispatcher unavailable".to_string(),
            })
        } else {
            self.events.write().unwrap().push(event.clone());
            Ok(())
        };
        Box::pin(async move { result })
    }
}
