//! Wiring for engine tests.
//!
//! [`TestHarness`] builds a [`RegistrationEngine`] over in-memory doubles and
//! keeps handles to each of them so tests can steer the clock, edit the
//! catalog and inspect what was stored and published.

#![allow(clippy::module_name_repetitions)] // TestHarness is the natural name

use crate::catalog_mocks::{RecordingPublisher, StaticCatalog};
use crate::mocks::ManualClock;
use crate::store_mocks::InMemoryRegistrationStore;
use chrono::{DateTime, TimeDelta, Utc};
use rollcall_core::catalog::{CatalogEvent, EventStatus};
use rollcall_core::error::RegistrationError;
use rollcall_core::ids::{EventId, UserId};
use rollcall_core::registration::{Registration, RegistrationStatus};
use rollcall_core::waitlist::is_contiguous;
use rollcall_runtime::retry::RetryPolicy;
use rollcall_runtime::{EngineConfig, RegistrationEngine, RegistrationEnvironment};
use std::sync::Arc;
use std::time::Duration;

/// A published event starting in a week and lasting three hours.
#[must_use]
pub fn published_event(capacity: u32, now: DateTime<Utc>) -> CatalogEvent {
    let start_time = now + TimeDelta::days(7);
    CatalogEvent {
        event_id: EventId::new(),
        capacity,
        start_time,
        end_time: start_time + TimeDelta::hours(3),
        status: EventStatus::Published,
    }
}

/// Retry policy with negligible backoff, for fast tests.
#[must_use]
pub fn fast_retry_policy() -> RetryPolicy {
    RetryPolicy::builder()
        .max_retries(50)
        .initial_delay(Duration::from_millis(1))
        .max_delay(Duration::from_millis(5))
        .build()
}

/// An engine over in-memory doubles.
///
/// # Example
///
/// ```
/// use rollcall_testing::TestHarness;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let harness = TestHarness::new();
/// let event = harness.publish_event(1);
///
/// let first = harness.register(event.event_id).await?;
/// let second = harness.register(event.event_id).await?;
/// assert_eq!(second.waitlist_position, Some(1));
/// # let _ = first;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct TestHarness {
    /// The engine under test
    pub engine: RegistrationEngine,
    /// Shared store
    pub store: InMemoryRegistrationStore,
    /// Catalog the engine reads
    pub catalog: StaticCatalog,
    /// Publisher the engine writes to
    pub publisher: RecordingPublisher,
    /// Clock the engine reads
    pub clock: ManualClock,
}

impl TestHarness {
    /// Harness with default engine settings and fast retries.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(EngineConfig::default().with_retry_policy(fast_retry_policy()))
    }

    /// Harness with explicit engine settings.
    #[must_use]
    pub fn with_config(config: EngineConfig) -> Self {
        let store = InMemoryRegistrationStore::new();
        let catalog = StaticCatalog::new();
        let publisher = RecordingPublisher::new();
        let clock = ManualClock::starting_at(crate::mocks::test_clock().time());

        let engine = RegistrationEngine::new(
            RegistrationEnvironment {
                store: Arc::new(store.clone()),
                catalog: Arc::new(catalog.clone()),
                publisher: Arc::new(publisher.clone()),
                clock: Arc::new(clock.clone()),
            },
            config,
        );

        Self {
            engine,
            store,
            catalog,
            publisher,
            clock,
        }
    }

    /// Add a published event with `capacity` seats to the catalog.
    pub fn publish_event(&self, capacity: u32) -> CatalogEvent {
        let event = published_event(capacity, self.clock.time());
        self.catalog.insert(event.clone());
        event
    }

    /// Register a fresh user without an idempotency key.
    ///
    /// # Errors
    ///
    /// Whatever [`RegistrationEngine::register_for_event`] returns.
    pub async fn register(
        &self,
        event_id: EventId,
    ) -> Result<Registration, RegistrationError> {
        self.engine
            .register_for_event(event_id, UserId::new(), None)
            .await
    }
}

impl TestHarness {
    /// Check that the stored ledger agrees with the stored registrations.
    ///
    /// - `held_seats <= capacity`
    /// - `held_seats` equals the number of seat-holding registrations
    /// - `waitlist_count` equals the number of waitlisted registrations
    /// - waitlist positions are exactly `1..=waitlist_count`
    ///
    /// # Errors
    ///
    /// Returns a description of the first violated invariant.
    pub fn check_invariants(&self, event_id: EventId) -> Result<(), String> {
        let registrations = self.store.registrations_for(event_id);
        let Some(ledger) = self.store.capacity(event_id) else {
            return if registrations.is_empty() {
                Ok(())
            } else {
                Err(format!("registrations exist for {event_id} without a ledger"))
            };
        };

        if ledger.held_seats > ledger.capacity {
            return Err(format!(
                "held_seats {} exceeds capacity {}",
                ledger.held_seats, ledger.capacity
            ));
        }

        let holding = registrations.iter().filter(|r| r.status.holds_seat()).count();
        if usize::try_from(ledger.held_seats).ok() != Some(holding) {
            return Err(format!(
                "held_seats {} but {holding} seat-holding registrations",
                ledger.held_seats
            ));
        }

        let positions: Vec<u32> = registrations
            .iter()
            .filter(|r| r.status == RegistrationStatus::Waitlisted)
            .filter_map(|r| r.waitlist_position)
            .collect();
        let waiting = registrations
            .iter()
            .filter(|r| r.status == RegistrationStatus::Waitlisted)
            .count();
        if usize::try_from(ledger.waitlist_count).ok() != Some(waiting) || positions.len() != waiting {
            return Err(format!(
                "waitlist_count {} but {waiting} waitlisted registrations",
                ledger.waitlist_count
            ));
        }
        if !is_contiguous(positions.iter().copied()) {
            return Err(format!("waitlist positions not contiguous: {positions:?}"));
        }

        Ok(())
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}
