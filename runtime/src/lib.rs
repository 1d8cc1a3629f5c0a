//! # Rollcall Runtime
//!
//! The registration engine: stateless request handlers over the shared
//! [`RegistrationStore`].
//!
//! Every operation follows the same loop:
//!
//! 1. read fresh state (ledger record, registration, waitlist head)
//! 2. decide with the pure logic in `rollcall-core`
//! 3. stage every change in one [`WriteSet`](rollcall_core::store::WriteSet) and commit it
//! 4. on a version conflict, throw the attempt away and start over (see [`retry`])
//! 5. after the commit, hand the resulting domain events to the publisher
//!
//! There are no locks in this crate; any number of engine instances may run
//! against the same store.
//!
//! ## Example
//!
//! ```ignore
//! use rollcall_runtime::{EngineConfig, RegistrationEngine, RegistrationEnvironment};
//!
//! let engine = RegistrationEngine::new(environment, EngineConfig::default());
//!
//! let registration = engine.register_for_event(event_id, user_id, Some("req-42")).await?;
//! let capacity = engine.get_event_capacity(event_id).await?;
//! ```

use chrono::{DateTime, TimeDelta, Utc};
use rollcall_core::catalog::EventCatalog;
use rollcall_core::environment::Clock;
use rollcall_core::error::RegistrationError;
use rollcall_core::event::{DomainEventPublisher, RegistrationEvent};
use rollcall_core::ids::{EventId, RegistrationId};
use rollcall_core::ledger::{CapacityRecord, CapacitySnapshot};
use rollcall_core::registration::Registration;
use rollcall_core::store::RegistrationStore;
use std::future::Future;
use std::sync::Arc;

/// Bounded retry with exponential backoff
pub mod retry;

/// Prometheus metrics for observability
pub mod metrics;

/// Background expiry and no-show sweeper
pub mod sweeper;

mod check_in;
mod idempotency;
mod promotion;

use metrics::PublishMetrics;
use retry::{RetryPolicy, retry_with_predicate};

/// External dependencies of the engine.
///
/// Everything the engine touches outside its own memory is behind one of
/// these trait objects, so tests can swap in deterministic doubles.
#[derive(Clone)]
pub struct RegistrationEnvironment {
    /// Shared registration and capacity store
    pub store: Arc<dyn RegistrationStore>,
    /// Read-only event catalog
    pub catalog: Arc<dyn EventCatalog>,
    /// Domain event dispatcher
    pub publisher: Arc<dyn DomainEventPublisher>,
    /// Source of "now"
    pub clock: Arc<dyn Clock>,
}

/// Tunable engine parameters.
///
/// # Example
///
/// ```
/// use chrono::TimeDelta;
/// use rollcall_runtime::EngineConfig;
/// use rollcall_runtime::retry::RetryPolicy;
///
/// let config = EngineConfig::default()
///     .with_promotion_window(TimeDelta::hours(48))
///     .with_retry_policy(RetryPolicy::builder().max_retries(10).build());
/// assert_eq!(config.sweep_batch_size, 100);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    /// How long a promotion offer stays open
    pub promotion_window: TimeDelta,
    /// Retry policy for optimistic-concurrency conflicts
    pub retry_policy: RetryPolicy,
    /// Maximum number of expired offers loaded per sweep batch
    pub sweep_batch_size: usize,
}

impl EngineConfig {
    /// Set the promotion window
    #[must_use]
    pub const fn with_promotion_window(mut self, window: TimeDelta) -> Self {
        self.promotion_window = window;
        self
    }

    /// Set the retry policy
    #[must_use]
    pub const fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    /// Set the sweep batch size
    #[must_use]
    pub const fn with_sweep_batch_size(mut self, batch_size: usize) -> Self {
        self.sweep_batch_size = batch_size;
        self
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            promotion_window: TimeDelta::hours(24),
            retry_policy: RetryPolicy::default(),
            sweep_batch_size: 100,
        }
    }
}

/// Result of one expiry sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Offers moved to `Cancelled(expired)`
    pub expired: u64,
    /// Candidates that had already moved on (accepted, declined, swept elsewhere)
    pub skipped: u64,
    /// Candidates that failed and are left for the next sweep
    pub failed: u64,
}

/// Result of a no-show pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NoShowReport {
    /// Registrations moved to `NoShow`
    pub marked: u64,
    /// Registrations that had already moved on
    pub skipped: u64,
    /// Registrations that failed and are left for the next pass
    pub failed: u64,
}

impl NoShowReport {
    /// Add another report's counts to this one.
    pub const fn merge(&mut self, other: Self) {
        self.marked += other.marked;
        self.skipped += other.skipped;
        self.failed += other.failed;
    }
}

/// A committed change plus the domain events it produced.
pub(crate) struct Committed<T> {
    pub(crate) value: T,
    pub(crate) events: Vec<RegistrationEvent>,
}

impl<T> Committed<T> {
    pub(crate) const fn new(value: T, events: Vec<RegistrationEvent>) -> Self {
        Self { value, events }
    }
}

/// The registration & waitlist promotion engine.
///
/// Cheap to clone; clones share the same environment.
#[derive(Clone)]
pub struct RegistrationEngine {
    env: RegistrationEnvironment,
    config: EngineConfig,
}

impl RegistrationEngine {
    /// Create an engine over `env`.
    #[must_use]
    pub const fn new(env: RegistrationEnvironment, config: EngineConfig) -> Self {
        Self { env, config }
    }

    /// The engine's configuration.
    #[must_use]
    pub const fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Current time according to the injected clock.
    #[must_use]
    pub fn now(&self) -> DateTime<Utc> {
        self.env.clock.now()
    }

    /// Load one registration.
    ///
    /// # Errors
    ///
    /// - `RegistrationNotFound`: unknown id
    /// - `Storage`: backend failure
    pub async fn get_registration(
        &self,
        registration_id: RegistrationId,
    ) -> Result<Registration, RegistrationError> {
        self.load_registration(registration_id).await
    }

    /// The event's waitlist ordered by position.
    ///
    /// # Errors
    ///
    /// - `Storage`: backend failure
    pub async fn waitlist(&self, event_id: EventId) -> Result<Vec<Registration>, RegistrationError> {
        Ok(self.env.store.waitlist(event_id).await?)
    }

    /// Seat availability for an event.
    ///
    /// Events nobody has registered for yet have no ledger record; their
    /// snapshot is derived from the catalog capacity.
    ///
    /// # Errors
    ///
    /// - `EventNotFound`: no ledger record and unknown to the catalog
    /// - `Storage`: backend failure
    pub async fn get_event_capacity(
        &self,
        event_id: EventId,
    ) -> Result<CapacitySnapshot, RegistrationError> {
        let record = match self.env.store.load_capacity(event_id).await? {
            Some(record) => record,
            None => {
                let event = self
                    .env
                    .catalog
                    .event(event_id)
                    .await?
                    .ok_or(RegistrationError::EventNotFound(event_id))?;
                CapacityRecord::new(event_id, event.capacity)
            }
        };

        let pending_offers = self.env.store.count_pending_offers(event_id).await?;
        Ok(record.snapshot(pending_offers))
    }

    pub(crate) async fn load_registration(
        &self,
        registration_id: RegistrationId,
    ) -> Result<Registration, RegistrationError> {
        self.env
            .store
            .load_registration(registration_id)
            .await?
            .ok_or(RegistrationError::RegistrationNotFound(registration_id))
    }

    pub(crate) async fn load_ledger(
        &self,
        event_id: EventId,
    ) -> Result<CapacityRecord, RegistrationError> {
        self.env.store.load_capacity(event_id).await?.ok_or_else(|| {
            RegistrationError::Storage(format!("Capacity record missing for event {event_id}"))
        })
    }

    /// Run one attempt-closure under the configured conflict retry policy.
    pub(crate) async fn with_retry<T, F, Fut>(&self, operation: F) -> Result<T, RegistrationError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, RegistrationError>>,
    {
        retry_with_predicate(
            self.config.retry_policy.clone(),
            operation,
            RegistrationError::is_conflict,
        )
        .await
    }

    /// Hand committed events to the dispatcher. Failures are logged only.
    pub(crate) async fn publish_all(&self, events: &[RegistrationEvent]) {
        for event in events {
            match self.env.publisher.publish(event).await {
                Ok(()) => PublishMetrics::record_published(event.kind()),
                Err(error) => {
                    PublishMetrics::record_failure(event.kind());
                    tracing::warn!(
                        kind = event.kind(),
                        registration_id = %event.registration_id(),
                        error = %error,
                        "Failed to publish domain event"
                    );
                }
            }
        }
    }
}
