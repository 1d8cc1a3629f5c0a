//! Registration creation with request deduplication.
//!
//! A client that retries `register_for_event` with the same idempotency key
//! gets the original record back, no matter what state it is in now, and the
//! ledger is charged exactly once. Without a key no deduplication happens and
//! the one-live-registration rule rejects a second attempt instead.

use crate::metrics::RegistrationMetrics;
use crate::RegistrationEngine;
use rollcall_core::error::RegistrationError;
use rollcall_core::event::RegistrationEvent;
use rollcall_core::ids::{EventId, IdempotencyKey, UserId};
use rollcall_core::ledger::CapacityRecord;
use rollcall_core::registration::{Registration, RegistrationStatus};
use rollcall_core::store::{StoreError, WriteSet};

/// How a registration request was satisfied.
enum Admission {
    /// A new record was committed.
    Created(Registration),
    /// A record created earlier with the same key was returned.
    Replayed(Registration),
}

impl RegistrationEngine {
    /// Register `user_id` for `event_id`.
    ///
    /// Holds a seat when one is free, otherwise appends the user to the
    /// waitlist. With an `idempotency_key`, repeated calls return the record
    /// the first call created.
    ///
    /// # Errors
    ///
    /// - `InvalidIdempotencyKey`: key is empty or longer than 128 characters
    /// - `EventNotFound`: the catalog does not know the event
    /// - `RegistrationClosed`: the event is not published or has ended
    /// - `AlreadyRegistered`: the user holds a non-cancelled registration
    /// - `ConcurrencyConflict`: retries exhausted
    /// - `Storage`: backend failure
    pub async fn register_for_event(
        &self,
        event_id: EventId,
        user_id: UserId,
        idempotency_key: Option<&str>,
    ) -> Result<Registration, RegistrationError> {
        let key = idempotency_key
            .map(str::parse::<IdempotencyKey>)
            .transpose()?;

        let result = self
            .with_retry(|| self.try_register(event_id, user_id, key.clone()))
            .await;

        match result {
            Ok(Admission::Created(registration)) => {
                let outcome = match registration.status {
                    RegistrationStatus::Waitlisted => "waitlisted",
                    _ => "registered",
                };
                RegistrationMetrics::record_outcome(outcome);
                tracing::info!(
                    registration_id = %registration.id,
                    event_id = %event_id,
                    user_id = %user_id,
                    status = %registration.status,
                    waitlist_position = ?registration.waitlist_position,
                    "Registration created"
                );

                self.publish_all(&[RegistrationEvent::created(&registration)])
                    .await;
                Ok(registration)
            }
            Ok(Admission::Replayed(registration)) => {
                RegistrationMetrics::record_outcome("replayed");
                tracing::debug!(
                    registration_id = %registration.id,
                    event_id = %event_id,
                    "Idempotent replay, returning existing registration"
                );
                Ok(registration)
            }
            Err(error) => {
                RegistrationMetrics::record_outcome("rejected");
                Err(error)
            }
        }
    }

    async fn try_register(
        &self,
        event_id: EventId,
        user_id: UserId,
        key: Option<IdempotencyKey>,
    ) -> Result<Admission, RegistrationError> {
        let store = &self.env.store;

        if let Some(existing) = self.find_by_key(event_id, user_id, key.as_ref()).await? {
            return Ok(Admission::Replayed(existing));
        }

        let now = self.now();
        let event = self
            .env
            .catalog
            .event(event_id)
            .await?
            .ok_or(RegistrationError::EventNotFound(event_id))?;
        if let Some(reason) = event.registration_block(now) {
            return Err(RegistrationError::RegistrationClosed { event_id, reason });
        }

        if let Some(existing) = store.find_active_registration(event_id, user_id).await? {
            return Err(RegistrationError::AlreadyRegistered {
                event_id,
                user_id,
                existing: existing.id,
            });
        }

        let mut ledger = match store.load_capacity(event_id).await? {
            Some(ledger) => ledger,
            None => {
                store
                    .ensure_capacity(CapacityRecord::new(event_id, event.capacity))
                    .await?
            }
        };

        let outcome = ledger.reserve();
        let mut writes = WriteSet::new();
        writes.update_capacity(ledger);
        let registration = writes.insert_registration(Registration::create(
            event_id,
            user_id,
            outcome,
            key.clone(),
            now,
        ));

        match store.commit(writes).await {
            Ok(()) => Ok(Admission::Created(registration)),
            Err(StoreError::Duplicate(reason)) => {
                // Lost an insert race against a request from the same user.
                if let Some(winner) = self.find_by_key(event_id, user_id, key.as_ref()).await? {
                    return Ok(Admission::Replayed(winner));
                }
                match store.find_active_registration(event_id, user_id).await? {
                    Some(existing) => Err(RegistrationError::AlreadyRegistered {
                        event_id,
                        user_id,
                        existing: existing.id,
                    }),
                    None => Err(RegistrationError::ConcurrencyConflict(reason)),
                }
            }
            Err(error) => Err(error.into()),
        }
    }

    async fn find_by_key(
        &self,
        event_id: EventId,
        user_id: UserId,
        key: Option<&IdempotencyKey>,
    ) -> Result<Option<Registration>, RegistrationError> {
        let Some(key) = key else {
            return Ok(None);
        };
        Ok(self
            .env
            .store
            .find_by_idempotency_key(event_id, user_id, key.clone())
            .await?)
    }
}
