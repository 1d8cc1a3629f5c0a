//! Promotion scheduling: turning freed seats into time-boxed offers.
//!
//! A seat is freed by cancelling a seat holder, declining an offer, or letting
//! an offer expire. Each of these commits, in the same write set as the change
//! that freed the seat:
//!
//! - the released seat on the ledger
//! - at most one new offer to the waitlist head (`hold_for_offer`)
//! - the waitlist compaction that moves everyone else up one place
//!
//! Because the ledger record is part of every such write set, two operations
//! that free seats on the same event serialize on its version: the loser
//! retries against the new head, so a freed seat never yields two offers.
//!
//! Once the catalog closes an event (it is no longer published, or its end
//! time has been reached) freed seats stay free: no new offers are made and
//! open offers can no longer be accepted.

use crate::metrics::{PromotionMetrics, SweepMetrics};
use crate::{Committed, RegistrationEngine, SweepReport};
use chrono::{DateTime, Utc};
use rollcall_core::error::RegistrationError;
use rollcall_core::event::RegistrationEvent;
use rollcall_core::ids::RegistrationId;
use rollcall_core::ledger::CapacityRecord;
use rollcall_core::registration::{CancelReason, Registration, RegistrationStatus, Transition};
use rollcall_core::store::WriteSet;
use rollcall_core::waitlist::{HEAD_POSITION, WaitlistCompaction};
use std::time::Instant;

impl RegistrationEngine {
    /// Cancel a registration.
    ///
    /// Cancelling a seat holder releases the seat and promotes the waitlist
    /// head; cancelling a waitlisted entry closes the gap it leaves.
    ///
    /// # Errors
    ///
    /// - `RegistrationNotFound`: unknown id
    /// - `InvalidState`: already cancelled, attended or marked no-show
    /// - `ConcurrencyConflict`: retries exhausted
    /// - `Storage`: backend failure
    pub async fn cancel_registration(
        &self,
        registration_id: RegistrationId,
    ) -> Result<(), RegistrationError> {
        let committed = self
            .with_retry(|| self.try_cancel(registration_id))
            .await?;

        if committed.value == RegistrationStatus::PromotionPending {
            PromotionMetrics::record_declined();
        }
        tracing::info!(
            registration_id = %registration_id,
            previous_status = %committed.value,
            "Registration cancelled"
        );
        Self::record_offers(&committed.events);
        self.publish_all(&committed.events).await;
        Ok(())
    }

    /// Accept a promotion offer.
    ///
    /// # Errors
    ///
    /// - `RegistrationNotFound`: unknown id
    /// - `InvalidState`: the registration holds no offer
    /// - `PromotionExpired`: the deadline has passed
    /// - `EventNotFound`: the catalog no longer knows the event
    /// - `RegistrationClosed`: the event has ended or is no longer published
    /// - `ConcurrencyConflict`: retries exhausted
    /// - `Storage`: backend failure
    pub async fn accept_promotion(
        &self,
        registration_id: RegistrationId,
    ) -> Result<Registration, RegistrationError> {
        let committed = self
            .with_retry(|| self.try_accept(registration_id))
            .await?;

        PromotionMetrics::record_accepted();
        tracing::info!(
            registration_id = %registration_id,
            event_id = %committed.value.event_id,
            "Promotion accepted"
        );
        self.publish_all(&committed.events).await;
        Ok(committed.value)
    }

    /// Decline a promotion offer and pass the seat on.
    ///
    /// # Errors
    ///
    /// - `RegistrationNotFound`: unknown id
    /// - `InvalidState`: the registration holds no offer
    /// - `PromotionExpired`: the deadline has passed (the sweep will expire it)
    /// - `ConcurrencyConflict`: retries exhausted
    /// - `Storage`: backend failure
    pub async fn decline_promotion(
        &self,
        registration_id: RegistrationId,
    ) -> Result<(), RegistrationError> {
        let committed = self
            .with_retry(|| self.try_decline(registration_id))
            .await?;

        PromotionMetrics::record_declined();
        tracing::info!(registration_id = %registration_id, "Promotion declined");
        Self::record_offers(&committed.events);
        self.publish_all(&committed.events).await;
        Ok(())
    }

    /// Expire every offer whose deadline has passed.
    ///
    /// Works through the candidates in batches of
    /// [`EngineConfig::sweep_batch_size`](crate::EngineConfig). Records that
    /// moved on since they were listed are skipped; records that fail are
    /// logged and left for the next sweep. Safe to run concurrently from
    /// several instances.
    ///
    /// # Errors
    ///
    /// - `Storage`: listing the candidates failed
    pub async fn sweep_expired_promotions(&self) -> Result<SweepReport, RegistrationError> {
        let started = Instant::now();
        let batch_size = self.config.sweep_batch_size.max(1);
        let mut report = SweepReport::default();

        loop {
            let now = self.now();
            let candidates = self.env.store.expired_promotions(now, batch_size).await?;
            let listed = candidates.len();
            let expired_before = report.expired;

            for candidate in candidates {
                match self.with_retry(|| self.try_expire(candidate.id)).await {
                    Ok(Some(committed)) => {
                        report.expired += 1;
                        PromotionMetrics::record_expired();
                        Self::record_offers(&committed.events);
                        self.publish_all(&committed.events).await;
                    }
                    Ok(None) => report.skipped += 1,
                    Err(error) => {
                        report.failed += 1;
                        tracing::warn!(
                            registration_id = %candidate.id,
                            event_id = %candidate.event_id,
                            error = %error,
                            "Failed to expire promotion offer, leaving it for the next sweep"
                        );
                    }
                }
            }

            // A short batch means the backlog is drained; a batch with no
            // progress would only list the same records again.
            if listed < batch_size || report.expired == expired_before {
                break;
            }
        }

        SweepMetrics::record_expiry_sweep(&report, started.elapsed());
        if report.expired > 0 || report.failed > 0 {
            tracing::info!(
                expired = report.expired,
                skipped = report.skipped,
                failed = report.failed,
                "Expiry sweep finished"
            );
        }
        Ok(report)
    }

    async fn try_cancel(
        &self,
        registration_id: RegistrationId,
    ) -> Result<Committed<RegistrationStatus>, RegistrationError> {
        let now = self.now();
        let mut registration = self.load_registration(registration_id).await?;
        let previous = registration.status;
        let vacated_position = registration.waitlist_position;

        registration
            .transition(Transition::Cancel, now)
            .map_err(|e| RegistrationError::invalid_state(registration_id, e))?;

        let mut ledger = self.load_ledger(registration.event_id).await?;
        let mut writes = WriteSet::new();
        let cancelled = writes.update_registration(registration);
        let mut events = vec![RegistrationEvent::Cancelled {
            registration_id,
            event_id: cancelled.event_id,
            user_id: cancelled.user_id,
            previous_status: previous,
            occurred_at: now,
        }];

        if previous.holds_seat() {
            ledger.release();
            if let Some(promoted) = self.promote_head(&mut ledger, &mut writes, now).await? {
                events.extend(RegistrationEvent::promoted(&promoted));
            }
        } else {
            ledger.leave_waitlist();
            if let Some(position) = vacated_position {
                writes.compact_waitlist(WaitlistCompaction::new(cancelled.event_id, position));
            }
        }

        writes.update_capacity(ledger);
        self.env.store.commit(writes).await?;
        Ok(Committed::new(previous, events))
    }

    async fn try_accept(
        &self,
        registration_id: RegistrationId,
    ) -> Result<Committed<Registration>, RegistrationError> {
        let now = self.now();
        let mut registration = self.load_registration(registration_id).await?;
        Self::ensure_open_offer(&registration, "accept", now)?;

        let event_id = registration.event_id;
        let event = self
            .env
            .catalog
            .event(event_id)
            .await?
            .ok_or(RegistrationError::EventNotFound(event_id))?;
        if let Some(reason) = event.registration_block(now) {
            return Err(RegistrationError::RegistrationClosed { event_id, reason });
        }

        registration
            .transition(Transition::Accept, now)
            .map_err(|e| RegistrationError::invalid_state(registration_id, e))?;

        let mut writes = WriteSet::new();
        let accepted = writes.update_registration(registration);
        self.env.store.commit(writes).await?;

        let event = RegistrationEvent::Accepted {
            registration_id,
            event_id: accepted.event_id,
            user_id: accepted.user_id,
            occurred_at: now,
        };
        Ok(Committed::new(accepted, vec![event]))
    }

    async fn try_decline(
        &self,
        registration_id: RegistrationId,
    ) -> Result<Committed<()>, RegistrationError> {
        let now = self.now();
        let registration = self.load_registration(registration_id).await?;
        Self::ensure_open_offer(&registration, "decline", now)?;

        let events = self
            .lapse_offer(registration, Transition::Decline, CancelReason::Declined, now)
            .await?;
        Ok(Committed::new((), events))
    }

    /// `None` when the record is no longer an expired offer.
    async fn try_expire(
        &self,
        registration_id: RegistrationId,
    ) -> Result<Option<Committed<()>>, RegistrationError> {
        let now = self.now();
        let registration = match self.load_registration(registration_id).await {
            Ok(registration) => registration,
            Err(RegistrationError::RegistrationNotFound(_)) => return Ok(None),
            Err(error) => return Err(error),
        };

        if registration.status != RegistrationStatus::PromotionPending
            || !registration.offer_expired(now)
        {
            return Ok(None);
        }

        let events = self
            .lapse_offer(registration, Transition::Expire, CancelReason::Expired, now)
            .await?;
        Ok(Some(Committed::new((), events)))
    }

    /// Close an offer, release its seat and offer it to the next in line.
    async fn lapse_offer(
        &self,
        mut registration: Registration,
        transition: Transition,
        reason: CancelReason,
        now: DateTime<Utc>,
    ) -> Result<Vec<RegistrationEvent>, RegistrationError> {
        let registration_id = registration.id;
        registration
            .transition(transition, now)
            .map_err(|e| RegistrationError::invalid_state(registration_id, e))?;

        let mut ledger = self.load_ledger(registration.event_id).await?;
        ledger.release();

        let mut writes = WriteSet::new();
        let lapsed = writes.update_registration(registration);
        let mut events = vec![RegistrationEvent::OfferLapsed {
            registration_id,
            event_id: lapsed.event_id,
            user_id: lapsed.user_id,
            reason,
            occurred_at: now,
        }];

        if let Some(promoted) = self.promote_head(&mut ledger, &mut writes, now).await? {
            events.extend(RegistrationEvent::promoted(&promoted));
        }

        writes.update_capacity(ledger);
        self.env.store.commit(writes).await?;

        tracing::debug!(
            registration_id = %registration_id,
            reason = %reason,
            "Promotion offer closed"
        );
        Ok(events)
    }

    /// Stage an offer to the waitlist head if the ledger has a free seat and
    /// the event still takes registrations.
    ///
    /// Mutates `ledger` in place; the caller stages it.
    async fn promote_head(
        &self,
        ledger: &mut CapacityRecord,
        writes: &mut WriteSet,
        now: DateTime<Utc>,
    ) -> Result<Option<Registration>, RegistrationError> {
        if ledger.waitlist_count == 0 || ledger.is_full() {
            return Ok(None);
        }

        let event_id = ledger.event_id;
        let closed = match self.env.catalog.event(event_id).await? {
            Some(event) => event.registration_block(now),
            None => Some("event is not in the catalog".to_string()),
        };
        if let Some(reason) = closed {
            tracing::debug!(
                event_id = %event_id,
                reason = %reason,
                "Registration closed, freed seat left unoffered"
            );
            return Ok(None);
        }

        let Some(mut head) = self.env.store.waitlist_head(event_id).await? else {
            // The ledger counts a waiter the queue does not show yet: a
            // concurrent write is in flight, so read again.
            return Err(RegistrationError::ConcurrencyConflict(format!(
                "Waitlist head missing for event {event_id}"
            )));
        };

        let deadline = now + self.config.promotion_window;
        head.transition(Transition::Promote { deadline }, now)
            .map_err(|e| RegistrationError::invalid_state(head.id, e))?;
        ledger.hold_for_offer();

        let promoted = writes.update_registration(head);
        writes.compact_waitlist(WaitlistCompaction::new(event_id, HEAD_POSITION));
        Ok(Some(promoted))
    }

    /// Count and log the offers a committed cascade made.
    fn record_offers(events: &[RegistrationEvent]) {
        for event in events {
            if let RegistrationEvent::Promoted {
                registration_id,
                event_id,
                deadline,
                ..
            } = event
            {
                PromotionMetrics::record_offered();
                tracing::info!(
                    registration_id = %registration_id,
                    event_id = %event_id,
                    deadline = %deadline,
                    "Promotion offered to waitlist head"
                );
            }
        }
    }

    fn ensure_open_offer(
        registration: &Registration,
        operation: &'static str,
        now: DateTime<Utc>,
    ) -> Result<(), RegistrationError> {
        if registration.status != RegistrationStatus::PromotionPending {
            return Err(RegistrationError::InvalidState {
                registration_id: registration.id,
                status: registration.status,
                operation,
            });
        }
        match registration.promotion_deadline {
            Some(deadline) if now > deadline => Err(RegistrationError::PromotionExpired {
                registration_id: registration.id,
                deadline,
            }),
            _ => Ok(()),
        }
    }
}
