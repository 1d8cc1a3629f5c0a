//! Attendance: check-in at the door and no-show marking after the event.

use crate::metrics::SweepMetrics;
use crate::{Committed, NoShowReport, RegistrationEngine};
use chrono::{DateTime, Utc};
use rollcall_core::catalog::CatalogEvent;
use rollcall_core::error::RegistrationError;
use rollcall_core::event::RegistrationEvent;
use rollcall_core::ids::{EventId, RegistrationId};
use rollcall_core::registration::{Registration, RegistrationStatus, Transition};
use rollcall_core::store::WriteSet;

impl RegistrationEngine {
    /// Verify a presented check-in code and mark the attendee present.
    ///
    /// # Errors
    ///
    /// - `RegistrationNotFound`: unknown id
    /// - `InvalidState`: the registration does not hold a confirmed seat
    /// - `EventNotFound`: the catalog no longer knows the event
    /// - `CheckInWindowClosed`: before the event starts or after it ends
    /// - `CheckInMismatch`: the code does not match
    /// - `ConcurrencyConflict`: retries exhausted
    /// - `Storage`: backend failure
    pub async fn check_in_attendee(
        &self,
        registration_id: RegistrationId,
        presented_code: &str,
    ) -> Result<Registration, RegistrationError> {
        let committed = self
            .with_retry(|| self.try_check_in(registration_id, presented_code))
            .await;

        let committed = match committed {
            Ok(committed) => committed,
            Err(error) => {
                if matches!(error, RegistrationError::CheckInMismatch(_)) {
                    tracing::warn!(registration_id = %registration_id, "Check-in code mismatch");
                }
                return Err(error);
            }
        };

        tracing::info!(
            registration_id = %registration_id,
            event_id = %committed.value.event_id,
            "Attendee checked in"
        );
        self.publish_all(&committed.events).await;
        Ok(committed.value)
    }

    /// Mark every still-`Registered` attendee of an ended event as no-show.
    ///
    /// Idempotent: a second run finds nothing left to mark.
    ///
    /// # Errors
    ///
    /// - `EventNotFound`: unknown event
    /// - `CheckInWindowClosed`: the event has not ended yet
    /// - `Storage`: backend failure while listing registrations
    pub async fn mark_no_shows(&self, event_id: EventId) -> Result<NoShowReport, RegistrationError> {
        let event = self
            .env
            .catalog
            .event(event_id)
            .await?
            .ok_or(RegistrationError::EventNotFound(event_id))?;

        if !event.has_ended(self.now()) {
            return Err(RegistrationError::CheckInWindowClosed(event_id));
        }

        self.mark_no_shows_for(&event).await
    }

    /// Run [`mark_no_shows`](Self::mark_no_shows) for every event that ended
    /// in `[from, to)`.
    ///
    /// # Errors
    ///
    /// - `Storage`: the catalog or store could not be queried
    pub async fn sweep_no_shows(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<NoShowReport, RegistrationError> {
        let now = self.now();
        let mut report = NoShowReport::default();

        for event in self.env.catalog.ended_between(from, to).await? {
            if !event.has_ended(now) {
                continue;
            }
            report.merge(self.mark_no_shows_for(&event).await?);
        }
        Ok(report)
    }

    async fn mark_no_shows_for(&self, event: &CatalogEvent) -> Result<NoShowReport, RegistrationError> {
        let mut report = NoShowReport::default();

        for registration in self.env.store.registered_for_event(event.event_id).await? {
            match self
                .with_retry(|| self.try_mark_no_show(registration.id))
                .await
            {
                Ok(Some(committed)) => {
                    report.marked += 1;
                    self.publish_all(&committed.events).await;
                }
                Ok(None) => report.skipped += 1,
                Err(error) => {
                    report.failed += 1;
                    tracing::warn!(
                        registration_id = %registration.id,
                        event_id = %event.event_id,
                        error = %error,
                        "Failed to mark no-show"
                    );
                }
            }
        }

        SweepMetrics::record_no_shows(&report);
        tracing::info!(
            event_id = %event.event_id,
            marked = report.marked,
            skipped = report.skipped,
            failed = report.failed,
            "No-show pass finished"
        );
        Ok(report)
    }

    async fn try_check_in(
        &self,
        registration_id: RegistrationId,
        presented_code: &str,
    ) -> Result<Committed<Registration>, RegistrationError> {
        let now = self.now();
        let mut registration = self.load_registration(registration_id).await?;

        if registration.status != RegistrationStatus::Registered {
            return Err(RegistrationError::InvalidState {
                registration_id,
                status: registration.status,
                operation: Transition::CheckIn.name(),
            });
        }

        let event = self
            .env
            .catalog
            .event(registration.event_id)
            .await?
            .ok_or(RegistrationError::EventNotFound(registration.event_id))?;
        if !event.check_in_open(now) {
            return Err(RegistrationError::CheckInWindowClosed(event.event_id));
        }

        if !registration.qr_code.matches(presented_code) {
            return Err(RegistrationError::CheckInMismatch(registration_id));
        }

        registration
            .transition(Transition::CheckIn, now)
            .map_err(|e| RegistrationError::invalid_state(registration_id, e))?;

        let mut writes = WriteSet::new();
        let attended = writes.update_registration(registration);
        self.env.store.commit(writes).await?;

        let event = RegistrationEvent::CheckedIn {
            registration_id,
            event_id: attended.event_id,
            user_id: attended.user_id,
            occurred_at: now,
        };
        Ok(Committed::new(attended, vec![event]))
    }

    /// `None` when the registration is no longer `Registered`.
    async fn try_mark_no_show(
        &self,
        registration_id: RegistrationId,
    ) -> Result<Option<Committed<()>>, RegistrationError> {
        let now = self.now();
        let mut registration = self.load_registration(registration_id).await?;
        if registration.status != RegistrationStatus::Registered {
            return Ok(None);
        }

        registration
            .transition(Transition::MarkNoShow, now)
            .map_err(|e| RegistrationError::invalid_state(registration_id, e))?;

        let mut writes = WriteSet::new();
        let marked = writes.update_registration(registration);
        self.env.store.commit(writes).await?;

        let event = RegistrationEvent::MarkedNoShow {
            registration_id,
            event_id: marked.event_id,
            user_id: marked.user_id,
            occurred_at: now,
        };
        Ok(Some(Committed::new((), vec![event])))
    }
}
