//! In-memory registration store
//!
//! [`InMemoryRegistrationStore`] behaves like the Postgres store as far as the
//! engine can tell: every write set is validated against the stored versions
//! and uniqueness rules, then applied as a whole or not at all.

#![allow(clippy::unwrap_used)] // Test infrastructure uses unwrap for simplicity
#![allow(clippy::missing_panics_doc)] // Panics only on a poisoned lock

use chrono::{DateTime, Utc};
use rollcall_core::ids::{EventId, IdempotencyKey, RegistrationId, UserId};
use rollcall_core::ledger::CapacityRecord;
use rollcall_core::registration::{Registration, RegistrationStatus};
use rollcall_core::store::{RecordWrite, RegistrationStore, StoreError, StoreFuture, WriteSet};
use rollcall_core::version::Version;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};

#[derive(Debug, Clone, Default)]
struct Tables {
    capacity: HashMap<EventId, CapacityRecord>,
    registrations: HashMap<RegistrationId, Registration>,
}

impl Tables {
    fn apply(&mut self, writes: &WriteSet) -> Result<(), StoreError> {
        if let Some(write) = writes.capacity() {
            let record = write.record();
            let stored = self.capacity.get(&record.event_id).map(|r| r.version);
            check_version(format!("capacity:{}", record.event_id), write, stored)?;
            self.capacity.insert(record.event_id, record.clone());
        }

        for write in writes.registrations() {
            let record = write.record();
            let stored = self.registrations.get(&record.id).map(|r| r.version);
            check_version(format!("registration:{}", record.id), write, stored)?;
            if matches!(write, RecordWrite::Insert(_)) {
                self.check_unique(record)?;
            }
            self.registrations.insert(record.id, record.clone());
        }

        if let Some(compaction) = writes.compaction() {
            for registration in self.registrations.values_mut() {
                compaction.apply_to(registration);
            }
        }

        Ok(())
    }

    fn check_unique(&self, record: &Registration) -> Result<(), StoreError> {
        for other in self.registrations.values() {
            if other.event_id != record.event_id || other.user_id != record.user_id {
                continue;
            }
            if other.status != RegistrationStatus::Cancelled
                && record.status != RegistrationStatus::Cancelled
            {
                return Err(StoreError::Duplicate(format!(
                    "user {} already holds registration {} for event {}",
                    record.user_id, other.id, record.event_id
                )));
            }
            if record.idempotency_key.is_some() && other.idempotency_key == record.idempotency_key {
                return Err(StoreError::Duplicate(format!(
                    "idempotency key already used by registration {}",
                    other.id
                )));
            }
        }
        Ok(())
    }
}

fn check_version<T>(
    entity: String,
    write: &RecordWrite<T>,
    stored: Option<Version>,
) -> Result<(), StoreError> {
    let (expected, ok) = match write {
        RecordWrite::Insert(_) => (Version::INITIAL, stored.is_none()),
        RecordWrite::Update { expected, .. } => (*expected, stored == Some(*expected)),
    };
    if ok {
        Ok(())
    } else {
        Err(StoreError::ConcurrencyConflict {
            entity,
            expected,
            actual: stored,
        })
    }
}

/// In-memory registration store for fast, deterministic testing.
///
/// Cloning shares the underlying tables.
///
/// # Example
///
/// ```
/// use rollcall_core::ids::EventId;
/// use rollcall_core::ledger::CapacityRecord;
/// use rollcall_core::store::{RegistrationStore, WriteSet};
/// use rollcall_testing::InMemoryRegistrationStore;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let store = InMemoryRegistrationStore::new();
/// let event_id = EventId::new();
///
/// let mut ledger = store.ensure_capacity(CapacityRecord::new(event_id, 2)).await?;
/// ledger.reserve();
///
/// let mut writes = WriteSet::new();
/// writes.update_capacity(ledger);
/// store.commit(writes).await?;
///
/// assert_eq!(store.capacity(event_id).map(|l| l.held_seats), Some(1));
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Debug, Default)]
pub struct InMemoryRegistrationStore {
    tables: Arc<RwLock<Tables>>,
    injected_conflicts: Arc<AtomicUsize>,
    commits: Arc<AtomicUsize>,
}

impl InMemoryRegistrationStore {
    /// Create a new empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `count` commits fail with a concurrency conflict.
    ///
    /// Useful for exercising retry exhaustion without real contention.
    pub fn inject_conflicts(&self, count: usize) {
        self.injected_conflicts.store(count, Ordering::SeqCst);
    }

    /// Number of successful commits so far.
    #[must_use]
    pub fn commit_count(&self) -> usize {
        self.commits.load(Ordering::SeqCst)
    }

    /// Current ledger record of an event.
    #[must_use]
    pub fn capacity(&self, event_id: EventId) -> Option<CapacityRecord> {
        self.tables.read().unwrap().capacity.get(&event_id).cloned()
    }

    /// Current state of a registration.
    #[must_use]
    pub fn registration(&self, id: RegistrationId) -> Option<Registration> {
        self.tables.read().unwrap().registrations.get(&id).cloned()
    }

    /// Every registration of an event, in no particular order.
    #[must_use]
    pub fn registrations_for(&self, event_id: EventId) -> Vec<Registration> {
        self.tables
            .read()
            .unwrap()
            .registrations
            .values()
            .filter(|r| r.event_id == event_id)
            .cloned()
            .collect()
    }

    /// Put a registration in place without any checks (test setup only).
    pub fn seed_registration(&self, registration: Registration) {
        self.tables
            .write()
            .unwrap()
            .registrations
            .insert(registration.id, registration);
    }

    /// Put a ledger record in place without any checks (test setup only).
    pub fn seed_capacity(&self, record: CapacityRecord) {
        self.tables
            .write()
            .unwrap()
            .capacity
            .insert(record.event_id, record);
    }

    fn select<F>(&self, predicate: F) -> Vec<Registration>
    where
        F: Fn(&Registration) -> bool,
    {
        self.tables
            .read()
            .unwrap()
            .registrations
            .values()
            .filter(|r| predicate(r))
            .cloned()
            .collect()
    }

    fn take_injected_conflict(&self) -> bool {
        self.injected_conflicts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

impl RegistrationStore for InMemoryRegistrationStore {
    fn load_capacity(&self, event_id: EventId) -> StoreFuture<'_, Option<CapacityRecord>> {
        let record = self.capacity(event_id);
        Box::pin(async move { Ok(record) })
    }

    fn ensure_capacity(&self, record: CapacityRecord) -> StoreFuture<'_, CapacityRecord> {
        let stored = self
            .tables
            .write()
            .unwrap()
            .capacity
            .entry(record.event_id)
            .or_insert(CapacityRecord {
                version: Version::INITIAL,
                ..record
            })
            .clone();
        Box::pin(async move { Ok(stored) })
    }

    fn load_registration(&self, id: RegistrationId) -> StoreFuture<'_, Option<Registration>> {
        let record = self.registration(id);
        Box::pin(async move { Ok(record) })
    }

    fn find_active_registration(
        &self,
        event_id: EventId,
        user_id: UserId,
    ) -> StoreFuture<'_, Option<Registration>> {
        let found = self
            .select(|r| {
                r.event_id == event_id
                    && r.user_id == user_id
                    && r.status != RegistrationStatus::Cancelled
            })
            .into_iter()
            .next();
        Box::pin(async move { Ok(found) })
    }

    fn find_by_idempotency_key(
        &self,
        event_id: EventId,
        user_id: UserId,
        key: IdempotencyKey,
    ) -> StoreFuture<'_, Option<Registration>> {
        let found = self
            .select(|r| {
                r.event_id == event_id
                    && r.user_id == user_id
                    && r.idempotency_key.as_ref() == Some(&key)
            })
            .into_iter()
            .next();
        Box::pin(async move { Ok(found) })
    }

    fn waitlist(&self, event_id: EventId) -> StoreFuture<'_, Vec<Registration>> {
        let mut queue = self.select(|r| {
            r.event_id == event_id && r.status == RegistrationStatus::Waitlisted
        });
        queue.sort_by_key(|r| r.waitlist_position);
        Box::pin(async move { Ok(queue) })
    }

    fn waitlist_head(&self, event_id: EventId) -> StoreFuture<'_, Option<Registration>> {
        let head = self
            .select(|r| {
                r.event_id == event_id
                    && r.status == RegistrationStatus::Waitlisted
                    && r.waitlist_position == Some(1)
            })
            .into_iter()
            .next();
        Box::pin(async move { Ok(head) })
    }

    fn count_pending_offers(&self, event_id: EventId) -> StoreFuture<'_, u32> {
        let count = self
            .select(|r| r.event_id == event_id && r.status == RegistrationStatus::PromotionPending)
            .len();
        Box::pin(async move {
            u32::try_from(count).map_err(|e| StoreError::Serialization(e.to_string()))
        })
    }

    fn expired_promotions(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> StoreFuture<'_, Vec<Registration>> {
        let mut expired = self.select(|r| {
            r.status == RegistrationStatus::PromotionPending
                && r.promotion_deadline.is_some_and(|deadline| deadline < now)
        });
        expired.sort_by_key(|r| r.promotion_deadline);
        expired.truncate(limit);
        Box::pin(async move { Ok(expired) })
    }

    fn registered_for_event(&self, event_id: EventId) -> StoreFuture<'_, Vec<Registration>> {
        let registered = self
            .select(|r| r.event_id == event_id && r.status == RegistrationStatus::Registered);
        Box::pin(async move { Ok(registered) })
    }

    fn commit(&self, writes: WriteSet) -> StoreFuture<'_, ()> {
        let result = if self.take_injected_conflict() {
            Err(StoreError::ConcurrencyConflict {
                entity: "injected".to_string(),
                expected: Version::INITIAL,
                actual: None,
            })
        } else {
            let mut tables = self.tables.write().unwrap();
            let mut staged = tables.clone();
            match staged.apply(&writes) {
                Ok(()) => {
                    *tables = staged;
                    self.commits.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
                Err(error) => Err(error),
            }
        };
        Box::pin(async move { result })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rollcall_core::ledger::ReserveOutcome;
    use rollcall_core::waitlist::WaitlistCompaction;

    fn waitlisted(event_id: EventId, position: u32) -> Registration {
        Registration::create(
            event_id,
            UserId::new(),
            ReserveOutcome::Waitlisted { position },
            None,
            Utc::now(),
        )
    }

    #[tokio::test]
    async fn stale_update_rejects_the_whole_write_set() {
        let store = InMemoryRegistrationStore::new();
        let event_id = EventId::new();
        let ledger = store
            .ensure_capacity(CapacityRecord::new(event_id, 1))
            .await
            .unwrap();

        let mut first = WriteSet::new();
        let mut winner = ledger.clone();
        winner.reserve();
        first.update_capacity(winner);
        store.commit(first).await.unwrap();

        let mut second = WriteSet::new();
        let mut loser = ledger;
        loser.reserve();
        second.update_capacity(loser);
        let registration = second.insert_registration(waitlisted(event_id, 1));

        let error = store.commit(second).await.unwrap_err();
        assert!(matches!(error, StoreError::ConcurrencyConflict { .. }));
        assert!(store.registration(registration.id).is_none());
        assert_eq!(store.capacity(event_id).unwrap().held_seats, 1);
    }

    #[tokio::test]
    async fn second_live_registration_for_user_is_a_duplicate() {
        let store = InMemoryRegistrationStore::new();
        let event_id = EventId::new();
        let user_id = UserId::new();
        let create = || {
            Registration::create(event_id, user_id, ReserveOutcome::Reserved, None, Utc::now())
        };

        let mut writes = WriteSet::new();
        writes.insert_registration(create());
        store.commit(writes).await.unwrap();

        let mut writes = WriteSet::new();
        writes.insert_registration(create());
        assert!(matches!(
            store.commit(writes).await,
            Err(StoreError::Duplicate(_))
        ));
    }

    #[tokio::test]
    async fn compaction_shifts_and_bumps_later_entries() {
        let store = InMemoryRegistrationStore::new();
        let event_id = EventId::new();
        let queue: Vec<_> = (1..=3).map(|p| waitlisted(event_id, p)).collect();
        for entry in &queue {
            store.seed_registration(entry.clone());
        }

        let mut removed = queue[0].clone();
        removed.status = RegistrationStatus::Cancelled;
        removed.waitlist_position = None;

        let mut writes = WriteSet::new();
        writes.update_registration(removed);
        writes.compact_waitlist(WaitlistCompaction::new(event_id, 1));
        store.commit(writes).await.unwrap();

        let remaining = store.waitlist(event_id).await.unwrap();
        let positions: Vec<_> = remaining.iter().map(|r| r.waitlist_position).collect();
        assert_eq!(positions, vec![Some(1), Some(2)]);
        assert!(remaining.iter().all(|r| r.version == Version::new(1)));
        assert_eq!(remaining[0].id, queue[1].id);
    }

    #[tokio::test]
    async fn injected_conflicts_are_consumed() {
        let store = InMemoryRegistrationStore::new();
        store.inject_conflicts(1);

        assert!(store.commit(WriteSet::new()).await.is_err());
        assert!(store.commit(WriteSet::new()).await.is_ok());
        assert_eq!(store.commit_count(), 1);
    }
}
