//! Registration store trait and the atomic write set it applies.
//!
//! The store is the only shared mutable resource in the system. It holds one
//! capacity record per event and every registration record, and it offers
//! exactly one way to change them: [`RegistrationStore::commit`], which applies
//! a [`WriteSet`] atomically and only if every record is still at the version
//! the writer read.
//!
//! # Implementations
//!
//! - `PgRegistrationStore` (in `rollcall-postgres`): one SQL transaction per write set
//! - `InMemoryRegistrationStore` (in `rollcall-testing`): fast, deterministic tests
//!
//! # Example
//!
//! ```no_run
//! use rollcall_core::ids::EventId;
//! use rollcall_core::ledger::CapacityRecord;
//! use rollcall_core::store::{RegistrationStore, StoreError, WriteSet};
//!
//! async fn hold_one_seat<S: RegistrationStore>(store: &S, event_id: EventId) -> Result<(), StoreError> {
//!     let Some(mut ledger) = store.load_capacity(event_id).await? else {
//!         return Ok(());
//!     };
//!     ledger.reserve();
//!
//!     let mut writes = WriteSet::new();
//!     writes.update_capacity(ledger);
//!     // Fails with StoreError::ConcurrencyConflict if someone else moved the ledger first.
//!     store.commit(writes).await
//! }
//! ```

use crate::ids::{EventId, IdempotencyKey, RegistrationId, UserId};
use crate::ledger::CapacityRecord;
use crate::registration::Registration;
use crate::version::Version;
use crate::waitlist::WaitlistCompaction;
use chrono::{DateTime, Utc};
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// Boxed future returned by every store method.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, StoreError>> + Send + 'a>>;

/// Errors that can occur during store operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Optimistic concurrency conflict: a record moved since it was read.
    ///
    /// The whole write set was rejected; nothing was applied.
    #[error("Concurrency conflict on {entity}: expected version {expected}, found {actual:?}")]
    ConcurrencyConflict {
        /// Which record conflicted (e.g. `capacity:<event>` or `registration:<id>`)
        entity: String,
        /// The version the writer read
        expected: Version,
        /// The version actually stored (`None` if the record is missing)
        actual: Option<Version>,
    },

    /// An insert collided with a uniqueness rule (one live registration per
    /// user and event, one registration per idempotency key).
    #[error("Duplicate record: {0}")]
    Duplicate(String),

    /// Database connection or query failure.
    #[error("Database error: {0}")]
    Database(String),

    /// A stored row could not be decoded.
    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// One record write inside a [`WriteSet`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordWrite<T> {
    /// Insert a new record at [`Version::INITIAL`].
    Insert(T),
    /// Replace a record currently at `expected`; `record.version` is already
    /// `expected.next()`.
    Update {
        /// The new state of the record
        record: T,
        /// Version the writer read
        expected: Version,
    },
}

impl<T> RecordWrite<T> {
    /// The record being written.
    pub const fn record(&self) -> &T {
        match self {
            Self::Insert(record) | Self::Update { record, .. } => record,
        }
    }
}

/// Batch of writes that succeed or fail together.
///
/// Writes are applied in a fixed order: the capacity record, then the
/// registration writes in the order they were staged, then the waitlist
/// compaction. Staging a record bumps its version; the returned copy is what
/// the store will hold once the commit succeeds.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WriteSet {
    capacity: Option<RecordWrite<CapacityRecord>>,
    registrations: Vec<RecordWrite<Registration>>,
    compaction: Option<WaitlistCompaction>,
}

impl WriteSet {
    /// Creates an empty write set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Stage a new capacity record.
    pub fn insert_capacity(&mut self, mut record: CapacityRecord) -> CapacityRecord {
        record.version = Version::INITIAL;
        self.capacity = Some(RecordWrite::Insert(record.clone()));
        record
    }

    /// Stage a modified capacity record read at `record.version`.
    pub fn update_capacity(&mut self, mut record: CapacityRecord) -> CapacityRecord {
        let expected = record.version;
        record.version = expected.next();
        self.capacity = Some(RecordWrite::Update {
            record: record.clone(),
            expected,
        });
        record
    }

    /// Stage a new registration.
    pub fn insert_registration(&mut self, mut record: Registration) -> Registration {
        record.version = Version::INITIAL;
        self.registrations.push(RecordWrite::Insert(record.clone()));
        record
    }

    /// Stage a modified registration read at `record.version`.
    pub fn update_registration(&mut self, mut record: Registration) -> Registration {
        let expected = record.version;
        record.version = expected.next();
        self.registrations.push(RecordWrite::Update {
            record: record.clone(),
            expected,
        });
        record
    }

    /// Stage a waitlist compaction, applied after all record writes.
    pub const fn compact_waitlist(&mut self, compaction: WaitlistCompaction) {
        self.compaction = Some(compaction);
    }

    /// The staged capacity write.
    #[must_use]
    pub const fn capacity(&self) -> Option<&RecordWrite<CapacityRecord>> {
        self.capacity.as_ref()
    }

    /// The staged registration writes, in application order.
    #[must_use]
    pub fn registrations(&self) -> &[RecordWrite<Registration>] {
        &self.registrations
    }

    /// The staged compaction.
    #[must_use]
    pub const fn compaction(&self) -> Option<&WaitlistCompaction> {
        self.compaction.as_ref()
    }

    /// Whether nothing is staged.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.capacity.is_none() && self.registrations.is_empty() && self.compaction.is_none()
    }
}

/// Persistent store abstraction for capacity records and registrations.
///
/// # Thread Safety
///
/// Implementations must be `Send + Sync`; the engine shares one store across
/// any number of concurrent request handlers.
///
/// # Dyn Compatibility
///
/// Methods return boxed futures instead of using `async fn` so the engine can
/// hold an `Arc<dyn RegistrationStore>`.
pub trait RegistrationStore: Send + Sync {
    /// Load the capacity record of an event.
    ///
    /// # Errors
    ///
    /// - `Database`: query failed
    fn load_capacity(&self, event_id: EventId) -> StoreFuture<'_, Option<CapacityRecord>>;

    /// Insert `record` if the event has no capacity record yet, then return
    /// whatever record is stored (the existing one wins a race).
    ///
    /// # Errors
    ///
    /// - `Database`: query failed
    fn ensure_capacity(&self, record: CapacityRecord) -> StoreFuture<'_, CapacityRecord>;

    /// Load a registration by id.
    ///
    /// # Errors
    ///
    /// - `Database` / `Serialization`: query or decoding failed
    fn load_registration(&self, id: RegistrationId) -> StoreFuture<'_, Option<Registration>>;

    /// The user's non-cancelled registration for the event, if any.
    ///
    /// # Errors
    ///
    /// - `Database` / `Serialization`: query or decoding failed
    fn find_active_registration(
        &self,
        event_id: EventId,
        user_id: UserId,
    ) -> StoreFuture<'_, Option<Registration>>;

    /// The registration created with `key` for this event and user, in any state.
    ///
    /// # Errors
    ///
    /// - `Database` / `Serialization`: query or decoding failed
    fn find_by_idempotency_key(
        &self,
        event_id: EventId,
        user_id: UserId,
        key: IdempotencyKey,
    ) -> StoreFuture<'_, Option<Registration>>;

    /// The event's `Waitlisted` registrations ordered by position.
    ///
    /// # Errors
    ///
    /// - `Database` / `Serialization`: query or decoding failed
    fn waitlist(&self, event_id: EventId) -> StoreFuture<'_, Vec<Registration>>;

    /// The `Waitlisted` registration at position 1.
    ///
    /// # Errors
    ///
    /// - `Database` / `Serialization`: query or decoding failed
    fn waitlist_head(&self, event_id: EventId) -> StoreFuture<'_, Option<Registration>>;

    /// Number of `PromotionPending` registrations for the event.
    ///
    /// # Errors
    ///
    /// - `Database`: query failed
    fn count_pending_offers(&self, event_id: EventId) -> StoreFuture<'_, u32>;

    /// Up to `limit` `PromotionPending` registrations whose deadline is before
    /// `now`, oldest deadline first.
    ///
    /// # Errors
    ///
    /// - `Database` / `Serialization`: query or decoding failed
    fn expired_promotions(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> StoreFuture<'_, Vec<Registration>>;

    /// The event's `Registered` registrations.
    ///
    /// # Errors
    ///
    /// - `Database` / `Serialization`: query or decoding failed
    fn registered_for_event(&self, event_id: EventId) -> StoreFuture<'_, Vec<Registration>>;

    /// Apply a write set atomically.
    ///
    /// # Errors
    ///
    /// - `ConcurrencyConflict`: a record was not at its expected version;
    ///   nothing was applied
    /// - `Duplicate`: an insert violated a uniqueness rule; nothing was applied
    /// - `Database`: the transaction failed
    fn commit(&self, writes: WriteSet) -> StoreFuture<'_, ()>;
}
