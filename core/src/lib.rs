//! # Rollcall Core
//!
//! Domain types and traits for the Rollcall registration & waitlist promotion engine.
//!
//! This crate is the functional core: everything here is plain data and pure
//! decision logic. All I/O (the persistent store, the event catalog, the domain
//! event dispatcher, the clock) is expressed as traits and injected by the
//! runtime crate.
//!
//! ## Core Concepts
//!
//! - **Capacity record**: per-event seat bookkeeping (`held_seats`, `waitlist_count`)
//! - **Registration**: one user's claim on an event, driven by a closed state machine
//! - **Waitlist**: the ordered set of `Waitlisted` registrations, compacted on every removal
//! - **Write set**: a batch of version-guarded writes committed atomically by the store
//!
//! ## Concurrency Model
//!
//! There are no in-process locks. Every record carries a [`version::Version`];
//! stores apply a [`store::WriteSet`] only if every expected version still matches,
//! otherwise the whole set is rejected with [`store::StoreError::ConcurrencyConflict`]
//! and the caller retries with fresh state.
//!
//! ## Example
//!
//! ```
//! use rollcall_core::ids::EventId;
//! use rollcall_core::ledger::{CapacityRecord, ReserveOutcome};
//!
//! let mut record = CapacityRecord::new(EventId::new(), 1);
//! assert_eq!(record.reserve(), ReserveOutcome::Reserved);
//! assert_eq!(record.reserve(), ReserveOutcome::Waitlisted { position: 1 });
//! assert!(record.held_seats <= record.capacity);
//! ```

// Re-export commonly used types
pub use chrono::{DateTime, Utc};

pub mod catalog;
pub mod error;
pub mod event;
pub mod ids;
pub mod ledger;
pub mod registration;
pub mod store;
pub mod version;
pub mod waitlist;

/// Environment module - Dependency injection traits
///
/// All external dependencies are abstracted behind traits and injected
/// into the engine. The clock lives here because every transition is
/// stamped with "now" and every deadline is compared against it.
pub mod environment {
    use chrono::{DateTime, Utc};

    /// Clock trait - abstracts time operations for testability
    ///
    /// # Examples
    ///
    /// ```
    /// use rollcall_core::environment::{Clock, SystemClock};
    ///
    /// let clock = SystemClock;
    /// let earlier = clock.now();
    /// assert!(clock.now() >= earlier);
    /// ```
    pub trait Clock: Send + Sync {
        /// Get the current time
        fn now(&self) -> DateTime<Utc>;
    }

    /// Production clock backed by the system time.
    #[derive(Debug, Clone, Copy, Default)]
    pub struct SystemClock;

    impl Clock for SystemClock {
        fn now(&self) -> DateTime<Utc> {
            Utc::now()
        }
    }
}
