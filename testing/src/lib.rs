//! # Rollcall Testing
//!
//! Testing utilities for the Rollcall registration engine.
//!
//! This crate provides:
//! - Deterministic clocks ([`FixedClock`], [`ManualClock`])
//! - An in-memory [`RegistrationStore`](rollcall_core::store::RegistrationStore)
//!   with the same conflict and uniqueness behaviour as the Postgres one
//! - A catalog and a recording publisher
//! - [`TestHarness`], wiring all of the above into a ready engine
//!
//! ## Example
//!
//! ```ignore
//! use rollcall_testing::TestHarness;
//!
//! #[tokio::test]
//! async fn cancellation_promotes_the_head() {
//!     let harness = TestHarness::new();
//!     let event = harness.publish_event(1);
//!
//!     let holder = harness.register(event.event_id).await.unwrap();
//!     let waiter = harness.register(event.event_id).await.unwrap();
//!     harness.engine.cancel_registration(holder.id).await.unwrap();
//!
//!     let waiter = harness.engine.get_registration(waiter.id).await.unwrap();
//!     assert_eq!(waiter.status, RegistrationStatus::PromotionPending);
//! }
//! ```

use chrono::{DateTime, Utc};
use rollcall_core::environment::Clock;

mod catalog_mocks;
mod harness;
mod store_mocks;

/// Mock implementations of environment traits.
pub mod mocks {
    use super::{Clock, DateTime, Utc};
    use chrono::TimeDelta;
    use std::sync::{Arc, Mutex, PoisonError};

    pub use crate::catalog_mocks::{RecordingPublisher, StaticCatalog};
    pub use crate::store_mocks::InMemoryRegistrationStore;

    /// Fixed clock for deterministic tests
    ///
    /// Always returns the same time, making tests reproducible.
    ///
    /// # Example
    ///
    /// ```
    /// use rollcall_testing::mocks::FixedClock;
    /// use rollcall_core::environment::Clock;
    /// use chrono::Utc;
    ///
    /// let clock = FixedClock::new(Utc::now());
    /// assert_eq!(clock.now(), clock.now());
    /// ```
    #[derive(Debug, Clone)]
    pub struct FixedClock {
        time: DateTime<Utc>,
    }

    impl FixedClock {
        /// Create a new fixed clock with the given time
        #[must_use]
        pub const fn new(time: DateTime<Utc>) -> Self {
            Self { time }
        }

        /// The fixed instant.
        #[must_use]
        pub const fn time(&self) -> DateTime<Utc> {
            self.time
        }
    }

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            self.time
        }
    }

    /// Clock that only moves when the test moves it.
    ///
    /// Clones share the same time, so a test can keep one handle and give
    /// another to the engine.
    ///
    /// # Example
    ///
    /// ```
    /// use chrono::{TimeDelta, Utc};
    /// use rollcall_core::environment::Clock;
    /// use rollcall_testing::mocks::ManualClock;
    ///
    /// let clock = ManualClock::starting_at(Utc::now());
    /// let before = clock.now();
    /// clock.advance(TimeDelta::hours(25));
    /// assert_eq!(clock.now() - before, TimeDelta::hours(25));
    /// ```
    #[derive(Debug, Clone)]
    pub struct ManualClock {
        time: Arc<Mutex<DateTime<Utc>>>,
    }

    impl ManualClock {
        /// Create a clock reading `time`.
        #[must_use]
        pub fn starting_at(time: DateTime<Utc>) -> Self {
            Self {
                time: Arc::new(Mutex::new(time)),
            }
        }

        /// Current reading.
        #[must_use]
        pub fn time(&self) -> DateTime<Utc> {
            *self.time.lock().unwrap_or_else(PoisonError::into_inner)
        }

        /// Jump to `time`.
        pub fn set(&self, time: DateTime<Utc>) {
            *self.time.lock().unwrap_or_else(PoisonError::into_inner) = time;
        }

        /// Move forward by `delta`.
        pub fn advance(&self, delta: TimeDelta) {
            let mut time = self.time.lock().unwrap_or_else(PoisonError::into_inner);
            *time += delta;
        }
    }

    impl Clock for ManualClock {
        fn now(&self) -> DateTime<Utc> {
            self.time()
        }
    }

    /// Create a default fixed clock for tests (2025-01-01 00:00:00 UTC)
    ///
    /// # Panics
    ///
    /// This function will panic if the hardcoded timestamp fails to parse,
    /// which should never happen in practice.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn test_clock() -> FixedClock {
        FixedClock::new(
            DateTime::parse_from_rfc3339("2025-01-01T00:00:00Z")
                .expect("hardcoded timestamp should always parse")
                .with_timezone(&Utc),
        )
    }
}

/// Property-based testing utilities.
///
/// Strategies for driving the engine with random operation sequences.
pub mod properties {
    use proptest::prelude::*;

    /// One step of a random engine workload.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum Step {
        /// Register a new user
        Register,
        /// Cancel the n-th known registration (modulo the count)
        Cancel(usize),
        /// Accept the n-th outstanding offer
        Accept(usize),
        /// Decline the n-th outstanding offer
        Decline(usize),
        /// Move the clock past every deadline and sweep
        ExpireAll,
    }

    /// Strategy for a single [`Step`], weighted towards registrations.
    pub fn step() -> impl Strategy<Value = Step> {
        prop_oneof![
            4 => Just(Step::Register),
            3 => any::<usize>().prop_map(Step::Cancel),
            2 => any::<usize>().prop_map(Step::Accept),
            2 => any::<usize>().prop_map(Step::Decline),
            1 => Just(Step::ExpireAll),
        ]
    }

    /// Strategy for a workload of up to `max_len` steps.
    pub fn workload(max_len: usize) -> impl Strategy<Value = Vec<Step>> {
        proptest::collection::vec(step(), 0..max_len)
    }
}

pub use harness::{TestHarness, fast_retry_policy, published_event};
pub use mocks::{
    FixedClock, InMemoryRegistrationStore, ManualClock, RecordingPublisher, StaticCatalog,
    test_clock,
};
