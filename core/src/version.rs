//! Record versioning for optimistic concurrency control.
//!
//! Every capacity record and registration record carries a [`Version`]. A write
//! names the version it was computed from; the store applies it only if the
//! stored record is still at that version.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Record version number for optimistic concurrency control.
///
/// Versions start at 0 when a record is inserted and increment by 1 on every
/// successful conditional update:
///
/// - A writer reads a record at version `n`
/// - It submits the new state with expected version `n`
/// - The store persists it at version `n + 1`, or rejects the write if another
///   writer got there first
///
/// # Examples
///
/// ```
/// use rollcall_core::version::Version;
///
/// let v0 = Version::INITIAL;
/// let v1 = v0.next();
/// assert_eq!(v1, Version::new(1));
/// assert!(v0.is_initial());
/// ```
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Version(u64);

impl Version {
    /// The version of a freshly inserted record.
    pub const INITIAL: Self = Self(0);

    /// Create a new `Version` with the given value.
    #[must_use]
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    /// Get the version number.
    #[must_use]
    pub const fn value(self) -> u64 {
        self.0
    }

    /// Get the next version (current + 1).
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }

    /// Check if this is the initial version (0).
    #[must_use]
    pub const fn is_initial(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for Version {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl From<Version> for u64 {
    fn from(version: Version) -> Self {
        version.0
    }
}
