//! Identifiers and opaque tokens.
//!
//! Every identifier is a newtype so an `EventId` can never be passed where a
//! `RegistrationId` is expected.

use rand::Rng;
use rand::distributions::Alphanumeric;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

/// Unique identifier for an event (owned by the event catalog)
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EventId(Uuid);

impl EventId {
    /// Creates a new random `EventId`
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Create an `EventId` from a `Uuid`
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Get the inner UUID
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for EventId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier for a user (supplied by the identity provider)
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct UserId(Uuid);

impl UserId {
    /// Creates a new random `UserId`
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Create a `UserId` from a `Uuid`
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Get the inner UUID
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for UserId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier for a registration
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RegistrationId(Uuid);

impl RegistrationId {
    /// Creates a new random `RegistrationId`
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Create a `RegistrationId` from a `Uuid`
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Get the inner UUID
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for RegistrationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RegistrationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Maximum accepted length of an idempotency key.
pub const MAX_IDEMPOTENCY_KEY_LEN: usize = 128;

/// Error type for `IdempotencyKey` parsing.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Invalid idempotency key: {0}")]
pub struct ParseIdempotencyKeyError(String);

/// Caller-supplied token that makes `register_for_event` safe to repeat.
///
/// Keys are scoped to an (event, user) pair by the store, so two users picking
/// the same key never collide.
///
/// # Examples
///
/// ```
/// use rollcall_core::ids::IdempotencyKey;
///
/// let key: IdempotencyKey = "retry-7f3a".parse().unwrap();
/// assert_eq!(key.as_str(), "retry-7f3a");
/// assert!("".parse::<IdempotencyKey>().is_err());
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IdempotencyKey(String);

impl IdempotencyKey {
    /// Get the key as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for IdempotencyKey {
    type Err = ParseIdempotencyKeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.is_empty() {
            return Err(ParseIdempotencyKeyError(
                "key cannot be empty".to_string(),
            ));
        }
        let chars = trimmed.chars().count();
        if chars > MAX_IDEMPOTENCY_KEY_LEN {
            return Err(ParseIdempotencyKeyError(format!(
                "key is {chars} characters, maximum is {MAX_IDEMPOTENCY_KEY_LEN}"
            )));
        }
        Ok(Self(trimmed.to_string()))
    }
}

impl fmt::Display for IdempotencyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Length of generated check-in codes.
pub const QR_CODE_LEN: usize = 32;

/// Opaque check-in token, generated once when a registration is created.
///
/// The token is what a QR code encodes; the engine only ever compares it.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct QrCode(String);

impl QrCode {
    /// Generate a fresh random token.
    #[must_use]
    pub fn generate() -> Self {
        let token: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(QR_CODE_LEN)
            .map(char::from)
            .collect();
        Self(token)
    }

    /// Wrap a token loaded from storage.
    #[must_use]
    pub fn from_stored(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// Get the token as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Exact comparison against a presented code.
    ///
    /// Runs over the full length regardless of where the first mismatch is.
    #[must_use]
    pub fn matches(&self, presented: &str) -> bool {
        let stored = self.0.as_bytes();
        let presented = presented.as_bytes();
        if stored.len() != presented.len() {
            return false;
        }
        stored
            .iter()
            .zip(presented)
            .fold(0_u8, |acc, (a, b)| acc | (a ^ b))
            == 0
    }
}

// Codes are credentials; keep them out of logs.
impl fmt::Debug for QrCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("QrCode(<redacted>)")
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_unique() {
        assert_ne!(EventId::new(), EventId::new());
        assert_ne!(RegistrationId::new(), RegistrationId::new());
    }

    #[test]
    fn id_round_trips_through_uuid() {
        let uuid = Uuid::new_v4();
        assert_eq!(UserId::from_uuid(uuid).as_uuid(), &uuid);
        assert_eq!(format!("{}", EventId::from_uuid(uuid)), uuid.to_string());
    }

    #[test]
    fn idempotency_key_is_trimmed() {
        let key: IdempotencyKey = "  abc  ".parse().unwrap();
        assert_eq!(key.as_str(), "abc");
    }

    #[test]
    fn idempotency_key_rejects_oversized_input() {
        let long = "k".repeat(MAX_IDEMPOTENCY_KEY_LEN + 1);
        assert!(long.parse::<IdempotencyKey>().is_err());

        let max = "k".repeat(MAX_IDEMPOTENCY_KEY_LEN);
        assert!(max.parse::<IdempotencyKey>().is_ok());
    }

    #[test]
    fn idempotency_key_length_counts_characters_not_bytes() {
        let accented = "é".repeat(100);
        let key: IdempotencyKey = accented.parse().unwrap();
        assert_eq!(key.as_str().chars().count(), 100);

        let err = "é".repeat(MAX_IDEMPOTENCY_KEY_LEN + 1)
            .parse::<IdempotencyKey>()
            .unwrap_err();
        assert!(err.to_string().contains("129 characters"), "{err}");
    }

    #[test]
    fn generated_codes_are_distinct_and_sized() {
        let a = QrCode::generate();
        let b = QrCode::generate();
        assert_eq!(a.as_str().len(), QR_CODE_LEN);
        assert_ne!(a, b);
    }

    #[test]
    fn code_matching_is_exact() {
        let code = QrCode::from_stored("ABCdef123");
        assert!(code.matches("ABCdef123"));
        assert!(!code.matches("abcdef123"));
        assert!(!code.matches("ABCdef12"));
        assert!(!code.matches(""));
    }

    #[test]
    fn code_debug_is_redacted() {
        let code = QrCode::from_stored("secret");
        assert!(!format!("{code:?}").contains("secret"));
    }
}
