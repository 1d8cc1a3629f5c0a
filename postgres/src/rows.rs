//! Row types and column conversions.

use chrono::{DateTime, Utc};
use rollcall_core::catalog::{CatalogError, CatalogEvent, EventStatus};
use rollcall_core::ids::{EventId, IdempotencyKey, QrCode, RegistrationId, UserId};
use rollcall_core::ledger::CapacityRecord;
use rollcall_core::registration::{CancelReason, Registration, RegistrationStatus};
use rollcall_core::store::StoreError;
use rollcall_core::version::Version;
use uuid::Uuid;

/// `SELECT` over every registration column, followed by `$tail`.
macro_rules! select_registrations {
    ($tail:literal) => {
        concat!(
            "SELECT id, event_id, user_id, status, waitlist_position, qr_code, ",
            "registered_at, attended_at, promotion_deadline, idempotency_key, ",
            "cancel_reason, updated_at, version FROM registrations ",
            $tail
        )
    };
}
pub(crate) use select_registrations;

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct CapacityRow {
    event_id: Uuid,
    capacity: i32,
    held_seats: i32,
    waitlist_count: i32,
    version: i64,
}

impl TryFrom<CapacityRow> for CapacityRecord {
    type Error = StoreError;

    fn try_from(row: CapacityRow) -> Result<Self, Self::Error> {
        Ok(Self {
            event_id: EventId::from_uuid(row.event_id),
            capacity: from_db_count(row.capacity, "capacity")?,
            held_seats: from_db_count(row.held_seats, "held_seats")?,
            waitlist_count: from_db_count(row.waitlist_count, "waitlist_count")?,
            version: from_db_version(row.version)?,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct RegistrationRow {
    id: Uuid,
    event_id: Uuid,
    user_id: Uuid,
    status: String,
    waitlist_position: Option<i32>,
    qr_code: String,
    registered_at: DateTime<Utc>,
    attended_at: Option<DateTime<Utc>>,
    promotion_deadline: Option<DateTime<Utc>>,
    idempotency_key: Option<String>,
    cancel_reason: Option<String>,
    updated_at: DateTime<Utc>,
    version: i64,
}

impl TryFrom<RegistrationRow> for Registration {
    type Error = StoreError;

    fn try_from(row: RegistrationRow) -> Result<Self, Self::Error> {
        let status = RegistrationStatus::parse(&row.status).map_err(StoreError::Serialization)?;
        let idempotency_key = row
            .idempotency_key
            .map(|key| key.parse::<IdempotencyKey>())
            .transpose()
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        let cancel_reason = row
            .cancel_reason
            .as_deref()
            .map(CancelReason::parse)
            .transpose()
            .map_err(StoreError::Serialization)?;

        Ok(Self {
            id: RegistrationId::from_uuid(row.id),
            event_id: EventId::from_uuid(row.event_id),
            user_id: UserId::from_uuid(row.user_id),
            status,
            waitlist_position: row
                .waitlist_position
                .map(|p| from_db_count(p, "waitlist_position"))
                .transpose()?,
            qr_code: QrCode::from_stored(row.qr_code),
            registered_at: row.registered_at,
            attended_at: row.attended_at,
            promotion_deadline: row.promotion_deadline,
            idempotency_key,
            cancel_reason,
            updated_at: row.updated_at,
            version: from_db_version(row.version)?,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct CatalogRow {
    event_id: Uuid,
    capacity: i32,
    start_time: DateTime<Utc>,
    end_time: DateTime<Utc>,
    status: String,
}

impl TryFrom<CatalogRow> for CatalogEvent {
    type Error = CatalogError;

    fn try_from(row: CatalogRow) -> Result<Self, Self::Error> {
        Ok(Self {
            event_id: EventId::from_uuid(row.event_id),
            capacity: u32::try_from(row.capacity)
                .map_err(|_| CatalogError::Decode(format!("negative capacity {}", row.capacity)))?,
            start_time: row.start_time,
            end_time: row.end_time,
            status: EventStatus::parse(&row.status)?,
        })
    }
}

pub(crate) fn from_db_count(value: i32, column: &str) -> Result<u32, StoreError> {
    u32::try_from(value)
        .map_err(|_| StoreError::Serialization(format!("{column} out of range: {value}")))
}

pub(crate) fn to_db_count(value: u32, column: &str) -> Result<i32, StoreError> {
    i32::try_from(value)
        .map_err(|_| StoreError::Serialization(format!("{column} out of range: {value}")))
}

pub(crate) fn from_db_version(value: i64) -> Result<Version, StoreError> {
    u64::try_from(value)
        .map(Version::new)
        .map_err(|_| StoreError::Serialization(format!("negative version {value}")))
}

pub(crate) fn to_db_version(version: Version) -> Result<i64, StoreError> {
    i64::try_from(version.value())
        .map_err(|_| StoreError::Serialization(format!("version out of range: {version}")))
}
