//! `PostgreSQL` registration store.
//!
//! Every [`WriteSet`] runs inside one transaction. Updates carry a
//! `WHERE version = $expected` guard; an update that touches no row means the
//! record moved (or vanished) since it was read, and the whole transaction is
//! rolled back with [`StoreError::ConcurrencyConflict`]. Uniqueness is left to
//! the partial indexes created by the migrations, and a violation surfaces as
//! [`StoreError::Duplicate`].

use crate::rows::{
    CapacityRow, RegistrationRow, select_registrations, to_db_count, to_db_version,
};
use chrono::{DateTime, Utc};
use rollcall_core::ids::{EventId, IdempotencyKey, RegistrationId, UserId};
use rollcall_core::ledger::CapacityRecord;
use rollcall_core::registration::{Registration, RegistrationStatus};
use rollcall_core::store::{RecordWrite, RegistrationStore, StoreError, StoreFuture, WriteSet};
use rollcall_core::version::Version;
use rollcall_core::waitlist::{HEAD_POSITION, WaitlistCompaction};
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::{Postgres, Transaction};
use uuid::Uuid;

const SELECT_CAPACITY: &str = "SELECT event_id, capacity, held_seats, waitlist_count, version \
     FROM capacity_records WHERE event_id = $1";

/// Map a driver error, keeping unique-index violations distinguishable.
fn database(error: sqlx::Error) -> StoreError {
    match &error {
        sqlx::Error::Database(db) if db.is_unique_violation() => {
            StoreError::Duplicate(db.message().to_string())
        }
        _ => StoreError::Database(error.to_string()),
    }
}

fn decode_all(rows: Vec<RegistrationRow>) -> Result<Vec<Registration>, StoreError> {
    rows.into_iter().map(Registration::try_from).collect()
}

/// Registration store backed by `PostgreSQL`.
///
/// # Example
///
/// ```ignore
/// use rollcall_postgres::PgRegistrationStore;
///
/// let store = PgRegistrationStore::connect("postgres://localhost/rollcall", 10).await?;
/// store.migrate().await?;
/// ```
#[derive(Clone, Debug)]
pub struct PgRegistrationStore {
    pool: PgPool,
}

impl PgRegistrationStore {
    /// Create a store over an existing pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Open a pool of up to `max_connections` and wrap it.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the connection fails.
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .map_err(|e| StoreError::Database(format!("Failed to connect: {e}")))?;
        Ok(Self::new(pool))
    }

    /// Create or upgrade the ledger, registration, catalog and outbox tables.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if a migration fails.
    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| StoreError::Database(format!("Migration failed: {e}")))
    }

    /// The underlying connection pool.
    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn fetch_capacity(&self, event_id: EventId) -> Result<Option<CapacityRecord>, StoreError> {
        sqlx::query_as::<_, CapacityRow>(SELECT_CAPACITY)
            .bind(event_id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(database)?
            .map(CapacityRecord::try_from)
            .transpose()
    }

    async fn fetch_one_registration(
        &self,
        query: sqlx::query::QueryAs<'_, Postgres, RegistrationRow, sqlx::postgres::PgArguments>,
    ) -> Result<Option<Registration>, StoreError> {
        query
            .fetch_optional(&self.pool)
            .await
            .map_err(database)?
            .map(Registration::try_from)
            .transpose()
    }

    async fn commit_writes(&self, writes: WriteSet) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await.map_err(database)?;

        if let Some(write) = writes.capacity() {
            write_capacity(&mut tx, write).await?;
        }
        for write in writes.registrations() {
            write_registration(&mut tx, write).await?;
        }
        if let Some(compaction) = writes.compaction() {
            compact_waitlist(&mut tx, compaction).await?;
        }

        tx.commit().await.map_err(database)
    }
}

/// Build the conflict error for a guarded write that matched no row.
async fn conflict(
    tx: &mut Transaction<'_, Postgres>,
    entity: String,
    table_query: &'static str,
    id: &Uuid,
    expected: Version,
) -> StoreError {
    let actual = sqlx::query_scalar::<_, i64>(table_query)
        .bind(id)
        .fetch_optional(&mut **tx)
        .await
        .ok()
        .flatten()
        .and_then(|v| u64::try_from(v).ok())
        .map(Version::new);

    metrics::counter!("rollcall_store_conflicts_total").increment(1);
    tracing::debug!(entity = %entity, expected = %expected, actual = ?actual, "Guarded write lost");

    StoreError::ConcurrencyConflict {
        entity,
        expected,
        actual,
    }
}

async fn write_capacity(
    tx: &mut Transaction<'_, Postgres>,
    write: &RecordWrite<CapacityRecord>,
) -> Result<(), StoreError> {
    let record = write.record();
    let event_id = record.event_id.as_uuid();
    let capacity = to_db_count(record.capacity, "capacity")?;
    let held_seats = to_db_count(record.held_seats, "held_seats")?;
    let waitlist_count = to_db_count(record.waitlist_count, "waitlist_count")?;
    let version = to_db_version(record.version)?;

    let (affected, expected) = match write {
        RecordWrite::Insert(_) => {
            let result = sqlx::query(
                r"
                INSERT INTO capacity_records (event_id, capacity, held_seats, waitlist_count, version)
                VALUES ($1, $2, $3, $4, $5)
                ON CONFLICT (event_id) DO NOTHING
                ",
            )
            .bind(event_id)
            .bind(capacity)
            .bind(held_seats)
            .bind(waitlist_count)
            .bind(version)
            .execute(&mut **tx)
            .await
            .map_err(database)?;
            (result.rows_affected(), record.version)
        }
        RecordWrite::Update { expected, .. } => {
            let result = sqlx::query(
                r"
                UPDATE capacity_records
                SET capacity = $2, held_seats = $3, waitlist_count = $4,
                    version = $5, updated_at = now()
                WHERE event_id = $1 AND version = $6
                ",
            )
            .bind(event_id)
            .bind(capacity)
            .bind(held_seats)
            .bind(waitlist_count)
            .bind(version)
            .bind(to_db_version(*expected)?)
            .execute(&mut **tx)
            .await
            .map_err(database)?;
            (result.rows_affected(), *expected)
        }
    };

    if affected == 0 {
        return Err(conflict(
            tx,
            format!("capacity:{}", record.event_id),
            "SELECT version FROM capacity_records WHERE event_id = $1",
            event_id,
            expected,
        )
        .await);
    }
    Ok(())
}

async fn write_registration(
    tx: &mut Transaction<'_, Postgres>,
    write: &RecordWrite<Registration>,
) -> Result<(), StoreError> {
    let record = write.record();
    let position = record
        .waitlist_position
        .map(|p| to_db_count(p, "waitlist_position"))
        .transpose()?;
    let version = to_db_version(record.version)?;

    match write {
        RecordWrite::Insert(_) => {
            sqlx::query(
                r"
                INSERT INTO registrations (
                    id, event_id, user_id, status, waitlist_position, qr_code,
                    registered_at, attended_at, promotion_deadline, idempotency_key,
                    cancel_reason, updated_at, version
                ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
                ",
            )
            .bind(record.id.as_uuid())
            .bind(record.event_id.as_uuid())
            .bind(record.user_id.as_uuid())
            .bind(record.status.as_str())
            .bind(position)
            .bind(record.qr_code.as_str())
            .bind(record.registered_at)
            .bind(record.attended_at)
            .bind(record.promotion_deadline)
            .bind(record.idempotency_key.as_ref().map(IdempotencyKey::as_str))
            .bind(record.cancel_reason.map(|r| r.as_str()))
            .bind(record.updated_at)
            .bind(version)
            .execute(&mut **tx)
            .await
            .map_err(database)?;
            Ok(())
        }
        RecordWrite::Update { expected, .. } => {
            let result = sqlx::query(
                r"
                UPDATE registrations
                SET status = $2, waitlist_position = $3, attended_at = $4,
                    promotion_deadline = $5, cancel_reason = $6, updated_at = $7,
                    version = $8
                WHERE id = $1 AND version = $9
                ",
            )
            .bind(record.id.as_uuid())
            .bind(record.status.as_str())
            .bind(position)
            .bind(record.attended_at)
            .bind(record.promotion_deadline)
            .bind(record.cancel_reason.map(|r| r.as_str()))
            .bind(record.updated_at)
            .bind(version)
            .bind(to_db_version(*expected)?)
            .execute(&mut **tx)
            .await
            .map_err(database)?;

            if result.rows_affected() == 0 {
                return Err(conflict(
                    tx,
                    format!("registration:{}", record.id),
                    "SELECT version FROM registrations WHERE id = $1",
                    record.id.as_uuid(),
                    *expected,
                )
                .await);
            }
            Ok(())
        }
    }
}

async fn compact_waitlist(
    tx: &mut Transaction<'_, Postgres>,
    compaction: &WaitlistCompaction,
) -> Result<(), StoreError> {
    let shifted = sqlx::query(
        r"
        UPDATE registrations
        SET waitlist_position = waitlist_position - 1,
            version = version + 1,
            updated_at = now()
        WHERE event_id = $1 AND status = 'waitlisted' AND waitlist_position > $2
        ",
    )
    .bind(compaction.event_id.as_uuid())
    .bind(to_db_count(compaction.removed_position, "removed_position")?)
    .execute(&mut **tx)
    .await
    .map_err(database)?
    .rows_affected();

    tracing::trace!(
        event_id = %compaction.event_id,
        removed_position = compaction.removed_position,
        shifted,
        "Waitlist compacted"
    );
    Ok(())
}

impl RegistrationStore for PgRegistrationStore {
    fn load_capacity(&self, event_id: EventId) -> StoreFuture<'_, Option<CapacityRecord>> {
        Box::pin(self.fetch_capacity(event_id))
    }

    fn ensure_capacity(&self, record: CapacityRecord) -> StoreFuture<'_, CapacityRecord> {
        Box::pin(async move {
            sqlx::query(
                r"
                INSERT INTO capacity_records (event_id, capacity, held_seats, waitlist_count, version)
                VALUES ($1, $2, 0, 0, 0)
                ON CONFLICT (event_id) DO NOTHING
                ",
            )
            .bind(record.event_id.as_uuid())
            .bind(to_db_count(record.capacity, "capacity")?)
            .execute(&self.pool)
            .await
            .map_err(database)?;

            self.fetch_capacity(record.event_id).await?.ok_or_else(|| {
                StoreError::Database(format!("capacity record for {} vanished", record.event_id))
            })
        })
    }

    fn load_registration(&self, id: RegistrationId) -> StoreFuture<'_, Option<Registration>> {
        Box::pin(async move {
            self.fetch_one_registration(
                sqlx::query_as(select_registrations!("WHERE id = $1")).bind(*id.as_uuid()),
            )
            .await
        })
    }

    fn find_active_registration(
        &self,
        event_id: EventId,
        user_id: UserId,
    ) -> StoreFuture<'_, Option<Registration>> {
        Box::pin(async move {
            self.fetch_one_registration(
                sqlx::query_as(select_registrations!(
                    "WHERE event_id = $1 AND user_id = $2 AND status <> 'cancelled' LIMIT 1"
                ))
                .bind(*event_id.as_uuid())
                .bind(*user_id.as_uuid()),
            )
            .await
        })
    }

    fn find_by_idempotency_key(
        &self,
        event_id: EventId,
        user_id: UserId,
        key: IdempotencyKey,
    ) -> StoreFuture<'_, Option<Registration>> {
        Box::pin(async move {
            self.fetch_one_registration(
                sqlx::query_as(select_registrations!(
                    "WHERE event_id = $1 AND user_id = $2 AND idempotency_key = $3"
                ))
                .bind(*event_id.as_uuid())
                .bind(*user_id.as_uuid())
                .bind(key.as_str().to_string()),
            )
            .await
        })
    }

    fn waitlist(&self, event_id: EventId) -> StoreFuture<'_, Vec<Registration>> {
        Box::pin(async move {
            let rows: Vec<RegistrationRow> = sqlx::query_as(select_registrations!(
                "WHERE event_id = $1 AND status = 'waitlisted' ORDER BY waitlist_position"
            ))
            .bind(event_id.as_uuid())
            .fetch_all(&self.pool)
            .await
            .map_err(database)?;
            decode_all(rows)
        })
    }

    fn waitlist_head(&self, event_id: EventId) -> StoreFuture<'_, Option<Registration>> {
        Box::pin(async move {
            self.fetch_one_registration(
                sqlx::query_as(select_registrations!(
                    "WHERE event_id = $1 AND status = 'waitlisted' AND waitlist_position = $2"
                ))
                .bind(*event_id.as_uuid())
                .bind(to_db_count(HEAD_POSITION, "waitlist_position")?),
            )
            .await
        })
    }

    fn count_pending_offers(&self, event_id: EventId) -> StoreFuture<'_, u32> {
        Box::pin(async move {
            let count: i64 = sqlx::query_scalar(
                "SELECT COUNT(*) FROM registrations WHERE event_id = $1 AND status = $2",
            )
            .bind(event_id.as_uuid())
            .bind(RegistrationStatus::PromotionPending.as_str())
            .fetch_one(&self.pool)
            .await
            .map_err(database)?;

            u32::try_from(count)
                .map_err(|_| StoreError::Serialization(format!("pending offer count {count}")))
        })
    }

    fn expired_promotions(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> StoreFuture<'_, Vec<Registration>> {
        Box::pin(async move {
            let limit = i64::try_from(limit).unwrap_or(i64::MAX);
            let rows: Vec<RegistrationRow> = sqlx::query_as(select_registrations!(
                "WHERE status = 'promotion_pending' AND promotion_deadline < $1 \
                 ORDER BY promotion_deadline LIMIT $2"
            ))
            .bind(now)
            .bind(limit)
            .fetch_all(&self.pool)
            .await
            .map_err(database)?;
            decode_all(rows)
        })
    }

    fn registered_for_event(&self, event_id: EventId) -> StoreFuture<'_, Vec<Registration>> {
        Box::pin(async move {
            let rows: Vec<RegistrationRow> = sqlx::query_as(select_registrations!(
                "WHERE event_id = $1 AND status = 'registered' ORDER BY registered_at"
            ))
            .bind(event_id.as_uuid())
            .fetch_all(&self.pool)
            .await
            .map_err(database)?;
            decode_all(rows)
        })
    }

    fn commit(&self, writes: WriteSet) -> StoreFuture<'_, ()> {
        Box::pin(self.commit_writes(writes))
    }
}
