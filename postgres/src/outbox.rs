//! Post-commit outbox for registration domain events.
//!
//! The engine hands every event to [`PgOutboxPublisher::publish`] after the
//! state change has committed, and the append runs on the pool in its own
//! statement. A failed append is logged by the engine and not retried, so the
//! outbox can miss an event whose state change did commit; it never holds an
//! event whose state change rolled back. A dispatcher drains the table
//! with [`PgOutboxPublisher::pending`] and acknowledges delivered rows with
//! [`PgOutboxPublisher::mark_dispatched`]. Delivery is at-least-once: a row
//! read but not acknowledged is returned again.

use chrono::{DateTime, Utc};
use rollcall_core::event::{DomainEventPublisher, PublishError, PublishFuture, RegistrationEvent};
use rollcall_core::store::StoreError;
use sqlx::{PgPool, Row};

/// One undelivered outbox row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboxEntry {
    /// Monotonic row id, used to acknowledge delivery
    pub id: i64,
    /// The event
    pub event: RegistrationEvent,
    /// When the event was appended
    pub created_at: DateTime<Utc>,
}

/// Publisher writing to the `registration_outbox` table.
///
/// # Example
///
/// ```no_run
/// use rollcall_postgres::PgOutboxPublisher;
///
/// # async fn example(pool: sqlx::PgPool) -> Result<(), Box<dyn std::error::Error>> {
/// let outbox = PgOutboxPublisher::new(pool);
///
/// let batch = outbox.pending(100).await?;
/// // ... deliver ...
/// let ids: Vec<i64> = batch.iter().map(|entry| entry.id).collect();
/// outbox.mark_dispatched(&ids).await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Debug)]
pub struct PgOutboxPublisher {
    pool: PgPool,
}

impl PgOutboxPublisher {
    /// Create a publisher over an existing pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn append(&self, event: &RegistrationEvent) -> Result<i64, PublishError> {
        let data = event.to_bytes()?;
        let payload = event.to_json()?;
        let failed = |e: sqlx::Error| PublishError::PublishFailed {
            kind: event.kind().to_string(),
            reason: e.to_string(),
        };

        let (id,): (i64,) = sqlx::query_as(
            r"
            INSERT INTO registration_outbox (registration_id, event_id, event_type, event_data, payload)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING id
            ",
        )
        .bind(event.registration_id().as_uuid())
        .bind(event.event_id().as_uuid())
        .bind(event.kind())
        .bind(data)
        .bind(payload)
        .fetch_one(&self.pool)
        .await
        .map_err(failed)?;

        tracing::debug!(outbox_id = id, kind = event.kind(), "Event appended to outbox");
        Ok(id)
    }

    /// Oldest undelivered events, up to `limit`.
    ///
    /// # Errors
    ///
    /// - `Database`: the query failed
    /// - `Serialization`: a stored event could not be decoded
    pub async fn pending(&self, limit: usize) -> Result<Vec<OutboxEntry>, StoreError> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows = sqlx::query(
            r"
            SELECT id, event_data, created_at
            FROM registration_outbox
            WHERE dispatched_at IS NULL
            ORDER BY id ASC
            LIMIT $1
            ",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::Database(e.to_string()))?;

        rows.iter().map(Self::row_to_entry).collect()
    }

    /// Acknowledge delivered rows.
    ///
    /// Returns how many rows changed; already-acknowledged ids are ignored.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the update fails.
    pub async fn mark_dispatched(&self, ids: &[i64]) -> Result<u64, StoreError> {
        let updated = sqlx::query(
            r"
            UPDATE registration_outbox
            SET dispatched_at = now()
            WHERE id = ANY($1) AND dispatched_at IS NULL
            ",
        )
        .bind(ids)
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Database(e.to_string()))?
        .rows_affected();

        metrics::counter!("rollcall_outbox_dispatched_total").increment(updated);
        Ok(updated)
    }

    /// Number of undelivered rows, for health checks.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the query fails.
    pub async fn backlog(&self) -> Result<i64, StoreError> {
        sqlx::query_scalar("SELECT COUNT(*) FROM registration_outbox WHERE dispatched_at IS NULL")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| StoreError::Database(e.to_string()))
    }

    fn row_to_entry(row: &sqlx::postgres::PgRow) -> Result<OutboxEntry, StoreError> {
        let data: Vec<u8> = row.get("event_data");
        let event = RegistrationEvent::from_bytes(&data)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;

        Ok(OutboxEntry {
            id: row.get("id"),
            event,
            created_at: row.get("created_at"),
        })
    }
}

impl DomainEventPublisher for PgOutboxPublisher {
    fn publish(&self, event: &RegistrationEvent) -> PublishFuture<'_> {
        let event = event.clone();
        Box::pin(async move {
            self.append(&event).await?;
            Ok(())
        })
    }
}
