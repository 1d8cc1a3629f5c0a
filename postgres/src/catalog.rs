//! Event catalog read from the `catalog_events` table.

use crate::rows::CatalogRow;
use chrono::{DateTime, Utc};
use rollcall_core::catalog::{CatalogError, CatalogEvent, CatalogFuture, EventCatalog};
use rollcall_core::ids::EventId;
use sqlx::PgPool;

/// Read-only catalog adapter.
///
/// The catalog service owns the table; this adapter never writes to it.
#[derive(Clone, Debug)]
pub struct PgEventCatalog {
    pool: PgPool,
}

impl PgEventCatalog {
    /// Create a catalog over an existing pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn unavailable(error: sqlx::Error) -> CatalogError {
    CatalogError::Unavailable(error.to_string())
}

impl EventCatalog for PgEventCatalog {
    fn event(&self, event_id: EventId) -> CatalogFuture<'_, Option<CatalogEvent>> {
        Box::pin(async move {
            sqlx::query_as::<_, CatalogRow>(
                r"
                SELECT event_id, capacity, start_time, end_time, status
                FROM catalog_events
                WHERE event_id = $1
                ",
            )
            .bind(event_id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(unavailable)?
            .map(CatalogEvent::try_from)
            .transpose()
        })
    }

    fn ended_between(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> CatalogFuture<'_, Vec<CatalogEvent>> {
        Box::pin(async move {
            sqlx::query_as::<_, CatalogRow>(
                r"
                SELECT event_id, capacity, start_time, end_time, status
                FROM catalog_events
                WHERE end_time >= $1 AND end_time < $2
                ORDER BY end_time
                ",
            )
            .bind(from)
            .bind(to)
            .fetch_all(&self.pool)
            .await
            .map_err(unavailable)?
            .into_iter()
            .map(CatalogEvent::try_from)
            .collect()
        })
    }
}
