//! `PostgreSQL` backend for the Rollcall registration engine.
//!
//! - [`PgRegistrationStore`]: ledger and registration records, written in
//!   version-guarded transactions
//! - [`PgEventCatalog`]: read-only view of the event catalog
//! - [`PgOutboxPublisher`]: domain events appended to an outbox table
//!
//! All three share one connection pool. Queries are checked at runtime, so the
//! crate builds without a database.
//!
//! # Example
//!
//! ```ignore
//! use rollcall_postgres::{PgEventCatalog, PgOutboxPublisher, PgRegistrationStore};
//!
//! let store = PgRegistrationStore::connect("postgres://localhost/rollcall", 10).await?;
//! store.migrate().await?;
//!
//! let catalog = PgEventCatalog::new(store.pool().clone());
//! let outbox = PgOutboxPublisher::new(store.pool().clone());
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod rows;

pub mod catalog;
pub mod outbox;
pub mod store;

pub use catalog::PgEventCatalog;
pub use outbox::{OutboxEntry, PgOutboxPublisher};
pub use store::PgRegistrationStore;
