//! `PostgreSQL` backends for the submission lifecycle engine.
//!
//! This crate implements both storage contracts of `intake-core` on a shared
//! connection pool:
//!
//! - [`PostgresEventStore`]: the Event Log, with per-submission versions
//!   assigned inside the append transaction
//! - [`PostgresSubmissionStore`]: snapshots with unique idempotency keys and
//!   indexed token lookup
//!
//! # Example
//!
//! ```ignore
//! use intake_postgres::{connect, migrate, PostgresEventStore, PostgresSubmissionStore};
//!
//! async fn example() -> Result<(), Box<dyn std::error::Error>> {
//!     let pool = connect("postgres://localhost/intake", 10).await?;
//!     migrate(&pool).await?;
//!     let events = PostgresEventStore::from_pool(pool.clone());
//!     let submissions = PostgresSubmissionStore::from_pool(pool);
//!     Ok(())
//! }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use intake_core::submission_store::StorageError;
use sqlx::postgres::{PgPool, PgPoolOptions};

mod event_store;
mod submission_store;

pub use event_store::PostgresEventStore;
pub use submission_store::PostgresSubmissionStore;

/// Open a connection pool.
///
/// # Errors
///
/// Returns [`StorageError::DatabaseError`] if the database is unreachable.
pub async fn connect(database_url: &str, max_connections: u32) -> Result<PgPool, StorageError> {
    PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(database_url)
        .await
        .map_err(|e| StorageError::DatabaseError(format!("Failed to connect: {e}")))
}

/// Create or upgrade the tables of both stores.
///
/// # Errors
///
/// Returns [`StorageError::DatabaseError`] if a migration fails.
pub async fn migrate(pool: &PgPool) -> Result<(), StorageError> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .map_err(|e| StorageError::DatabaseError(format!("Migration failed: {e}")))
}
