//! Embedded SQLite backends for the submission lifecycle engine.
//!
//! A single database file holds both the Event Log ([`SqliteEventStore`])
//! and the Submission Store ([`SqliteSubmissionStore`]). Suited to single
//! node deployments and local development; use `intake-postgres` when several
//! processes share the data.
//!
//! # Example
//!
//! ```ignore
//! use intake_sqlite::{connect, migrate, SqliteEventStore, SqliteSubmissionStore};
//!
//! async fn example() -> Result<(), Box<dyn std::error::Error>> {
//!     let pool = connect("sqlite://intake.db", 4).await?;
//!     migrate(&pool).await?;
//!     let events = SqliteEventStore::from_pool(pool.clone());
//!     let submissions = SqliteSubmissionStore::from_pool(pool);
//!     Ok(())
//! }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use chrono::{DateTime, Utc};
use intake_core::submission_store::StorageError;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use std::str::FromStr;
use std::time::Duration;

mod event_store;
mod submission_store;

pub use event_store::SqliteEventStore;
pub use submission_store::SqliteSubmissionStore;

/// How long a writer waits for the database lock before failing.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Open (creating if needed) a database file in WAL mode.
///
/// # Errors
///
/// Returns [`StorageError::DatabaseError`] if the URL is malformed or the file
/// cannot be opened.
pub async fn connect(database_url: &str, max_connections: u32) -> Result<SqlitePool, StorageError> {
    let options = SqliteConnectOptions::from_str(database_url)
        .map_err(|e| StorageError::DatabaseError(format!("Invalid database URL: {e}")))?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(BUSY_TIMEOUT);

    SqlitePoolOptions::new()
        .max_connections(max_connections)
        .connect_with(options)
        .await
        .map_err(|e| StorageError::DatabaseError(format!("Failed to connect: {e}")))
}

/// Open a private in-memory database, already migrated.
///
/// Every SQLite connection to `:memory:` sees its own database, so the pool
/// holds exactly one connection and never recycles it.
///
/// # Errors
///
/// Returns [`StorageError::DatabaseError`] if the database cannot be opened.
pub async fn connect_in_memory() -> Result<SqlitePool, StorageError> {
    let options = SqliteConnectOptions::from_str("sqlite::memory:")
        .map_err(|e| StorageError::DatabaseError(format!("Invalid database URL: {e}")))?;

    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect_with(options)
        .await
        .map_err(|e| StorageError::DatabaseError(format!("Failed to connect: {e}")))?;
    migrate(&pool).await?;
    Ok(pool)
}

/// Create or upgrade the tables of both stores.
///
/// # Errors
///
/// Returns [`StorageError::DatabaseError`] if a migration fails.
pub async fn migrate(pool: &SqlitePool) -> Result<(), StorageError> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .map_err(|e| StorageError::DatabaseError(format!("Migration failed: {e}")))
}

pub(crate) fn to_millis(at: DateTime<Utc>) -> i64 {
    at.timestamp_millis()
}

pub(crate) fn from_millis(ms: i64) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp_millis(ms)
}

pub(crate) fn to_i64(value: usize) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}
