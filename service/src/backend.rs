//! Storage backend selection.

use crate::config::{BackendKind, ConfigError, StorageConfig};
use crate::error::BootstrapError;
use intake_core::event_store::EventStore;
use intake_core::submission_store::SubmissionStorage;
use intake_runtime::memory::{InMemoryEventStore, InMemorySubmissionStore};
use std::sync::Arc;

/// The two stores the Lifecycle Manager writes to, opened on one backend.
#[derive(Clone)]
pub struct Backends {
    /// Submission Store
    pub submissions: Arc<dyn SubmissionStorage>,
    /// Event Log
    pub events: Arc<dyn EventStore>,
}

impl std::fmt::Debug for Backends {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Backends").finish_non_exhaustive()
    }
}

/// Open (and migrate) the configured backend.
///
/// # Errors
///
/// - [`ConfigError::BackendUnavailable`] if the backend's cargo feature was
///   not enabled for this build
/// - `Storage` if the database cannot be reached or migrated
pub async fn open(config: &StorageConfig) -> Result<Backends, BootstrapError> {
    let backends = match config.backend {
        BackendKind::Memory => {
            tracing::warn!("Using in-memory storage; data is lost on restart");
            Backends {
                submissions: Arc::new(InMemorySubmissionStore::new()),
                events: Arc::new(InMemoryEventStore::new()),
            }
        }
        BackendKind::Sqlite => open_sqlite(config).await?,
        BackendKind::Postgres => open_postgres(config).await?,
    };
    tracing::info!(backend = %config.backend, "Storage backend ready");
    Ok(backends)
}

#[cfg(feature = "sqlite")]
async fn open_sqlite(config: &StorageConfig) -> Result<Backends, BootstrapError> {
    let pool = intake_sqlite::connect(&config.database_url, config.max_connections).await?;
    intake_sqlite::migrate(&pool).await?;
    Ok(Backends {
        submissions: Arc::new(intake_sqlite::SqliteSubmissionStore::from_pool(pool.clone())),
        events: Arc::new(intake_sqlite::SqliteEventStore::from_pool(pool)),
    })
}

#[cfg(not(feature = "sqlite"))]
#[allow(clippy::unused_async)]
async fn open_sqlite(_config: &StorageConfig) -> Result<Backends, BootstrapError> {
    Err(ConfigError::BackendUnavailable(BackendKind::Sqlite).into())
}

#[cfg(feature = "postgres")]
async fn open_postgres(config: &StorageConfig) -> Result<Backends, BootstrapError> {
    let pool = intake_postgres::connect(&config.database_url, config.max_connections).await?;
    intake_postgres::migrate(&pool).await?;
    Ok(Backends {
        submissions: Arc::new(intake_postgres::PostgresSubmissionStore::from_pool(pool.clone())),
        events: Arc::new(intake_postgres::PostgresEventStore::from_pool(pool)),
    })
}

#[cfg(not(feature = "postgres"))]
#[allow(clippy::unused_async)]
async fn open_postgres(_config: &StorageConfig) -> Result<Backends, BootstrapError> {
    Err(ConfigError::BackendUnavailable(BackendKind::Postgres).into())
}
