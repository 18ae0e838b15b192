//! Startup errors.

use crate::config::ConfigError;
use intake_core::submission_store::StorageError;
use intake_runtime::metrics::MetricsError;
use intake_runtime::registry::RegistryError;
use intake_runtime::FanoutError;
use std::path::PathBuf;
use thiserror::Error;

/// Anything that stops the service from starting.
#[derive(Error, Debug)]
pub enum BootstrapError {
    /// Configuration is incomplete or malformed.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The storage backend could not be opened.
    #[error("Storage backend failed: {0}")]
    Storage(#[from] StorageError),

    /// The intake definitions file could not be read.
    #[error("Cannot read intake definitions from {path}: {source}")]
    Intakes {
        /// File that was read.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// The intake definitions file is malformed.
    #[error(transparent)]
    Registry(#[from] RegistryError),

    /// Listener registration failed.
    #[error(transparent)]
    Listeners(#[from] FanoutError),

    /// The metrics exporter could not be installed.
    #[error(transparent)]
    Metrics(#[from] MetricsError),
}
