//! Logging and metrics setup for the binary.

use intake_runtime::metrics::{MetricsError, MetricsServer};
use std::net::SocketAddr;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Install the global tracing subscriber.
///
/// `RUST_LOG` wins over `default_filter` when set. Calling this twice is a
/// no-op.
pub fn init_tracing(default_filter: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| default_filter.into());

    if tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .try_init()
        .is_err()
    {
        tracing::debug!("Tracing subscriber already installed");
    }
}

/// Serve Prometheus metrics on `addr`, or only describe them when `None`.
///
/// # Errors
///
/// Returns [`MetricsError`] if the exporter cannot be installed or bound.
pub fn init_metrics(addr: Option<SocketAddr>) -> Result<(), MetricsError> {
    match addr {
        Some(addr) => MetricsServer::new(addr).serve(),
        None => {
            intake_runtime::metrics::register_metrics();
            tracing::info!("Metrics exporter disabled");
            Ok(())
        }
    }
}
