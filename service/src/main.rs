//! Intake service binary.
//!
//! # Usage
//!
//! ```bash
//! STORAGE_BACKEND=sqlite INTAKES_PATH=intakes.json cargo run -p intake-service
//! ```

use anyhow::Context;
use intake_service::{telemetry, Config, Service};
use tokio::sync::watch;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file
    let _ = dotenvy::dotenv();

    let config = Config::from_env().context("invalid configuration")?;
    telemetry::init_tracing(&config.telemetry.log_level);

    tracing::info!(
        backend = %config.storage.backend,
        intakes = %config.lifecycle.intakes_path.display(),
        "Configuration loaded"
    );

    telemetry::init_metrics(config.telemetry.metrics_addr).context("metrics exporter")?;

    let service = Service::build(&config).await.context("startup failed")?;
    tracing::info!(delivery = service.delivers(), "Intake service running; press Ctrl+C to stop");

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let running = tokio::spawn(service.run(shutdown_rx));

    tokio::signal::ctrl_c().await.context("waiting for Ctrl+C")?;
    tracing::info!("Shutting down gracefully...");
    let _ = shutdown_tx.send(true);

    running.await.context("service task panicked")?;
    Ok(())
}
