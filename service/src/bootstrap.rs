//! Wiring of the Lifecycle Manager, delivery and background jobs.

use crate::backend::{self, Backends};
use crate::config::{Config, ConfigError};
use crate::error::BootstrapError;
use intake_delivery::{DeliveryDispatcher, DeliveryJob, DeliveryWorker, HttpTransport, Signer, Transport, UrlGuard};
use intake_runtime::lifecycle::{LifecycleConfig, LifecycleManager};
use intake_runtime::registry::InMemoryIntakeRegistry;
use intake_runtime::scheduler::{LifecycleScheduler, SchedulerConfig};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};

/// Read the intake definitions file.
///
/// # Errors
///
/// Returns `Intakes` if the file cannot be read and `Registry` if it is not
/// a JSON array of unique definitions.
pub fn load_intakes(path: &Path) -> Result<InMemoryIntakeRegistry, BootstrapError> {
    let json = std::fs::read_to_string(path).map_err(|source| BootstrapError::Intakes {
        path: path.to_path_buf(),
        source,
    })?;
    let registry = InMemoryIntakeRegistry::from_json(&json)?;
    tracing::info!(path = %path.display(), intakes = registry.len(), "Loaded intake definitions");
    Ok(registry)
}

struct Delivery {
    worker: Arc<DeliveryWorker>,
    jobs: mpsc::Receiver<DeliveryJob>,
}

/// A fully wired service, ready to [`run`](Self::run).
pub struct Service {
    manager: Arc<LifecycleManager>,
    delivery: Option<Delivery>,
    scheduler: LifecycleScheduler,
}

impl Service {
    /// Open the configured backend and wire every component.
    ///
    /// # Errors
    ///
    /// Returns [`BootstrapError`] if the intakes cannot be loaded, the backend
    /// cannot be opened, or delivery is needed but no signing secret is set.
    pub async fn build(config: &Config) -> Result<Self, BootstrapError> {
        let registry = load_intakes(&config.lifecycle.intakes_path)?;
        let backends = backend::open(&config.storage).await?;
        Self::assemble(
            config,
            registry,
            backends,
            Arc::new(HttpTransport::new(config.delivery.timeout)),
            UrlGuard::system(),
        )
    }

    /// Wire components over already opened backends.
    ///
    /// Delivery is only set up when some intake has a destination.
    ///
    /// # Errors
    ///
    /// - `Config(Missing("DELIVERY_SIGNING_SECRET"))` if delivery is needed
    ///   without a secret
    /// - `Listeners` if the dispatcher cannot be registered
    pub fn assemble(
        config: &Config,
        registry: InMemoryIntakeRegistry,
        backends: Backends,
        transport: Arc<dyn Transport>,
        guard: UrlGuard,
    ) -> Result<Self, BootstrapError> {
        let triggers = registry.delivery_triggers();

        let mut builder = LifecycleManager::builder(backends.submissions, backends.events, Arc::new(registry))
            .config(LifecycleConfig {
                handoff_base_url: config.lifecycle.handoff_base_url.clone(),
                ..LifecycleConfig::default()
            });

        let jobs = if triggers.is_empty() {
            tracing::info!("No intake has a destination; delivery disabled");
            None
        } else {
            if config.delivery.signing_secret.is_none() {
                return Err(ConfigError::Missing("DELIVERY_SIGNING_SECRET").into());
            }
            let (dispatcher, jobs) = DeliveryDispatcher::channel(triggers, config.delivery.queue_size);
            tracing::info!(triggers = ?dispatcher.triggers(), "Delivery enabled");
            builder = builder.listener(Arc::new(dispatcher));
            Some(jobs)
        };

        let manager = Arc::new(builder.build()?);

        let delivery = match (jobs, &config.delivery.signing_secret) {
            (Some(jobs), Some(secret)) => Some(Delivery {
                worker: Arc::new(
                    DeliveryWorker::new(manager.clone(), guard, transport, Signer::new(secret.as_str()))
                        .with_max_in_flight(config.delivery.max_in_flight)
                        .with_catch_up(config.delivery.catch_up_interval, config.scheduler.batch_size),
                ),
                jobs,
            }),
            _ => None,
        };

        let scheduler = LifecycleScheduler::new(
            manager.clone(),
            SchedulerConfig {
                scan_interval: config.scheduler.scan_interval,
                batch_size: config.scheduler.batch_size,
                event_retention: config.scheduler.event_retention,
            },
        );

        Ok(Self {
            manager,
            delivery,
            scheduler,
        })
    }

    /// The Lifecycle Manager, for embedding callers.
    #[must_use]
    pub const fn manager(&self) -> &Arc<LifecycleManager> {
        &self.manager
    }

    /// Whether outbound delivery is wired.
    #[must_use]
    pub const fn delivers(&self) -> bool {
        self.delivery.is_some()
    }

    /// Run the background jobs until `shutdown` flips to `true`.
    ///
    /// Deliveries still in flight at shutdown are abandoned; their earlier
    /// attempts stay recorded on the submission.
    pub async fn run(self, shutdown: watch::Receiver<bool>) {
        let worker = self.delivery.map(|delivery| {
            tokio::spawn(delivery.worker.run(delivery.jobs, shutdown.clone()))
        });

        self.scheduler.run(shutdown).await;

        if let Some(handle) = worker {
            if let Err(error) = handle.await {
                tracing::error!(error = %error, "Delivery worker task failed");
            }
        }
        tracing::info!("Service stopped");
    }
}
