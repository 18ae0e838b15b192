//! # Intake Service
//!
//! Runs the submission lifecycle engine as a process: configuration from the
//! environment, storage backend selection, outbound delivery and the
//! background jobs (expiry, escalation, event retention).
//!
//! Request handling is left to the embedding application, which drives the
//! [`LifecycleManager`](intake_runtime::LifecycleManager) returned by
//! [`Service::manager`].
//!
//! # Environment
//!
//! | Variable | Default |
//! |---|---|
//! | `STORAGE_BACKEND` | `sqlite` (`memory`, `sqlite`, `postgres`) |
//! | `DATABASE_URL` | `sqlite://intake.db`; required for `postgres` |
//! | `DATABASE_MAX_CONNECTIONS` | `10` |
//! | `INTAKES_PATH` | `intakes.json` |
//! | `HANDOFF_BASE_URL` | `http://localhost:3000/resume` |
//! | `DELIVERY_SIGNING_SECRET` | required when an intake has a destination |
//! | `DELIVERY_TIMEOUT_MS` | `10000` |
//! | `DELIVERY_QUEUE_SIZE` | `1024` |
//! | `DELIVERY_MAX_IN_FLIGHT` | `16` |
//! | `DELIVERY_CATCH_UP_INTERVAL_SECS` | `60` (`0` turns the sweep off) |
//! | `SCHEDULER_SCAN_INTERVAL_SECS` | `30` |
//! | `SCHEDULER_BATCH_SIZE` | `100` |
//! | `EVENT_RETENTION_DAYS` | unset (keep forever) |
//! | `METRICS_ENABLED`, `METRICS_HOST`, `METRICS_PORT` | `true`, `0.0.0.0`, `9090` |
//! | `LOG_LEVEL` | `info,intake=debug,sqlx=warn` (`RUST_LOG` wins) |

pub mod backend;
pub mod bootstrap;
pub mod config;
pub mod error;
pub mod telemetry;

pub use backend::Backends;
pub use bootstrap::{load_intakes, Service};
pub use config::{BackendKind, Config, ConfigError};
pub use error::BootstrapError;
