//! Configuration management for the intake service.
//!
//! Loads configuration from environment variables with sensible defaults.
//! Malformed values are reported instead of silently replaced.

use intake_delivery::dispatcher::DEFAULT_QUEUE_SIZE;
use intake_delivery::transport::DEFAULT_TIMEOUT;
use intake_delivery::worker::{DEFAULT_CATCH_UP_INTERVAL, DEFAULT_MAX_IN_FLIGHT};
use intake_runtime::lifecycle::DEFAULT_HANDOFF_BASE_URL;
use serde::{Deserialize, Serialize};
use std::env;
use std::fmt;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Configuration errors, all reported at startup.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// A required variable is not set.
    #[error("Missing configuration: {0}")]
    Missing(&'static str),

    /// A variable is set to something unusable.
    #[error("Invalid value for {key}: {value:?} ({reason})")]
    Invalid {
        /// Variable name.
        key: &'static str,
        /// Raw value.
        value: String,
        /// Why it was refused.
        reason: String,
    },

    /// The selected backend was not compiled into this binary.
    #[error("Storage backend '{0}' is not available in this build")]
    BackendUnavailable(BackendKind),
}

/// Which storage implementation backs both the Event Log and the
/// Submission Store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Process memory; nothing survives a restart.
    Memory,
    /// Embedded database file.
    Sqlite,
    /// Networked `PostgreSQL`.
    Postgres,
}

impl BackendKind {
    /// Lowercase name, as accepted by `STORAGE_BACKEND`.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Memory => "memory",
            Self::Sqlite => "sqlite",
            Self::Postgres => "postgres",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackendKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "memory" => Ok(Self::Memory),
            "sqlite" => Ok(Self::Sqlite),
            "postgres" | "postgresql" => Ok(Self::Postgres),
            other => Err(format!("expected memory, sqlite or postgres, got '{other}'")),
        }
    }
}

/// Storage configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Selected backend
    pub backend: BackendKind,
    /// Connection URL; unused by the memory backend
    pub database_url: String,
    /// Maximum number of connections in the pool
    pub max_connections: u32,
}

/// Lifecycle Manager configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LifecycleSettings {
    /// Base of handoff URLs
    pub handoff_base_url: String,
    /// JSON file holding the intake definitions
    pub intakes_path: PathBuf,
}

/// Outbound delivery configuration
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryConfig {
    /// HMAC secret for request signatures. Required once any intake has a
    /// destination.
    #[serde(skip_serializing)]
    pub signing_secret: Option<String>,
    /// Per-attempt timeout
    pub timeout: Duration,
    /// Pending deliveries held before new ones are refused
    pub queue_size: usize,
    /// Deliveries run concurrently
    pub max_in_flight: usize,
    /// Period of the sweep for undelivered events; `None` turns it off
    pub catch_up_interval: Option<Duration>,
}

impl fmt::Debug for DeliveryConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeliveryConfig")
            .field("signing_secret", &self.signing_secret.as_ref().map(|_| "<redacted>"))
            .field("timeout", &self.timeout)
            .field("queue_size", &self.queue_size)
            .field("max_in_flight", &self.max_in_flight)
            .field("catch_up_interval", &self.catch_up_interval)
            .finish()
    }
}

/// Background job configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulerSettings {
    /// Time between two scans
    pub scan_interval: Duration,
    /// Submissions handled per scan
    pub batch_size: usize,
    /// Events older than this are purged; `None` keeps them forever
    pub event_retention: Option<Duration>,
}

/// Observability configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TelemetryConfig {
    /// Log filter used when `RUST_LOG` is unset
    pub log_level: String,
    /// Prometheus scrape address; `None` disables the exporter
    pub metrics_addr: Option<SocketAddr>,
}

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    /// Storage backend
    pub storage: StorageConfig,
    /// Lifecycle Manager
    pub lifecycle: LifecycleSettings,
    /// Outbound delivery
    pub delivery: DeliveryConfig,
    /// Background jobs
    pub scheduler: SchedulerSettings,
    /// Logging and metrics
    pub telemetry: TelemetryConfig,
}

/// Reads and parses variables through a lookup function.
struct Vars<F> {
    lookup: F,
}

impl<F: Fn(&str) -> Option<String>> Vars<F> {
    fn raw(&self, key: &str) -> Option<String> {
        (self.lookup)(key).filter(|v| !v.trim().is_empty())
    }

    fn string(&self, key: &str, default: &str) -> String {
        self.raw(key).unwrap_or_else(|| default.to_string())
    }

    fn parsed<T>(&self, key: &'static str) -> Result<Option<T>, ConfigError>
    where
        T: FromStr,
        T::Err: fmt::Display,
    {
        self.raw(key)
            .map(|value| {
                value.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
                    key,
                    value: value.clone(),
                    reason: e.to_string(),
                })
            })
            .transpose()
    }

    fn parsed_or<T>(&self, key: &'static str, default: T) -> Result<T, ConfigError>
    where
        T: FromStr,
        T::Err: fmt::Display,
    {
        Ok(self.parsed(key)?.unwrap_or(default))
    }

    fn positive(&self, key: &'static str, default: u64) -> Result<u64, ConfigError> {
        let value = self.parsed_or(key, default)?;
        if value == 0 {
            return Err(ConfigError::Invalid {
                key,
                value: "0".to_string(),
                reason: "must be greater than zero".to_string(),
            });
        }
        Ok(value)
    }
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Call `dotenvy::dotenv()` first to pick up a `.env` file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if a value is malformed or a required one is
    /// missing.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if a value is malformed or a required one is
    /// missing.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let vars = Vars { lookup };

        let backend = vars.parsed_or("STORAGE_BACKEND", BackendKind::Sqlite)?;
        let database_url = match backend {
            BackendKind::Memory => String::new(),
            BackendKind::Sqlite => vars.string("DATABASE_URL", "sqlite://intake.db"),
            BackendKind::Postgres => vars.raw("DATABASE_URL").ok_or(ConfigError::Missing("DATABASE_URL"))?,
        };

        let max_connections = u32::try_from(vars.positive("DATABASE_MAX_CONNECTIONS", 10)?).map_err(|e| {
            ConfigError::Invalid {
                key: "DATABASE_MAX_CONNECTIONS",
                value: vars.string("DATABASE_MAX_CONNECTIONS", ""),
                reason: e.to_string(),
            }
        })?;

        let default_timeout_ms = u64::try_from(DEFAULT_TIMEOUT.as_millis()).unwrap_or(10_000);
        let retention_days: Option<u64> = vars.parsed("EVENT_RETENTION_DAYS")?;
        let catch_up_secs: u64 = vars.parsed_or("DELIVERY_CATCH_UP_INTERVAL_SECS", DEFAULT_CATCH_UP_INTERVAL.as_secs())?;

        let metrics_enabled = vars.parsed_or("METRICS_ENABLED", true)?;
        let metrics_addr = if metrics_enabled {
            let host = vars.string("METRICS_HOST", "0.0.0.0");
            let port: u16 = vars.parsed_or("METRICS_PORT", 9090)?;
            let raw = format!("{host}:{port}");
            Some(raw.parse().map_err(|e: std::net::AddrParseError| ConfigError::Invalid {
                key: "METRICS_HOST",
                value: host,
                reason: e.to_string(),
            })?)
        } else {
            None
        };

        Ok(Self {
            storage: StorageConfig {
                backend,
                database_url,
                max_connections,
            },
            lifecycle: LifecycleSettings {
                handoff_base_url: vars.string("HANDOFF_BASE_URL", DEFAULT_HANDOFF_BASE_URL),
                intakes_path: PathBuf::from(vars.string("INTAKES_PATH", "intakes.json")),
            },
            delivery: DeliveryConfig {
                signing_secret: vars.raw("DELIVERY_SIGNING_SECRET"),
                timeout: Duration::from_millis(vars.positive("DELIVERY_TIMEOUT_MS", default_timeout_ms)?),
                queue_size: vars.parsed_or("DELIVERY_QUEUE_SIZE", DEFAULT_QUEUE_SIZE)?.max(1),
                max_in_flight: vars.parsed_or("DELIVERY_MAX_IN_FLIGHT", DEFAULT_MAX_IN_FLIGHT)?.max(1),
                catch_up_interval: (catch_up_secs > 0).then(|| Duration::from_secs(catch_up_secs)),
            },
            scheduler: SchedulerSettings {
                scan_interval: Duration::from_secs(vars.positive("SCHEDULER_SCAN_INTERVAL_SECS", 30)?),
                batch_size: vars.parsed_or("SCHEDULER_BATCH_SIZE", 100_usize)?.max(1),
                event_retention: retention_days.map(|days| Duration::from_secs(days.saturating_mul(86_400))),
            },
            telemetry: TelemetryConfig {
                log_level: vars.string("LOG_LEVEL", "info,intake=debug,sqlx=warn"),
                metrics_addr,
            },
        })
    }
}
