//! # Intake Runtime
//!
//! The Lifecycle Manager and the machinery around it.
//!
//! This crate turns the contracts of `intake-core` into a running engine:
//!
//! - **Lifecycle Manager**: the only mutation surface of submissions; token
//!   and expiry checks, state machine, triple-write
//! - **Listener fan-out**: bounded, ordered, failure-isolated
//! - **Keyed locks**: the per-submission critical section
//! - **Intake registry** and **schema validator**: default collaborators
//! - **In-memory backends** for both storage traits
//! - **Scheduler**: expiry, review escalation and event retention jobs
//! - **Metrics** and **health** reporting
//!
//! ## Example
//!
//! ```ignore
//! use intake_runtime::lifecycle::{CreateSubmission, LifecycleManager};
//!
//! let manager = LifecycleManager::builder(storage, event_store, registry)
//!     .listener(delivery_listener)
//!     .build()?;
//!
//! let created = manager
//!     .create(CreateSubmission::new("vendor-onboarding", Actor::agent("intake-bot")))
//!     .await?;
//! let token = created.mutation.resume_token;
//!
//! let updated = manager
//!     .set_fields(&created.mutation.submission_id, token.as_str(), actor, fields)
//!     .await?;
//! ```

/// Per-key async critical sections
pub mod locks;

/// Bounded listener fan-out
pub mod fanout;

/// In-process intake registry
pub mod registry;

/// Schema-driven field validation
pub mod validation;

/// The Lifecycle Manager
pub mod lifecycle;

/// In-memory storage backends
pub mod memory;

/// Background jobs
pub mod scheduler;

/// Prometheus metrics for observability
pub mod metrics;

/// Health reporting
pub mod health;

pub use fanout::{FanoutError, ListenerFanout};
pub use health::{HealthCheck, HealthReport, HealthStatus};
pub use lifecycle::{
    CreateOutcome, CreateSubmission, HandoffLink, LifecycleConfig, LifecycleManager,
    LifecycleManagerBuilder, Mutation, SetFieldsOutcome, SubmitOutcome, UploadConfirmOutcome,
    UploadRequestOutcome,
};
pub use memory::{InMemoryEventStore, InMemorySubmissionStore};
pub use registry::InMemoryIntakeRegistry;
pub use scheduler::{LifecycleScheduler, ScanReport, SchedulerConfig};
pub use validation::SchemaValidator;
