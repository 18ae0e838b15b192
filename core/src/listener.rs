//! Event listener abstraction.
//!
//! Listeners observe every recorded event: analytics, the delivery
//! dispatcher, tests. They receive events through the fan-out of the
//! Lifecycle Manager and never see the Event Log itself.
//!
//! # Flow
//!
//! ```text
//! ┌─────────────────┐
//! │ Lifecycle call  │
//! └────────┬────────┘
//!          │
//!          ▼
//! ┌─────────────────┐
//! │ 1. Embed event  │
//! │  in snapshot    │
//! └────────┬────────┘
//!          │
//!     ┌────┴─────────────┐
//!     ▼                  ▼
//! ┌────────────┐  ┌──────────────┐
//! │ 2a. Event  │  │ 2b. Fan-out  │◄─── failures logged, never fatal
//! │    Log     │  │  listeners   │
//! └─────┬──────┘  └──────┬───────┘
//!       └────────┬───────┘
//!                ▼
//! ┌─────────────────┐
//! │ 3. Save snapshot│
//! └─────────────────┘
//! ```
//!
//! # Key Principles
//!
//! - **At-most-once per call**: a listener sees each recorded event once
//! - **Non-blocking failures**: a failing listener cannot abort a mutation
//! - **Bounded**: the fan-out accepts a configured maximum number of listeners

use crate::event::SubmissionEvent;
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// Errors a listener may report.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ListenerError {
    /// The listener could not process the event.
    #[error("Listener '{listener}' failed: {reason}")]
    Failed {
        /// Listener name.
        listener: String,
        /// What went wrong.
        reason: String,
    },

    /// The listener's downstream channel is closed.
    #[error("Listener '{0}' is closed")]
    Closed(String),
}

/// Receives every recorded lifecycle event.
///
/// # Dyn Compatibility
///
/// Explicit `Pin<Box<dyn Future>>` return so listeners can be stored as
/// `Arc<dyn EventListener>` in the fan-out.
pub trait EventListener: Send + Sync {
    /// Short name used in logs and metrics.
    fn name(&self) -> &str;

    /// Handle one event.
    ///
    /// # Errors
    ///
    /// Returns [`ListenerError`]; the fan-out logs it and moves on.
    fn on_event(
        &self,
        event: SubmissionEvent,
    ) -> Pin<Box<dyn Future<Output = Result<(), ListenerError>> + Send + '_>>;
}
