//! Bounded, in-process listener fan-out.
//!
//! Every recorded event is handed to each registered listener in
//! registration order. A listener failure is logged and counted, never
//! propagated: the mutation that produced the event has already been
//! decided.

use intake_core::event::SubmissionEvent;
use intake_core::listener::EventListener;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Instant;
use thiserror::Error;

/// Default maximum number of listeners.
pub const DEFAULT_MAX_LISTENERS: usize = 16;

/// Errors raised while configuring the fan-out.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FanoutError {
    /// The listener limit is reached.
    #[error("Listener limit of {max} reached; cannot register '{listener}'")]
    TooManyListeners {
        /// Configured maximum.
        max: usize,
        /// Listener that was refused.
        listener: String,
    },
}

/// Explicit, bounded list of listeners.
pub struct ListenerFanout {
    listeners: RwLock<Vec<Arc<dyn EventListener>>>,
    max_listeners: usize,
}

impl ListenerFanout {
    /// Create an empty fan-out accepting at most `max_listeners` listeners.
    #[must_use]
    pub fn new(max_listeners: usize) -> Self {
        Self {
            listeners: RwLock::new(Vec::new()),
            max_listeners,
        }
    }

    /// Register a listener.
    ///
    /// # Errors
    ///
    /// Returns [`FanoutError::TooManyListeners`] when the limit is reached.
    pub fn register(&self, listener: Arc<dyn EventListener>) -> Result<(), FanoutError> {
        let mut listeners = self.listeners.write().unwrap_or_else(PoisonError::into_inner);
        if listeners.len() >= self.max_listeners {
            return Err(FanoutError::TooManyListeners {
                max: self.max_listeners,
                listener: listener.name().to_string(),
            });
        }
        tracing::debug!(listener = listener.name(), "Registered event listener");
        listeners.push(listener);
        Ok(())
    }

    /// Number of registered listeners.
    #[must_use]
    pub fn len(&self) -> usize {
        self.listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Whether no listener is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Hand `event` to every listener, sequentially.
    ///
    /// Returns the number of listeners that failed.
    pub async fn publish(&self, event: &SubmissionEvent) -> usize {
        let listeners: Vec<Arc<dyn EventListener>> = self
            .listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();

        let start = Instant::now();
        let mut failures = 0;
        for listener in listeners {
            if let Err(error) = listener.on_event(event.clone()).await {
                failures += 1;
                metrics::counter!("listener_failures_total", "listener" => listener.name().to_string())
                    .increment(1);
                tracing::warn!(
                    listener = listener.name(),
                    submission_id = %event.submission_id,
                    event_type = %event.event_type,
                    version = %event.version,
                    error = %error,
                    "Event listener failed"
                );
            }
        }
        metrics::histogram!("listener_fanout_duration_seconds").record(start.elapsed().as_secs_f64());
        failures
    }
}

impl Default for ListenerFanout {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_LISTENERS)
    }
}
