//! Event listeners for tests.

use intake_core::event::{EventType, SubmissionEvent};
use intake_core::ids::SubmissionId;
use intake_core::listener::{EventListener, ListenerError};
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, PoisonError};

/// Captures every event it receives.
///
/// Clones share the same buffer.
#[derive(Clone, Default)]
pub struct RecordingListener {
    events: Arc<Mutex<Vec<SubmissionEvent>>>,
}

impl RecordingListener {
    /// Create an empty recorder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// All received events, in arrival order.
    #[must_use]
    pub fn events(&self) -> Vec<SubmissionEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Received events of one submission.
    #[must_use]
    pub fn events_for(&self, id: &SubmissionId) -> Vec<SubmissionEvent> {
        self.events()
            .into_iter()
            .filter(|e| e.submission_id == *id)
            .collect()
    }

    /// Types of all received events, in arrival order.
    #[must_use]
    pub fn types(&self) -> Vec<EventType> {
        self.events().iter().map(|e| e.event_type).collect()
    }

    /// Forget everything received so far.
    pub fn clear(&self) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

impl EventListener for RecordingListener {
    fn name(&self) -> &str {
        "recording"
    }

    fn on_event(
        &self,
        event: SubmissionEvent,
    ) -> Pin<Box<dyn Future<Output = Result<(), ListenerError>> + Send + '_>> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event);
        Box::pin(async { Ok(()) })
    }
}

/// Fails on every event.
#[derive(Clone, Copy, Debug, Default)]
pub struct FailingListener;

impl EventListener for FailingListener {
    fn name(&self) -> &str {
        "failing"
    }

    fn on_event(
        &self,
        _event: SubmissionEvent,
    ) -> Pin<Box<dyn Future<Output = Result<(), ListenerError>> + Send + '_>> {
        Box::pin(async {
            Err(ListenerError::Failed {
                listener: "failing".to_string(),
                reason: "always fails".to_string(),
            })
        })
    }
}
