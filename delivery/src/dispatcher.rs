//! Fan-out listener that queues delivery jobs.
//!
//! The dispatcher runs inside the Lifecycle Manager's fan-out, so it must
//! return quickly: it only filters and enqueues. The worker on the other
//! end of the channel does the network work.

use intake_core::event::{EventType, SubmissionEvent};
use intake_core::ids::{EventId, SubmissionId};
use intake_core::listener::{EventListener, ListenerError};
use intake_runtime::metrics::DeliveryMetrics;
use std::collections::BTreeSet;
use std::future::Future;
use std::pin::Pin;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

/// Default capacity of the job queue.
pub const DEFAULT_QUEUE_SIZE: usize = 1024;

/// One event that may need delivering.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryJob {
    /// Submission to deliver.
    pub submission_id: SubmissionId,
    /// Triggering event.
    pub event_id: EventId,
    /// Triggering event type.
    pub event_type: EventType,
}

impl From<&SubmissionEvent> for DeliveryJob {
    fn from(event: &SubmissionEvent) -> Self {
        Self {
            submission_id: event.submission_id.clone(),
            event_id: event.event_id.clone(),
            event_type: event.event_type,
        }
    }
}

/// Queues jobs for events of the configured types.
pub struct DeliveryDispatcher {
    sender: mpsc::Sender<DeliveryJob>,
    triggers: BTreeSet<EventType>,
}

impl DeliveryDispatcher {
    /// Create a dispatcher and the receiving end for the worker.
    ///
    /// `triggers` is the union of event types any destination delivers on;
    /// the worker checks each job against its own intake's destination.
    /// `delivery.*` events are never queued, whatever `triggers` says.
    #[must_use]
    pub fn channel(
        triggers: impl IntoIterator<Item = EventType>,
        queue_size: usize,
    ) -> (Self, mpsc::Receiver<DeliveryJob>) {
        let (sender, receiver) = mpsc::channel(queue_size.max(1));
        let triggers = triggers
            .into_iter()
            .filter(|t| !is_delivery_event(*t))
            .collect();
        (Self { sender, triggers }, receiver)
    }

    /// Event types this dispatcher queues.
    #[must_use]
    pub const fn triggers(&self) -> &BTreeSet<EventType> {
        &self.triggers
    }

    fn enqueue(&self, event: &SubmissionEvent) -> Result<(), ListenerError> {
        if !self.triggers.contains(&event.event_type) {
            return Ok(());
        }

        let result = self.sender.try_send(DeliveryJob::from(event));
        DeliveryMetrics::record_queue_depth(self.sender.max_capacity() - self.sender.capacity());
        match result {
            Ok(()) => {
                tracing::debug!(
                    submission_id = %event.submission_id,
                    event_type = %event.event_type,
                    "Queued delivery"
                );
                Ok(())
            }
            Err(TrySendError::Full(job)) => Err(ListenerError::Failed {
                listener: self.name().to_string(),
                reason: format!("delivery queue full, dropped {}", job.event_id),
            }),
            Err(TrySendError::Closed(_)) => Err(ListenerError::Closed(self.name().to_string())),
        }
    }
}

pub(crate) const fn is_delivery_event(event_type: EventType) -> bool {
    matches!(
        event_type,
        EventType::DeliveryAttempted | EventType::DeliverySucceeded | EventType::DeliveryFailed
    )
}

impl EventListener for DeliveryDispatcher {
    fn name(&self) -> &str {
        "delivery-dispatcher"
    }

    fn on_event(
        &self,
        event: SubmissionEvent,
    ) -> Pin<Box<dyn Future<Output = Result<(), ListenerError>> + Send + '_>> {
        let result = self.enqueue(&event);
        Box::pin(async move { result })
    }
}

#[cfg(test)]
#[allow(clippy::expect_used)]
mod tests {
    use super::*;
    use intake_core::actor::Actor;
    use intake_core::ids::Version;
    use intake_core::state_machine::SubmissionState;
    use intake_testing::test_clock;
    use intake_core::environment::Clock;

    fn event(id: &str, event_type: EventType) -> SubmissionEvent {
        SubmissionEvent::new(
            EventId::new(id),
            event_type,
            SubmissionId::new("sub_1"),
            test_clock().now(),
            Actor::system("test"),
            SubmissionState::Finalized,
            Version::new(3),
        )
    }

    #[tokio::test]
    async fn queues_only_trigger_events() {
        let (dispatcher, mut jobs) = DeliveryDispatcher::channel([EventType::SubmissionFinalized], 8);

        dispatcher
            .on_event(event("evt_1", EventType::FieldUpdated))
            .await
            .expect("ignored");
        dispatcher
            .on_event(event("evt_2", EventType::SubmissionFinalized))
            .await
            .expect("queued");

        let job = jobs.recv().await.expect("job");
        assert_eq!(job.event_id, EventId::new("evt_2"));
        assert!(jobs.try_recv().is_err());
    }

    #[test]
    fn delivery_events_never_trigger() {
        let (dispatcher, _jobs) = DeliveryDispatcher::channel(
            [EventType::SubmissionFinalized, EventType::DeliveryFailed],
            8,
        );
        assert_eq!(dispatcher.triggers().len(), 1);
    }

    #[tokio::test]
    async fn full_queue_is_a_listener_failure() {
        let (dispatcher, _jobs) = DeliveryDispatcher::channel([EventType::SubmissionFinalized], 1);
        dispatcher
            .on_event(event("evt_1", EventType::SubmissionFinalized))
            .await
            .expect("first fits");
        let err = dispatcher
            .on_event(event("evt_2", EventType::SubmissionFinalized))
            .await
            .expect_err("queue full");
        assert!(matches!(err, ListenerError::Failed { .. }));
    }

    #[tokio::test]
    async fn closed_queue_is_reported() {
        let (dispatcher, jobs) = DeliveryDispatcher::channel([EventType::SubmissionFinalized], 1);
        drop(jobs);
        let err = dispatcher
            .on_event(event("evt_1", EventType::SubmissionFinalized))
            .await
            .expect_err("closed");
        assert_eq!(err, ListenerError::Closed("delivery-dispatcher".to_string()));
    }
}
