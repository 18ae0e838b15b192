//! Lifecycle events.
//!
//! Every successful mutation of a submission produces exactly one
//! [`SubmissionEvent`]. Events are immutable facts: they are appended to the
//! submission's embedded list, to the Event Log, and handed to listeners.
//!
//! Events serialize to the camelCase wire shape consumed by listeners and
//! webhook destinations:
//!
//! ```json
//! {
//!   "eventId": "evt_…",
//!   "type": "field.updated",
//!   "submissionId": "sub_…",
//!   "ts": "2026-01-01T00:00:00Z",
//!   "actor": { "kind": "agent", "id": "bot" },
//!   "state": "in_progress",
//!   "version": 2,
//!   "payload": { "changed": ["name"] }
//! }
//! ```

use crate::actor::Actor;
use crate::ids::{EventId, SubmissionId, Version};
use crate::state_machine::SubmissionState;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Closed set of event types.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum EventType {
    /// A submission was created.
    #[serde(rename = "submission.created")]
    SubmissionCreated,
    /// Fields were written.
    #[serde(rename = "field.updated")]
    FieldUpdated,
    /// Required-field validation passed on submit.
    #[serde(rename = "validation.passed")]
    ValidationPassed,
    /// Required-field validation failed on submit.
    #[serde(rename = "validation.failed")]
    ValidationFailed,
    /// An upload URL was issued.
    #[serde(rename = "upload.requested")]
    UploadRequested,
    /// An upload was verified.
    #[serde(rename = "upload.completed")]
    UploadCompleted,
    /// An upload could not be verified.
    #[serde(rename = "upload.failed")]
    UploadFailed,
    /// Submitted without approval gates.
    #[serde(rename = "submission.submitted")]
    SubmissionSubmitted,
    /// Submitted into review.
    #[serde(rename = "review.requested")]
    ReviewRequested,
    /// A reviewer approved.
    #[serde(rename = "review.approved")]
    ReviewApproved,
    /// A reviewer rejected.
    #[serde(rename = "review.rejected")]
    ReviewRejected,
    /// A reviewer asked for changes.
    #[serde(rename = "review.changes_requested")]
    ReviewChangesRequested,
    /// A review gate exceeded its escalation deadline.
    #[serde(rename = "review.escalated")]
    ReviewEscalated,
    /// The submission was finalized.
    #[serde(rename = "submission.finalized")]
    SubmissionFinalized,
    /// The submission was cancelled.
    #[serde(rename = "submission.cancelled")]
    SubmissionCancelled,
    /// The submission's TTL elapsed.
    #[serde(rename = "submission.expired")]
    SubmissionExpired,
    /// A handoff URL was issued.
    #[serde(rename = "handoff.link_issued")]
    HandoffLinkIssued,
    /// A handoff URL was opened.
    #[serde(rename = "handoff.resumed")]
    HandoffResumed,
    /// A delivery attempt failed and will be retried.
    #[serde(rename = "delivery.attempted")]
    DeliveryAttempted,
    /// A delivery attempt succeeded.
    #[serde(rename = "delivery.succeeded")]
    DeliverySucceeded,
    /// Delivery failed for good.
    #[serde(rename = "delivery.failed")]
    DeliveryFailed,
}

impl EventType {
    /// Every event type.
    pub const ALL: [Self; 21] = [
        Self::SubmissionCreated,
        Self::FieldUpdated,
        Self::ValidationPassed,
        Self::ValidationFailed,
        Self::UploadRequested,
        Self::UploadCompleted,
        Self::UploadFailed,
        Self::SubmissionSubmitted,
        Self::ReviewRequested,
        Self::ReviewApproved,
        Self::ReviewRejected,
        Self::ReviewChangesRequested,
        Self::ReviewEscalated,
        Self::SubmissionFinalized,
        Self::SubmissionCancelled,
        Self::SubmissionExpired,
        Self::HandoffLinkIssued,
        Self::HandoffResumed,
        Self::DeliveryAttempted,
        Self::DeliverySucceeded,
        Self::DeliveryFailed,
    ];

    /// Wire name, e.g. `"submission.created"`.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::SubmissionCreated => "submission.created",
            Self::FieldUpdated => "field.updated",
            Self::ValidationPassed => "validation.passed",
            Self::ValidationFailed => "validation.failed",
            Self::UploadRequested => "upload.requested",
            Self::UploadCompleted => "upload.completed",
            Self::UploadFailed => "upload.failed",
            Self::SubmissionSubmitted => "submission.submitted",
            Self::ReviewRequested => "review.requested",
            Self::ReviewApproved => "review.approved",
            Self::ReviewRejected => "review.rejected",
            Self::ReviewChangesRequested => "review.changes_requested",
            Self::ReviewEscalated => "review.escalated",
            Self::SubmissionFinalized => "submission.finalized",
            Self::SubmissionCancelled => "submission.cancelled",
            Self::SubmissionExpired => "submission.expired",
            Self::HandoffLinkIssued => "handoff.link_issued",
            Self::HandoffResumed => "handoff.resumed",
            Self::DeliveryAttempted => "delivery.attempted",
            Self::DeliverySucceeded => "delivery.succeeded",
            Self::DeliveryFailed => "delivery.failed",
        }
    }

    /// Parse a wire name.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.as_str() == s)
    }

    /// Whether this is one of the `delivery.*` events.
    #[must_use]
    pub const fn is_delivery(self) -> bool {
        matches!(
            self,
            Self::DeliveryAttempted | Self::DeliverySucceeded | Self::DeliveryFailed
        )
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An immutable lifecycle event.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmissionEvent {
    /// Globally unique id.
    pub event_id: EventId,
    /// Event type.
    #[serde(rename = "type")]
    pub event_type: EventType,
    /// The submission this event belongs to.
    pub submission_id: SubmissionId,
    /// When the event was recorded.
    pub ts: DateTime<Utc>,
    /// Who caused it.
    pub actor: Actor,
    /// Submission state after the event.
    pub state: SubmissionState,
    /// Position in the submission's event sequence, starting at 1.
    pub version: Version,
    /// Event-specific data.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
}

impl SubmissionEvent {
    /// Create an event without payload.
    #[must_use]
    pub const fn new(
        event_id: EventId,
        event_type: EventType,
        submission_id: SubmissionId,
        ts: DateTime<Utc>,
        actor: Actor,
        state: SubmissionState,
        version: Version,
    ) -> Self {
        Self {
            event_id,
            event_type,
            submission_id,
            ts,
            actor,
            state,
            version,
            payload: None,
        }
    }

    /// Attach a payload.
    #[must_use]
    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = Some(payload);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn wire_names_roundtrip() {
        for event_type in EventType::ALL {
            assert_eq!(EventType::parse(event_type.as_str()), Some(event_type));
        }
        assert_eq!(EventType::parse("submission.deleted"), None);
    }

    #[test]
    #[allow(clippy::expect_used)]
    fn serde_uses_wire_names() {
        let json = serde_json::to_value(EventType::ReviewChangesRequested).expect("serialize");
        assert_eq!(json, json!("review.changes_requested"));
    }

    #[test]
    #[allow(clippy::expect_used)]
    fn event_serializes_to_camel_case_wire_shape() {
        let ts = DateTime::parse_from_rfc3339("2026-01-01T00:00:00Z")
            .expect("valid timestamp")
            .with_timezone(&Utc);
        let event = SubmissionEvent::new(
            EventId::new("evt_1"),
            EventType::FieldUpdated,
            SubmissionId::new("sub_1"),
            ts,
            Actor::agent("bot"),
            SubmissionState::InProgress,
            Version::new(2),
        )
        .with_payload(json!({"changed": ["name"]}));

        let value = serde_json::to_value(&event).expect("serialize");
        assert_eq!(value["eventId"], "evt_1");
        assert_eq!(value["type"], "field.updated");
        assert_eq!(value["submissionId"], "sub_1");
        assert_eq!(value["state"], "in_progress");
        assert_eq!(value["version"], 2);
        assert_eq!(value["payload"]["changed"][0], "name");

        let back: SubmissionEvent = serde_json::from_value(value).expect("deserialize");
        assert_eq!(back, event);
    }

    #[test]
    fn delivery_events_are_grouped() {
        assert!(EventType::DeliveryFailed.is_delivery());
        assert!(!EventType::SubmissionFinalized.is_delivery());
    }
}
