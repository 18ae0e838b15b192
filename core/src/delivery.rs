//! Delivery attempt records.
//!
//! The delivery worker reports every attempt back through the Lifecycle
//! Manager as a [`DeliveryRecord`]; the manager appends it to the submission
//! and records the matching `delivery.*` event.

use crate::event::EventType;
use crate::ids::EventId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Result of one delivery attempt.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryOutcome {
    /// The destination accepted the payload.
    Succeeded,
    /// The attempt failed and another attempt is scheduled.
    Retrying,
    /// The attempt failed and no further attempt will be made.
    Failed,
}

impl DeliveryOutcome {
    /// Whether no further attempt follows.
    #[must_use]
    pub const fn is_final(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }

    /// The event recorded for this outcome.
    #[must_use]
    pub const fn event_type(self) -> EventType {
        match self {
            Self::Succeeded => EventType::DeliverySucceeded,
            Self::Retrying => EventType::DeliveryAttempted,
            Self::Failed => EventType::DeliveryFailed,
        }
    }
}

/// One delivery attempt.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryRecord {
    /// When the attempt was made.
    pub attempted_at: DateTime<Utc>,
    /// What happened.
    pub outcome: DeliveryOutcome,
    /// HTTP status, when a response was received.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
    /// Failure reason.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// One-based attempt number.
    pub attempt: u32,
    /// Whether the failure was transient.
    pub retryable: bool,
    /// Event whose delivery this attempt belongs to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_id: Option<EventId>,
}

impl DeliveryRecord {
    /// A successful attempt.
    #[must_use]
    pub const fn succeeded(attempted_at: DateTime<Utc>, attempt: u32, status_code: u16) -> Self {
        Self {
            attempted_at,
            outcome: DeliveryOutcome::Succeeded,
            status_code: Some(status_code),
            error: None,
            attempt,
            retryable: false,
            event_id: None,
        }
    }

    /// A failed attempt.
    #[must_use]
    pub fn failed(
        attempted_at: DateTime<Utc>,
        attempt: u32,
        error: impl Into<String>,
        retryable: bool,
        will_retry: bool,
    ) -> Self {
        Self {
            attempted_at,
            outcome: if will_retry {
                DeliveryOutcome::Retrying
            } else {
                DeliveryOutcome::Failed
            },
            status_code: None,
            error: Some(error.into()),
            attempt,
            retryable,
            event_id: None,
        }
    }

    /// Tie the attempt to the event being delivered.
    #[must_use]
    pub fn for_event(mut self, event_id: EventId) -> Self {
        self.event_id = Some(event_id);
        self
    }

    /// Attach the HTTP status of a failed attempt.
    #[must_use]
    pub const fn with_status(mut self, status_code: u16) -> Self {
        self.status_code = Some(status_code);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outcome_maps_to_event_type() {
        let now = Utc::now();
        let retry = DeliveryRecord::failed(now, 1, "timeout", true, true);
        let exhausted = DeliveryRecord::failed(now, 5, "timeout", true, false);
        let ok = DeliveryRecord::succeeded(now, 2, 204);

        assert_eq!(retry.outcome.event_type(), EventType::DeliveryAttempted);
        assert_eq!(exhausted.outcome.event_type(), EventType::DeliveryFailed);
        assert_eq!(ok.outcome.event_type(), EventType::DeliverySucceeded);
        assert!(!retry.outcome.is_final());
        assert!(exhausted.outcome.is_final() && ok.outcome.is_final());
    }
}
