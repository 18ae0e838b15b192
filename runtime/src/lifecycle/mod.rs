//! The Lifecycle Manager: the only mutation surface of submissions.
//!
//! Every mutating operation follows the same shape:
//!
//! 1. take the per-submission critical section
//! 2. load the snapshot, check the resume token, check expiry
//! 3. ask the state machine whether the trigger is legal
//! 4. mutate the snapshot, rotate the token
//! 5. record exactly one event through the triple-write
//!
//! The triple-write appends the event to the snapshot's embedded list, then
//! concurrently hands it to the listener fan-out and appends it to the Event
//! Log, then saves the snapshot. The call succeeds only when all three
//! complete.

mod manager;
mod operations;
mod review;
mod uploads;

pub use manager::{LifecycleManager, LifecycleManagerBuilder};

use intake_core::actor::Actor;
use intake_core::collaborators::{FieldError, FieldMap, UploadTicket};
use intake_core::ids::{IntakeId, ResumeToken, SubmissionId, Version};
use intake_core::state_machine::SubmissionState;
use intake_core::submission::Submission;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Default base of handoff URLs.
pub const DEFAULT_HANDOFF_BASE_URL: &str = "http://localhost:3000/resume";

/// Lifecycle Manager settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LifecycleConfig {
    /// Base of handoff URLs; the URL is `{base}/{submission_id}?token={token}`.
    pub handoff_base_url: String,
    /// Maximum number of event listeners.
    pub max_listeners: usize,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            handoff_base_url: DEFAULT_HANDOFF_BASE_URL.to_string(),
            max_listeners: crate::fanout::DEFAULT_MAX_LISTENERS,
        }
    }
}

/// Input of [`LifecycleManager::create`].
#[derive(Debug, Clone)]
pub struct CreateSubmission {
    /// Intake to create the submission for.
    pub intake_id: IntakeId,
    /// Creator.
    pub actor: Actor,
    /// Makes the call idempotent.
    pub idempotency_key: Option<String>,
    /// Fields applied right after creation.
    pub initial_fields: Option<FieldMap>,
}

impl CreateSubmission {
    /// Create a submission of `intake_id` on behalf of `actor`.
    #[must_use]
    pub fn new(intake_id: impl Into<IntakeId>, actor: Actor) -> Self {
        Self {
            intake_id: intake_id.into(),
            actor,
            idempotency_key: None,
            initial_fields: None,
        }
    }

    /// Make the call idempotent on `(intake_id, key)`.
    #[must_use]
    pub fn with_idempotency_key(mut self, key: impl Into<String>) -> Self {
        self.idempotency_key = Some(key.into());
        self
    }

    /// Apply fields right after creation.
    #[must_use]
    pub fn with_fields(mut self, fields: FieldMap) -> Self {
        self.initial_fields = Some(fields);
        self
    }
}

/// Common result of a mutating call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Mutation {
    /// Submission id.
    pub submission_id: SubmissionId,
    /// State after the call.
    pub state: SubmissionState,
    /// Token for the next call.
    pub resume_token: ResumeToken,
    /// Version of the last recorded event.
    pub version: Version,
}

impl Mutation {
    pub(crate) fn of(submission: &Submission) -> Self {
        Self {
            submission_id: submission.id.clone(),
            state: submission.state,
            resume_token: submission.resume_token.clone(),
            version: submission.version(),
        }
    }
}

/// Result of [`LifecycleManager::create`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateOutcome {
    /// Submission after creation (and initial fields).
    pub mutation: Mutation,
    /// True when an earlier submission with the same idempotency key was returned.
    pub replayed: bool,
    /// Validation problems of the initial fields.
    pub field_errors: Vec<FieldError>,
}

/// Result of [`LifecycleManager::set_fields`].
#[derive(Debug, Clone, PartialEq)]
pub struct SetFieldsOutcome {
    /// Submission after the call.
    pub mutation: Mutation,
    /// All current field values.
    pub fields: FieldMap,
    /// Paths whose value changed.
    pub changed: Vec<String>,
    /// Validation problems of the changed fields.
    pub field_errors: Vec<FieldError>,
}

/// Result of [`LifecycleManager::submit`] and [`LifecycleManager::validate`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmitOutcome {
    /// Submission after the call.
    pub mutation: Mutation,
    /// Whether the fields passed validation (and, for submit, the state advanced).
    pub accepted: bool,
    /// True when an earlier submit with the same key was returned.
    pub replayed: bool,
    /// Validation problems.
    pub field_errors: Vec<FieldError>,
}

/// Result of [`LifecycleManager::request_upload`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadRequestOutcome {
    /// Submission after the call.
    pub mutation: Mutation,
    /// Where the client uploads the file.
    pub ticket: UploadTicket,
}

/// Result of [`LifecycleManager::confirm_upload`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadConfirmOutcome {
    /// Submission after the call.
    pub mutation: Mutation,
    /// Whether file storage confirmed the upload.
    pub verified: bool,
}

/// A handoff link.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HandoffLink {
    /// Submission id.
    pub submission_id: SubmissionId,
    /// URL embedding the current resume token.
    pub url: String,
    /// When the submission expires, if it has a TTL.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}
