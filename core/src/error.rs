//! Error taxonomy of the lifecycle engine.
//!
//! Every failure of a Lifecycle Manager operation is a [`LifecycleError`]
//! with a stable snake_case [`code`](LifecycleError::code) suitable for API
//! responses. Validation problems are not errors: they come back as
//! [`FieldError`](crate::collaborators::FieldError) data.

use crate::collaborators::CollaboratorError;
use crate::event_store::EventStoreError;
use crate::ids::{EventId, IntakeId, SubmissionId, Version};
use crate::state_machine::{InvalidTransition, SubmissionState};
use crate::submission_store::StorageError;
use thiserror::Error;

/// Errors returned by Lifecycle Manager operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LifecycleError {
    /// The trigger is not legal from the current state.
    #[error("Invalid state transition: cannot apply '{trigger}' in state '{from}'")]
    InvalidStateTransition {
        /// Current state.
        from: SubmissionState,
        /// Attempted trigger.
        trigger: String,
    },

    /// The presented token is not the most recently issued one.
    #[error("Invalid or superseded resume token")]
    InvalidResumeToken,

    /// No submission with this id.
    #[error("Submission not found: {0}")]
    SubmissionNotFound(SubmissionId),

    /// The submission's TTL elapsed.
    #[error("Submission expired: {0}")]
    SubmissionExpired(SubmissionId),

    /// The Event Log already holds an event with this id.
    #[error("Duplicate event id: {0}")]
    DuplicateEventId(EventId),

    /// No intake definition with this id.
    #[error("Intake not found: {0}")]
    IntakeNotFound(IntakeId),

    /// The idempotency key belongs to a submission of another intake.
    #[error("Idempotency key '{key}' is already used by intake '{existing_intake}'")]
    IdempotencyConflict {
        /// The key.
        key: String,
        /// Intake of the submission that owns the key.
        existing_intake: IntakeId,
    },

    /// Submit was called without an idempotency key.
    #[error("Submit requires an idempotency key")]
    MissingIdempotencyKey,

    /// The actor may not review this submission.
    #[error("Actor '{actor}' is not authorized to review submission {submission_id}")]
    ReviewerNotAuthorized {
        /// Submission under review.
        submission_id: SubmissionId,
        /// Offending actor, as `kind:id`.
        actor: String,
    },

    /// The submission has no pending upload with this id.
    #[error("Upload '{upload_id}' not found on submission {submission_id}")]
    UploadNotFound {
        /// Submission id.
        submission_id: SubmissionId,
        /// Upload id.
        upload_id: String,
    },

    /// The Event Log moved past the snapshot; the submission needs reconciling.
    #[error("Concurrency conflict on {submission_id}: expected version {expected}, found {actual}")]
    ConcurrencyConflict {
        /// Submission id.
        submission_id: SubmissionId,
        /// Version of the snapshot.
        expected: Version,
        /// Version in the Event Log.
        actual: Version,
    },

    /// A storage backend failed.
    #[error("Storage error: {0}")]
    Storage(String),

    /// A collaborator failed.
    #[error(transparent)]
    Collaborator(#[from] CollaboratorError),
}

impl LifecycleError {
    /// Stable machine-readable code.
    ///
    /// # Examples
    ///
    /// ```
    /// use intake_core::error::LifecycleError;
    ///
    /// assert_eq!(LifecycleError::InvalidResumeToken.code(), "invalid_resume_token");
    /// ```
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::InvalidStateTransition { .. } => "invalid_state_transition",
            Self::InvalidResumeToken => "invalid_resume_token",
            Self::SubmissionNotFound(_) => "submission_not_found",
            Self::SubmissionExpired(_) => "submission_expired",
            Self::DuplicateEventId(_) => "duplicate_event_id",
            Self::IntakeNotFound(_) => "intake_not_found",
            Self::IdempotencyConflict { .. } => "idempotency_conflict",
            Self::MissingIdempotencyKey => "missing_idempotency_key",
            Self::ReviewerNotAuthorized { .. } => "reviewer_not_authorized",
            Self::UploadNotFound { .. } => "upload_not_found",
            Self::ConcurrencyConflict { .. } => "concurrency_conflict",
            Self::Storage(_) => "storage_error",
            Self::Collaborator(_) => "collaborator_error",
        }
    }
}

impl From<InvalidTransition> for LifecycleError {
    fn from(err: InvalidTransition) -> Self {
        Self::InvalidStateTransition {
            from: err.from,
            trigger: err.trigger.name().to_string(),
        }
    }
}

impl From<EventStoreError> for LifecycleError {
    fn from(err: EventStoreError) -> Self {
        match err {
            EventStoreError::DuplicateEventId(id) => Self::DuplicateEventId(id),
            EventStoreError::ConcurrencyConflict {
                submission_id,
                expected,
                actual,
            } => Self::ConcurrencyConflict {
                submission_id,
                expected,
                actual,
            },
            other => Self::Storage(other.to_string()),
        }
    }
}

impl From<StorageError> for LifecycleError {
    fn from(err: StorageError) -> Self {
        Self::Storage(err.to_string())
    }
}

/// Result alias for lifecycle operations.
pub type Result<T> = std::result::Result<T, LifecycleError>;
