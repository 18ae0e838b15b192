//! The submission aggregate.
//!
//! A [`Submission`] is the mutable snapshot kept in the Submission Store. It
//! embeds its own ordered event list, so the snapshot alone answers "what
//! happened" as well as "what is the current state". Only the Lifecycle
//! Manager mutates submissions.

use crate::actor::Actor;
use crate::collaborators::FieldMap;
use crate::delivery::DeliveryRecord;
use crate::event::SubmissionEvent;
use crate::ids::{EventId, IntakeId, ResumeToken, SubmissionId, Version};
use crate::state_machine::SubmissionState;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// A reviewer's decision.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewOutcome {
    /// The reviewer approved.
    Approved,
    /// The reviewer rejected.
    Rejected,
    /// The reviewer sent the submission back.
    ChangesRequested,
}

/// A recorded review decision.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewDecision {
    /// Who decided.
    pub actor: Actor,
    /// What they decided.
    pub decision: ReviewOutcome,
    /// Gate the decision counts towards, for approvals.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gate: Option<String>,
    /// Free-form reasons.
    #[serde(default)]
    pub reasons: Vec<String>,
    /// Review round the decision belongs to.
    #[serde(default)]
    pub round: u32,
    /// When the decision was made.
    pub decided_at: DateTime<Utc>,
}

/// A reviewer comment attached to one field.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldComment {
    /// Field path.
    pub path: String,
    /// Comment text.
    pub comment: String,
}

impl FieldComment {
    /// Create a comment.
    #[must_use]
    pub fn new(path: impl Into<String>, comment: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            comment: comment.into(),
        }
    }
}

/// Status of a file upload.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UploadStatus {
    /// URL issued, file not verified yet.
    Pending,
    /// File verified and referenced from its field.
    Completed,
    /// Verification failed.
    Failed,
}

/// A file upload tracked by a submission.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadRecord {
    /// Storage-side upload id.
    pub upload_id: String,
    /// Field the file belongs to.
    pub field_path: String,
    /// Original file name.
    pub filename: String,
    /// Current status.
    pub status: UploadStatus,
    /// When the upload URL was issued.
    pub requested_at: DateTime<Utc>,
    /// When verification succeeded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

/// An accepted submit call, kept for idempotent replays.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitReceipt {
    /// Idempotency key supplied by the caller.
    pub key: String,
    /// State reached by the submit.
    pub state: SubmissionState,
    /// Version of the event the submit recorded.
    pub version: Version,
    /// Digest of the resume token the submit was made with.
    #[serde(default)]
    pub token_digest: String,
}

impl SubmitReceipt {
    /// Whether a replay presenting `token` comes from the original caller
    /// (the spent token) or from a holder of the current one.
    #[must_use]
    pub fn admits(&self, current: &ResumeToken, token: &str) -> bool {
        current.matches(token) || ResumeToken::matches_digest(&self.token_digest, token)
    }
}

/// The submission snapshot.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Submission {
    /// Submission id.
    pub id: SubmissionId,
    /// Intake the submission belongs to.
    pub intake_id: IntakeId,
    /// Current state.
    pub state: SubmissionState,
    /// Token required by the next mutating call.
    pub resume_token: ResumeToken,
    /// Field values by path.
    #[serde(default)]
    pub fields: FieldMap,
    /// Last writer of each field.
    #[serde(default)]
    pub field_attribution: BTreeMap<String, Actor>,
    /// Creator.
    pub created_by: Actor,
    /// Last actor to change the submission.
    pub updated_by: Actor,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Time of the last recorded event.
    pub updated_at: DateTime<Utc>,
    /// When the TTL elapses.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    /// Key of the create call.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub idempotency_key: Option<String>,
    /// Every event, in version order.
    #[serde(default)]
    pub events: Vec<SubmissionEvent>,
    /// Delivery attempts.
    #[serde(default)]
    pub deliveries: Vec<DeliveryRecord>,
    /// Review decisions.
    #[serde(default)]
    pub reviews: Vec<ReviewDecision>,
    /// Comments of the last request for changes.
    #[serde(default)]
    pub review_comments: Vec<FieldComment>,
    /// Current review round; incremented every time the submission enters review.
    #[serde(default)]
    pub review_round: u32,
    /// File uploads.
    #[serde(default)]
    pub uploads: Vec<UploadRecord>,
    /// Accepted submit calls.
    #[serde(default)]
    pub submit_receipts: Vec<SubmitReceipt>,
    /// When the current review round was escalated.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub escalated_at: Option<DateTime<Utc>>,
}

impl Submission {
    /// A fresh draft with no events.
    #[must_use]
    pub fn new(
        id: SubmissionId,
        intake_id: IntakeId,
        resume_token: ResumeToken,
        created_by: Actor,
        created_at: DateTime<Utc>,
        expires_at: Option<DateTime<Utc>>,
        idempotency_key: Option<String>,
    ) -> Self {
        Self {
            id,
            intake_id,
            state: SubmissionState::Draft,
            resume_token,
            fields: FieldMap::new(),
            field_attribution: BTreeMap::new(),
            updated_by: created_by.clone(),
            created_by,
            created_at,
            updated_at: created_at,
            expires_at,
            idempotency_key,
            events: Vec::new(),
            deliveries: Vec::new(),
            reviews: Vec::new(),
            review_comments: Vec::new(),
            review_round: 0,
            uploads: Vec::new(),
            submit_receipts: Vec::new(),
            escalated_at: None,
        }
    }

    /// Version of the last embedded event.
    #[must_use]
    pub fn version(&self) -> Version {
        self.events.last().map_or(Version::INITIAL, |e| e.version)
    }

    /// Whether the submission can no longer change.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    /// Whether the TTL has elapsed at `now`.
    #[must_use]
    pub fn ttl_elapsed(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }

    /// Look up a tracked upload.
    #[must_use]
    pub fn upload(&self, upload_id: &str) -> Option<&UploadRecord> {
        self.uploads.iter().find(|u| u.upload_id == upload_id)
    }

    /// Look up a tracked upload for modification.
    pub fn upload_mut(&mut self, upload_id: &str) -> Option<&mut UploadRecord> {
        self.uploads.iter_mut().find(|u| u.upload_id == upload_id)
    }

    /// Ids of uploads that were never completed.
    #[must_use]
    pub fn pending_upload_ids(&self) -> Vec<String> {
        self.uploads
            .iter()
            .filter(|u| u.status == UploadStatus::Pending)
            .map(|u| u.upload_id.clone())
            .collect()
    }

    /// Whether delivery of `event_id` succeeded or gave up for good.
    #[must_use]
    pub fn delivery_settled(&self, event_id: &EventId) -> bool {
        self.deliveries
            .iter()
            .any(|d| d.outcome.is_final() && d.event_id.as_ref() == Some(event_id))
    }

    /// Whether the snapshot contains the event `event_id`.
    #[must_use]
    pub fn has_event(&self, event_id: &EventId) -> bool {
        self.events.iter().any(|e| &e.event_id == event_id)
    }

    /// Receipt of an earlier accepted submit with this key.
    #[must_use]
    pub fn submit_receipt(&self, key: &str) -> Option<&SubmitReceipt> {
        self.submit_receipts.iter().find(|r| r.key == key)
    }

    /// Distinct actors who approved `gate` in the current review round.
    #[must_use]
    pub fn approvers_of(&self, gate: &str) -> BTreeSet<&str> {
        self.reviews
            .iter()
            .filter(|r| {
                r.round == self.review_round
                    && r.decision == ReviewOutcome::Approved
                    && r.gate.as_deref() == Some(gate)
            })
            .map(|r| r.actor.id.as_str())
            .collect()
    }

    /// When the current review round started.
    #[must_use]
    pub fn review_started_at(&self) -> Option<DateTime<Utc>> {
        if self.state != SubmissionState::NeedsReview {
            return None;
        }
        self.events
            .iter()
            .rev()
            .find(|e| e.event_type == crate::event::EventType::ReviewRequested)
            .map(|e| e.ts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::EventType;
    use crate::ids::EventId;

    fn draft() -> Submission {
        Submission::new(
            SubmissionId::new("sub_1"),
            IntakeId::new("kyc"),
            ResumeToken::new("rtok_1"),
            Actor::agent("bot"),
            Utc::now(),
            None,
            None,
        )
    }

    #[test]
    fn new_submission_is_an_empty_draft() {
        let submission = draft();
        assert_eq!(submission.state, SubmissionState::Draft);
        assert_eq!(submission.version(), Version::INITIAL);
        assert!(!submission.is_terminal());
        assert!(!submission.ttl_elapsed(Utc::now()));
    }

    #[test]
    fn version_tracks_last_event() {
        let mut submission = draft();
        submission.events.push(SubmissionEvent::new(
            EventId::new("evt_1"),
            EventType::SubmissionCreated,
            submission.id.clone(),
            Utc::now(),
            Actor::agent("bot"),
            SubmissionState::Draft,
            Version::new(1),
        ));
        assert_eq!(submission.version(), Version::new(1));
    }

    #[test]
    fn approvers_are_distinct_and_scoped_to_round() {
        let mut submission = draft();
        submission.review_round = 2;
        let decision = |id: &str, round: u32| ReviewDecision {
            actor: Actor::human(id),
            decision: ReviewOutcome::Approved,
            gate: Some("legal".to_string()),
            reasons: Vec::new(),
            round,
            decided_at: Utc::now(),
        };
        submission.reviews = vec![
            decision("alice", 1),
            decision("alice", 2),
            decision("alice", 2),
            decision("bob", 2),
        ];
        let approvers = submission.approvers_of("legal");
        assert_eq!(approvers.len(), 2);
        assert!(submission.approvers_of("finance").is_empty());
    }

    #[test]
    fn ttl_boundary_is_inclusive() {
        let mut submission = draft();
        let at = Utc::now();
        submission.expires_at = Some(at);
        assert!(submission.ttl_elapsed(at));
        assert!(!submission.ttl_elapsed(at - chrono::Duration::milliseconds(1)));
    }

    #[test]
    #[allow(clippy::expect_used)]
    fn snapshot_json_roundtrip_keeps_token() {
        let submission = draft();
        let json = serde_json::to_string(&submission).expect("serialize");
        assert!(json.contains("\"resumeToken\":\"rtok_1\""));
        let back: Submission = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back, submission);
    }
}
