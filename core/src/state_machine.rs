//! The submission state machine.
//!
//! A pure function mapping `(current state, trigger)` to the next state or a
//! rejection. No I/O, no clock, no storage: the Lifecycle Manager asks this
//! module whether a change is legal before it records anything.
//!
//! ```text
//!             field update            upload completed
//!   draft ───────────────► in_progress ◄──────────── awaiting_upload
//!     ▲                        │                          ▲
//!     │ request changes        │ submit                   │ upload requested
//!     │                        ▼                          │ (any non-terminal)
//!  needs_review ◄──── (gates) ─┴─ (no gates) ──► submitted
//!     │  │                                          │
//!     │  └─ approve ─► approved ─ submit/finalize ──┴─► finalized
//!     └─ reject ─► rejected
//!
//!   any non-terminal ── cancel ──► cancelled
//!   any non-terminal ── ttl elapsed ──► expired
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Lifecycle state of a submission.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubmissionState {
    /// Created, nothing filled in yet (or returned for changes).
    Draft,
    /// At least one field has been set.
    InProgress,
    /// Waiting for a file upload to complete.
    AwaitingUpload,
    /// Submitted without review gates; waiting for finalization.
    Submitted,
    /// Waiting on approval gates.
    NeedsReview,
    /// All approval gates satisfied.
    Approved,
    /// Rejected by a reviewer (terminal).
    Rejected,
    /// Finalized and eligible for delivery (terminal).
    Finalized,
    /// Cancelled by an actor (terminal).
    Cancelled,
    /// TTL elapsed before completion (terminal).
    Expired,
}

impl SubmissionState {
    /// Every state, in lifecycle order.
    pub const ALL: [Self; 10] = [
        Self::Draft,
        Self::InProgress,
        Self::AwaitingUpload,
        Self::Submitted,
        Self::NeedsReview,
        Self::Approved,
        Self::Rejected,
        Self::Finalized,
        Self::Cancelled,
        Self::Expired,
    ];

    /// Terminal states have no outgoing transitions.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Rejected | Self::Finalized | Self::Cancelled | Self::Expired
        )
    }

    /// Wire representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::InProgress => "in_progress",
            Self::AwaitingUpload => "awaiting_upload",
            Self::Submitted => "submitted",
            Self::NeedsReview => "needs_review",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::Finalized => "finalized",
            Self::Cancelled => "cancelled",
            Self::Expired => "expired",
        }
    }

    /// Parse the wire representation.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|state| state.as_str() == s)
    }
}

impl fmt::Display for SubmissionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An action that may move a submission to another state.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Trigger {
    /// Fields were written; `changed` is false when every value was identical.
    FieldUpdate {
        /// Whether any field value actually changed.
        changed: bool,
    },
    /// A file upload URL was issued.
    UploadRequested,
    /// A pending upload was verified.
    UploadCompleted,
    /// The submitter asked for the submission to be processed.
    Submit {
        /// Whether the intake defines at least one approval gate.
        has_approval_gates: bool,
    },
    /// The submission is declared complete.
    Finalize,
    /// A reviewer approved.
    Approve {
        /// Whether every gate now has its required approvals.
        quorum_met: bool,
    },
    /// A reviewer rejected.
    Reject,
    /// A reviewer sent the submission back for changes.
    RequestChanges,
    /// An actor cancelled the submission.
    Cancel,
    /// The TTL elapsed.
    Expire,
}

impl Trigger {
    /// Stable name used in errors and logs.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::FieldUpdate { .. } => "field_update",
            Self::UploadRequested => "upload_requested",
            Self::UploadCompleted => "upload_completed",
            Self::Submit { .. } => "submit",
            Self::Finalize => "finalize",
            Self::Approve { .. } => "approve",
            Self::Reject => "reject",
            Self::RequestChanges => "request_changes",
            Self::Cancel => "cancel",
            Self::Expire => "expire",
        }
    }
}

impl fmt::Display for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Rejection of a trigger that is not legal from the current state.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("Invalid state transition: cannot apply '{trigger}' in state '{from}'")]
pub struct InvalidTransition {
    /// The state the submission was in.
    pub from: SubmissionState,
    /// The trigger that was attempted.
    pub trigger: Trigger,
}

/// Compute the state reached by applying `trigger` in state `from`.
///
/// # Errors
///
/// Returns [`InvalidTransition`] when `from` is terminal or the pair is not
/// in the transition table.
///
/// # Examples
///
/// ```
/// use intake_core::state_machine::{transition, SubmissionState, Trigger};
///
/// let next = transition(SubmissionState::Draft, Trigger::FieldUpdate { changed: true });
/// assert_eq!(next, Ok(SubmissionState::InProgress));
///
/// assert!(transition(SubmissionState::Finalized, Trigger::Cancel).is_err());
/// ```
pub fn transition(
    from: SubmissionState,
    trigger: Trigger,
) -> Result<SubmissionState, InvalidTransition> {
    use SubmissionState as S;

    let rejected = InvalidTransition { from, trigger };
    if from.is_terminal() {
        return Err(rejected);
    }

    let next = match (from, trigger) {
        (S::Draft, Trigger::FieldUpdate { changed: false }) => S::Draft,
        (S::Draft | S::InProgress, Trigger::FieldUpdate { .. }) => S::InProgress,

        (_, Trigger::UploadRequested) => S::AwaitingUpload,
        (S::AwaitingUpload, Trigger::UploadCompleted) => S::InProgress,

        (S::Approved, Trigger::Submit { .. }) => S::Finalized,
        (_, Trigger::Submit { has_approval_gates: true }) => S::NeedsReview,
        (_, Trigger::Submit { has_approval_gates: false }) => S::Submitted,

        (S::Submitted | S::Approved, Trigger::Finalize) => S::Finalized,

        (S::NeedsReview, Trigger::Approve { quorum_met: true }) => S::Approved,
        (S::NeedsReview, Trigger::Approve { quorum_met: false }) => S::NeedsReview,
        (S::NeedsReview, Trigger::Reject) => S::Rejected,
        (S::NeedsReview, Trigger::RequestChanges) => S::Draft,

        (_, Trigger::Cancel) => S::Cancelled,
        (_, Trigger::Expire) => S::Expired,

        _ => return Err(rejected),
    };

    Ok(next)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use SubmissionState as S;

    fn any_state() -> impl Strategy<Value = SubmissionState> {
        prop::sample::select(SubmissionState::ALL.to_vec())
    }

    fn any_trigger() -> impl Strategy<Value = Trigger> {
        prop_oneof![
            any::<bool>().prop_map(|changed| Trigger::FieldUpdate { changed }),
            Just(Trigger::UploadRequested),
            Just(Trigger::UploadCompleted),
            any::<bool>().prop_map(|has_approval_gates| Trigger::Submit { has_approval_gates }),
            Just(Trigger::Finalize),
            any::<bool>().prop_map(|quorum_met| Trigger::Approve { quorum_met }),
            Just(Trigger::Reject),
            Just(Trigger::RequestChanges),
            Just(Trigger::Cancel),
            Just(Trigger::Expire),
        ]
    }

    #[test]
    fn first_field_change_moves_draft_forward() {
        assert_eq!(
            transition(S::Draft, Trigger::FieldUpdate { changed: true }),
            Ok(S::InProgress)
        );
        assert_eq!(
            transition(S::Draft, Trigger::FieldUpdate { changed: false }),
            Ok(S::Draft)
        );
        assert_eq!(
            transition(S::InProgress, Trigger::FieldUpdate { changed: false }),
            Ok(S::InProgress)
        );
    }

    #[test]
    fn field_update_outside_editing_states_is_rejected() {
        for from in [S::AwaitingUpload, S::Submitted, S::NeedsReview, S::Approved] {
            assert!(transition(from, Trigger::FieldUpdate { changed: true }).is_err());
        }
    }

    #[test]
    fn submit_routes_on_approval_gates() {
        assert_eq!(
            transition(S::InProgress, Trigger::Submit { has_approval_gates: true }),
            Ok(S::NeedsReview)
        );
        assert_eq!(
            transition(S::InProgress, Trigger::Submit { has_approval_gates: false }),
            Ok(S::Submitted)
        );
        assert_eq!(
            transition(S::Approved, Trigger::Submit { has_approval_gates: true }),
            Ok(S::Finalized)
        );
    }

    #[test]
    fn review_outcomes() {
        assert_eq!(
            transition(S::NeedsReview, Trigger::Approve { quorum_met: true }),
            Ok(S::Approved)
        );
        assert_eq!(
            transition(S::NeedsReview, Trigger::Approve { quorum_met: false }),
            Ok(S::NeedsReview)
        );
        assert_eq!(transition(S::NeedsReview, Trigger::Reject), Ok(S::Rejected));
        assert_eq!(transition(S::NeedsReview, Trigger::RequestChanges), Ok(S::Draft));
        assert!(transition(S::InProgress, Trigger::Reject).is_err());
        assert!(transition(S::Approved, Trigger::Approve { quorum_met: true }).is_err());
    }

    #[test]
    fn finalize_only_after_submission_or_approval() {
        assert_eq!(transition(S::Submitted, Trigger::Finalize), Ok(S::Finalized));
        assert_eq!(transition(S::Approved, Trigger::Finalize), Ok(S::Finalized));
        assert!(transition(S::InProgress, Trigger::Finalize).is_err());
        assert!(transition(S::NeedsReview, Trigger::Finalize).is_err());
    }

    #[test]
    fn upload_completion_requires_pending_upload() {
        assert_eq!(transition(S::AwaitingUpload, Trigger::UploadCompleted), Ok(S::InProgress));
        assert!(transition(S::InProgress, Trigger::UploadCompleted).is_err());
    }

    #[test]
    #[allow(clippy::expect_used)]
    fn rejection_names_state_and_trigger() {
        let err = transition(S::Cancelled, Trigger::Finalize).expect_err("terminal state");
        assert_eq!(err.from, S::Cancelled);
        assert_eq!(err.trigger, Trigger::Finalize);
        let message = err.to_string();
        assert!(message.contains("cancelled"));
        assert!(message.contains("finalize"));
    }

    #[test]
    fn state_names_roundtrip() {
        for state in SubmissionState::ALL {
            assert_eq!(SubmissionState::parse(state.as_str()), Some(state));
        }
    }

    proptest! {
        #[test]
        fn terminal_states_reject_every_trigger(state in any_state(), trigger in any_trigger()) {
            if state.is_terminal() {
                prop_assert!(transition(state, trigger).is_err());
            }
        }

        #[test]
        fn cancel_and_expire_always_apply_to_live_submissions(state in any_state()) {
            if !state.is_terminal() {
                prop_assert_eq!(transition(state, Trigger::Cancel), Ok(S::Cancelled));
                prop_assert_eq!(transition(state, Trigger::Expire), Ok(S::Expired));
            }
        }

        #[test]
        fn upload_requests_apply_to_live_submissions(state in any_state()) {
            if !state.is_terminal() {
                prop_assert_eq!(transition(state, Trigger::UploadRequested), Ok(S::AwaitingUpload));
            }
        }
    }
}
