//! Human review: approval gates, rejection, change requests and escalation.

use super::{LifecycleManager, Mutation};
use intake_core::actor::Actor;
use intake_core::error::{LifecycleError, Result};
use intake_core::event::EventType;
use intake_core::ids::SubmissionId;
use intake_core::intake::{IntakeDefinition, ReviewerSpec};
use intake_core::state_machine::{transition, InvalidTransition, SubmissionState, Trigger};
use intake_core::submission::{FieldComment, ReviewDecision, ReviewOutcome, Submission};
use serde_json::json;

impl LifecycleManager {
    /// Approve a submission under review.
    ///
    /// The approval counts towards the first gate the reviewer may approve
    /// that still lacks approvals and that they have not approved yet in
    /// this round. The submission becomes `approved` once every gate reached
    /// its required number of distinct approvers.
    ///
    /// # Errors
    ///
    /// - `SubmissionNotFound`, `SubmissionExpired`
    /// - `InvalidStateTransition`: the submission is not under review
    /// - `ReviewerNotAuthorized`: no open gate accepts this reviewer
    #[tracing::instrument(skip(self, actor, reasons), name = "lifecycle.approve", fields(submission_id = %id, reviewer = %actor))]
    pub async fn approve(&self, id: &SubmissionId, actor: Actor, reasons: Vec<String>) -> Result<Mutation> {
        self.observed("approve", async {
            let _guard = self.lock(id).await;
            let mut submission = self.load(id).await?;
            self.ensure_not_expired(&submission)?;
            ensure_in_review(&submission, Trigger::Approve { quorum_met: false })?;
            let intake = self.intake(&submission.intake_id).await?;

            let gate = if intake.has_approval_gates() {
                let gate = open_gate_for(&submission, &intake, &actor)
                    .ok_or_else(|| not_authorized(&submission, &actor))?;
                Some(gate)
            } else if ReviewerSpec::default().permits(&actor) {
                None
            } else {
                return Err(not_authorized(&submission, &actor));
            };

            submission.reviews.push(ReviewDecision {
                actor: actor.clone(),
                decision: ReviewOutcome::Approved,
                gate: gate.clone(),
                reasons: reasons.clone(),
                round: submission.review_round,
                decided_at: self.clock.now(),
            });
            let quorum_met = all_gates_satisfied(&submission, &intake);

            submission.state = transition(submission.state, Trigger::Approve { quorum_met })?;
            self.rotate_token(&mut submission);

            let payload = json!({
                "gate": gate,
                "round": submission.review_round,
                "quorumMet": quorum_met,
                "reasons": reasons,
            });
            self.record(&mut submission, EventType::ReviewApproved, &actor, Some(payload))
                .await
        })
        .await
    }

    /// Reject a submission under review. Rejection is terminal.
    ///
    /// # Errors
    ///
    /// - `SubmissionNotFound`, `SubmissionExpired`
    /// - `InvalidStateTransition`: the submission is not under review
    /// - `ReviewerNotAuthorized`: the actor reviews none of the gates
    #[tracing::instrument(skip(self, actor, reasons), name = "lifecycle.reject", fields(submission_id = %id, reviewer = %actor))]
    pub async fn reject(&self, id: &SubmissionId, actor: Actor, reasons: Vec<String>) -> Result<Mutation> {
        self.observed("reject", async {
            let _guard = self.lock(id).await;
            let mut submission = self.load(id).await?;
            self.ensure_not_expired(&submission)?;
            ensure_in_review(&submission, Trigger::Reject)?;
            let intake = self.intake(&submission.intake_id).await?;
            let gate = reviewing_gate(&submission, &intake, &actor)?;

            submission.reviews.push(ReviewDecision {
                actor: actor.clone(),
                decision: ReviewOutcome::Rejected,
                gate: gate.clone(),
                reasons: reasons.clone(),
                round: submission.review_round,
                decided_at: self.clock.now(),
            });
            submission.state = transition(submission.state, Trigger::Reject)?;
            self.rotate_token(&mut submission);

            let payload = json!({
                "gate": gate,
                "round": submission.review_round,
                "reasons": reasons,
            });
            self.record(&mut submission, EventType::ReviewRejected, &actor, Some(payload))
                .await
        })
        .await
    }

    /// Send a submission under review back to `draft` with field comments.
    ///
    /// # Errors
    ///
    /// - `SubmissionNotFound`, `SubmissionExpired`
    /// - `InvalidStateTransition`: the submission is not under review
    /// - `ReviewerNotAuthorized`: the actor reviews none of the gates
    #[tracing::instrument(skip(self, actor, reasons, comments), name = "lifecycle.request_changes", fields(submission_id = %id, reviewer = %actor))]
    pub async fn request_changes(
        &self,
        id: &SubmissionId,
        actor: Actor,
        reasons: Vec<String>,
        comments: Vec<FieldComment>,
    ) -> Result<Mutation> {
        self.observed("request_changes", async {
            let _guard = self.lock(id).await;
            let mut submission = self.load(id).await?;
            self.ensure_not_expired(&submission)?;
            ensure_in_review(&submission, Trigger::RequestChanges)?;
            let intake = self.intake(&submission.intake_id).await?;
            let gate = reviewing_gate(&submission, &intake, &actor)?;

            submission.reviews.push(ReviewDecision {
                actor: actor.clone(),
                decision: ReviewOutcome::ChangesRequested,
                gate,
                reasons: reasons.clone(),
                round: submission.review_round,
                decided_at: self.clock.now(),
            });
            submission.state = transition(submission.state, Trigger::RequestChanges)?;
            submission.review_comments = comments;
            self.rotate_token(&mut submission);

            let payload = json!({
                "round": submission.review_round,
                "reasons": reasons,
                "comments": submission.review_comments,
            });
            self.record(&mut submission, EventType::ReviewChangesRequested, &actor, Some(payload))
                .await
        })
        .await
    }

    /// Record `review.escalated` when a gate's escalation delay elapsed.
    ///
    /// Fires at most once per review round and only for gates that still
    /// lack approvals. Returns whether an event was recorded. The token is
    /// not rotated.
    ///
    /// # Errors
    ///
    /// - `SubmissionNotFound`
    /// - `Storage`, `ConcurrencyConflict`: a backend failed or diverged
    #[tracing::instrument(skip(self), name = "lifecycle.escalate", fields(submission_id = %id))]
    pub async fn escalate(&self, id: &SubmissionId) -> Result<bool> {
        self.observed("escalate", async {
            let _guard = self.lock(id).await;
            let mut submission = self.load(id).await?;
            if submission.state != SubmissionState::NeedsReview || submission.escalated_at.is_some() {
                return Ok(false);
            }
            let Some(started) = submission.review_started_at() else {
                return Ok(false);
            };
            let intake = self.intake(&submission.intake_id).await?;

            let now = self.clock.now();
            let overdue: Vec<String> = intake
                .approval_gates
                .iter()
                .filter(|gate| {
                    gate.escalate_after_ms.is_some_and(|ms| {
                        let delay = chrono::Duration::milliseconds(i64::try_from(ms).unwrap_or(i64::MAX));
                        started + delay <= now
                    }) && submission.approvers_of(&gate.name).len() < gate.required_approvals as usize
                })
                .map(|gate| gate.name.clone())
                .collect();
            if overdue.is_empty() {
                return Ok(false);
            }

            submission.escalated_at = Some(now);
            let payload = json!({
                "gates": overdue,
                "round": submission.review_round,
                "reviewStartedAt": started,
            });
            let actor = Self::system_actor("escalation-scanner");
            self.record(&mut submission, EventType::ReviewEscalated, &actor, Some(payload))
                .await?;
            metrics::counter!("reviews_escalated_total").increment(1);
            Ok(true)
        })
        .await
    }
}

fn ensure_in_review(submission: &Submission, trigger: Trigger) -> Result<()> {
    if submission.state == SubmissionState::NeedsReview {
        return Ok(());
    }
    Err(InvalidTransition {
        from: submission.state,
        trigger,
    }
    .into())
}

fn not_authorized(submission: &Submission, actor: &Actor) -> LifecycleError {
    LifecycleError::ReviewerNotAuthorized {
        submission_id: submission.id.clone(),
        actor: actor.to_string(),
    }
}

/// First gate `actor` may approve that still needs approvals from them.
fn open_gate_for(submission: &Submission, intake: &IntakeDefinition, actor: &Actor) -> Option<String> {
    intake
        .approval_gates
        .iter()
        .find(|gate| {
            let approvers = submission.approvers_of(&gate.name);
            gate.reviewers.permits(actor)
                && approvers.len() < gate.required_approvals as usize
                && !approvers.contains(actor.id.as_str())
        })
        .map(|gate| gate.name.clone())
}

/// Gate under which `actor` may reject or request changes.
fn reviewing_gate(
    submission: &Submission,
    intake: &IntakeDefinition,
    actor: &Actor,
) -> Result<Option<String>> {
    if !intake.has_approval_gates() {
        return if ReviewerSpec::default().permits(actor) {
            Ok(None)
        } else {
            Err(not_authorized(submission, actor))
        };
    }
    intake
        .approval_gates
        .iter()
        .find(|gate| gate.reviewers.permits(actor))
        .map(|gate| Some(gate.name.clone()))
        .ok_or_else(|| not_authorized(submission, actor))
}

fn all_gates_satisfied(submission: &Submission, intake: &IntakeDefinition) -> bool {
    intake
        .approval_gates
        .iter()
        .all(|gate| submission.approvers_of(&gate.name).len() >= gate.required_approvals as usize)
}
