//! Creation, field updates, submission and the handoff/delivery operations.

use super::{
    CreateOutcome, CreateSubmission, HandoffLink, LifecycleManager, Mutation, SetFieldsOutcome,
    SubmitOutcome,
};
use intake_core::actor::Actor;
use intake_core::collaborators::{FieldError, FieldMap};
use intake_core::delivery::DeliveryRecord;
use intake_core::error::{LifecycleError, Result};
use intake_core::event::EventType;
use intake_core::ids::{ResumeToken, SubmissionId};
use intake_core::state_machine::{transition, SubmissionState, Trigger};
use intake_core::submission::{SubmitReceipt, Submission};
use serde_json::{json, Map, Value};

impl LifecycleManager {
    /// Create a submission.
    ///
    /// With an idempotency key, a second call with the same
    /// `(intake_id, key)` returns the existing submission and records
    /// nothing. Initial fields are applied right after creation, using the
    /// freshly issued token.
    ///
    /// # Errors
    ///
    /// - `IntakeNotFound`: unknown intake
    /// - `IdempotencyConflict`: the key belongs to another intake
    /// - `Storage`: a backend failed
    #[tracing::instrument(skip(self, input), name = "lifecycle.create", fields(intake_id = %input.intake_id))]
    pub async fn create(&self, input: CreateSubmission) -> Result<CreateOutcome> {
        self.observed("create", self.create_inner(input)).await
    }

    async fn create_inner(&self, input: CreateSubmission) -> Result<CreateOutcome> {
        let CreateSubmission {
            intake_id,
            actor,
            idempotency_key,
            initial_fields,
        } = input;
        let idempotency_key = idempotency_key.filter(|key| !key.is_empty());

        let intake = self.intake(&intake_id).await?;

        // Serializes concurrent creates sharing a key.
        let _key_guard = match &idempotency_key {
            Some(key) => Some(self.lock_key(key).await),
            None => None,
        };

        if let Some(key) = &idempotency_key {
            if let Some(existing) = self.storage.get_by_idempotency_key(key.clone()).await? {
                if existing.intake_id != intake_id {
                    return Err(LifecycleError::IdempotencyConflict {
                        key: key.clone(),
                        existing_intake: existing.intake_id,
                    });
                }
                tracing::debug!(
                    submission_id = %existing.id,
                    "Returning existing submission for idempotency key"
                );
                return Ok(CreateOutcome {
                    mutation: Mutation::of(&existing),
                    replayed: true,
                    field_errors: Vec::new(),
                });
            }
        }

        let now = self.clock.now();
        let expires_at = intake.ttl().map(|ttl| now + ttl);
        let mut submission = Submission::new(
            self.ids.submission_id(),
            intake_id.clone(),
            self.ids.resume_token(),
            actor.clone(),
            now,
            expires_at,
            idempotency_key.clone(),
        );

        let payload = json!({
            "intakeId": intake_id,
            "intakeVersion": intake.version,
            "idempotencyKey": idempotency_key,
            "expiresAt": expires_at,
        });
        let mutation = {
            let _guard = self.lock(&submission.id).await;
            self.record(&mut submission, EventType::SubmissionCreated, &actor, Some(payload))
                .await?
        };
        metrics::counter!("submissions_created_total", "intake_id" => intake_id.to_string())
            .increment(1);

        match initial_fields {
            Some(fields) if !fields.is_empty() => {
                let updated = self
                    .set_fields_inner(&mutation.submission_id, mutation.resume_token.as_str(), actor, fields)
                    .await?;
                Ok(CreateOutcome {
                    mutation: updated.mutation,
                    replayed: false,
                    field_errors: updated.field_errors,
                })
            }
            _ => Ok(CreateOutcome {
                mutation,
                replayed: false,
                field_errors: Vec::new(),
            }),
        }
    }

    /// Write field values.
    ///
    /// Only paths whose value differs from the stored one count as changed;
    /// each changed path is attributed to `actor`. Validation problems of the
    /// changed paths come back as data.
    ///
    /// # Errors
    ///
    /// - `SubmissionNotFound`, `InvalidResumeToken`, `SubmissionExpired`
    /// - `InvalidStateTransition`: the submission does not accept field updates
    /// - `Storage`, `ConcurrencyConflict`: a backend failed or diverged
    #[tracing::instrument(skip(self, resume_token, actor, fields), name = "lifecycle.set_fields", fields(submission_id = %id))]
    pub async fn set_fields(
        &self,
        id: &SubmissionId,
        resume_token: &str,
        actor: Actor,
        fields: FieldMap,
    ) -> Result<SetFieldsOutcome> {
        self.observed("set_fields", self.set_fields_inner(id, resume_token, actor, fields))
            .await
    }

    async fn set_fields_inner(
        &self,
        id: &SubmissionId,
        resume_token: &str,
        actor: Actor,
        fields: FieldMap,
    ) -> Result<SetFieldsOutcome> {
        let _guard = self.lock(id).await;
        let mut submission = self.load(id).await?;
        self.authorize(&submission, resume_token)?;

        let changes: FieldMap = fields
            .into_iter()
            .filter(|(path, value)| submission.fields.get(path) != Some(value))
            .collect();
        let next = transition(
            submission.state,
            Trigger::FieldUpdate {
                changed: !changes.is_empty(),
            },
        )?;
        let intake = self.intake(&submission.intake_id).await?;

        for (path, value) in &changes {
            submission.fields.insert(path.clone(), value.clone());
            submission.field_attribution.insert(path.clone(), actor.clone());
        }
        submission.state = next;
        self.rotate_token(&mut submission);

        let changed: Vec<String> = changes.keys().cloned().collect();
        let field_errors: Vec<FieldError> = self
            .validator
            .validate(&submission.fields, &intake.schema)
            .errors
            .into_iter()
            .filter(|error| changes.contains_key(&error.path))
            .collect();

        let payload = json!({
            "changed": changed,
            "fields": changes,
        });
        let mutation = self
            .record(&mut submission, EventType::FieldUpdated, &actor, Some(payload))
            .await?;

        Ok(SetFieldsOutcome {
            mutation,
            fields: submission.fields,
            changed,
            field_errors,
        })
    }

    /// Validate all current fields without submitting.
    ///
    /// Records `validation.passed` or `validation.failed` and rotates the
    /// token; the state does not change.
    ///
    /// # Errors
    ///
    /// - `SubmissionNotFound`, `InvalidResumeToken`, `SubmissionExpired`
    /// - `InvalidStateTransition`: the submission is terminal
    #[tracing::instrument(skip(self, resume_token, actor), name = "lifecycle.validate", fields(submission_id = %id))]
    pub async fn validate(
        &self,
        id: &SubmissionId,
        resume_token: &str,
        actor: Actor,
    ) -> Result<SubmitOutcome> {
        self.observed("validate", async {
            let _guard = self.lock(id).await;
            let mut submission = self.load(id).await?;
            self.authorize(&submission, resume_token)?;
            Self::ensure_open(&submission, "validate")?;

            let intake = self.intake(&submission.intake_id).await?;
            let outcome = self.validator.validate(&submission.fields, &intake.schema);
            self.rotate_token(&mut submission);

            let (event_type, payload) = if outcome.valid {
                (EventType::ValidationPassed, None)
            } else {
                (
                    EventType::ValidationFailed,
                    Some(json!({ "errors": outcome.errors })),
                )
            };
            let mutation = self.record(&mut submission, event_type, &actor, payload).await?;

            Ok(SubmitOutcome {
                mutation,
                accepted: outcome.valid,
                replayed: false,
                field_errors: outcome.errors,
            })
        })
        .await
    }

    /// Submit the submission.
    ///
    /// The key makes the call idempotent: a key that was already accepted
    /// returns the earlier outcome, together with the current token, and
    /// records nothing. A replay must present the token the original call
    /// was made with, or the current one. Failing validation records `validation.failed`,
    /// returns the problems and leaves the state (and the key) untouched.
    /// Otherwise the submission moves to `needs_review` when the intake has
    /// approval gates, to `submitted` when it has none, and from `approved`
    /// to `finalized`.
    ///
    /// # Errors
    ///
    /// - `MissingIdempotencyKey`: empty key
    /// - `SubmissionNotFound`, `InvalidResumeToken`, `SubmissionExpired`
    /// - `InvalidStateTransition`: the submission cannot be submitted
    #[tracing::instrument(skip(self, resume_token, actor), name = "lifecycle.submit", fields(submission_id = %id))]
    pub async fn submit(
        &self,
        id: &SubmissionId,
        resume_token: &str,
        idempotency_key: &str,
        actor: Actor,
    ) -> Result<SubmitOutcome> {
        self.observed("submit", async {
            if idempotency_key.is_empty() {
                return Err(LifecycleError::MissingIdempotencyKey);
            }

            let _guard = self.lock(id).await;
            let mut submission = self.load(id).await?;

            if let Some(receipt) = submission.submit_receipt(idempotency_key) {
                if !receipt.admits(&submission.resume_token, resume_token) {
                    return Err(LifecycleError::InvalidResumeToken);
                }
                return Ok(SubmitOutcome {
                    mutation: Mutation {
                        submission_id: submission.id.clone(),
                        state: receipt.state,
                        resume_token: submission.resume_token.clone(),
                        version: receipt.version,
                    },
                    accepted: true,
                    replayed: true,
                    field_errors: Vec::new(),
                });
            }

            self.authorize(&submission, resume_token)?;
            let intake = self.intake(&submission.intake_id).await?;
            let next = transition(
                submission.state,
                Trigger::Submit {
                    has_approval_gates: intake.has_approval_gates(),
                },
            )?;

            let outcome = self.validator.validate(&submission.fields, &intake.schema);
            self.rotate_token(&mut submission);

            if !outcome.valid {
                let payload = json!({ "errors": outcome.errors });
                let mutation = self
                    .record(&mut submission, EventType::ValidationFailed, &actor, Some(payload))
                    .await?;
                return Ok(SubmitOutcome {
                    mutation,
                    accepted: false,
                    replayed: false,
                    field_errors: outcome.errors,
                });
            }

            let version = submission.version().next();
            submission.submit_receipts.push(SubmitReceipt {
                key: idempotency_key.to_string(),
                state: next,
                version,
                token_digest: ResumeToken::digest(resume_token),
            });
            submission.state = next;

            let (event_type, payload) = match next {
                SubmissionState::NeedsReview => {
                    submission.review_round += 1;
                    submission.escalated_at = None;
                    submission.review_comments.clear();
                    let gates: Vec<&str> =
                        intake.approval_gates.iter().map(|g| g.name.as_str()).collect();
                    (
                        EventType::ReviewRequested,
                        json!({
                            "idempotencyKey": idempotency_key,
                            "round": submission.review_round,
                            "gates": gates,
                        }),
                    )
                }
                SubmissionState::Finalized => (
                    EventType::SubmissionFinalized,
                    json!({ "idempotencyKey": idempotency_key }),
                ),
                _ => (
                    EventType::SubmissionSubmitted,
                    json!({ "idempotencyKey": idempotency_key }),
                ),
            };
            let mutation = self
                .record(&mut submission, event_type, &actor, Some(payload))
                .await?;

            Ok(SubmitOutcome {
                mutation,
                accepted: true,
                replayed: false,
                field_errors: Vec::new(),
            })
        })
        .await
    }

    /// Finalize a submitted (or approved) submission.
    ///
    /// # Errors
    ///
    /// - `SubmissionNotFound`, `InvalidResumeToken`, `SubmissionExpired`
    /// - `InvalidStateTransition`: the submission is neither submitted nor approved
    #[tracing::instrument(skip(self, resume_token, actor), name = "lifecycle.finalize", fields(submission_id = %id))]
    pub async fn finalize(&self, id: &SubmissionId, resume_token: &str, actor: Actor) -> Result<Mutation> {
        self.observed("finalize", async {
            let _guard = self.lock(id).await;
            let mut submission = self.load(id).await?;
            self.authorize(&submission, resume_token)?;

            submission.state = transition(submission.state, Trigger::Finalize)?;
            self.rotate_token(&mut submission);
            self.record(&mut submission, EventType::SubmissionFinalized, &actor, None)
                .await
        })
        .await
    }

    /// Cancel a submission.
    ///
    /// Needs no token: cancellation is an administrative action.
    ///
    /// # Errors
    ///
    /// - `SubmissionNotFound`
    /// - `SubmissionExpired`: the TTL already elapsed
    /// - `InvalidStateTransition`: the submission is terminal
    #[tracing::instrument(skip(self, actor, reason), name = "lifecycle.cancel", fields(submission_id = %id))]
    pub async fn cancel(
        &self,
        id: &SubmissionId,
        actor: Actor,
        reason: Option<String>,
    ) -> Result<Mutation> {
        self.observed("cancel", async {
            let _guard = self.lock(id).await;
            let mut submission = self.load(id).await?;
            self.ensure_not_expired(&submission)?;

            submission.state = transition(submission.state, Trigger::Cancel)?;
            self.rotate_token(&mut submission);
            self.discard_pending_uploads(&submission).await;

            let payload = reason.map(|reason| json!({ "reason": reason }));
            self.record(&mut submission, EventType::SubmissionCancelled, &actor, payload)
                .await
        })
        .await
    }

    /// Expire a submission on behalf of the expiry scanner.
    ///
    /// Returns `false`, recording nothing, when the submission is already
    /// terminal. Pending uploads are deleted from file storage.
    ///
    /// # Errors
    ///
    /// - `SubmissionNotFound`
    /// - `Storage`, `ConcurrencyConflict`: a backend failed or diverged
    #[tracing::instrument(skip(self), name = "lifecycle.expire", fields(submission_id = %id))]
    pub async fn expire(&self, id: &SubmissionId) -> Result<bool> {
        self.observed("expire", async {
            let _guard = self.lock(id).await;
            let mut submission = self.load(id).await?;
            if submission.is_terminal() {
                return Ok(false);
            }

            submission.state = transition(submission.state, Trigger::Expire)?;
            self.rotate_token(&mut submission);
            self.discard_pending_uploads(&submission).await;

            let payload = json!({ "expiresAt": submission.expires_at });
            let actor = Self::system_actor("expiry-scanner");
            self.record(&mut submission, EventType::SubmissionExpired, &actor, Some(payload))
                .await?;
            metrics::counter!("submissions_expired_total").increment(1);
            Ok(true)
        })
        .await
    }

    /// Issue a handoff URL embedding the current token.
    ///
    /// Records `handoff.link_issued`; the token is not rotated, so the URL
    /// stays valid until the next mutating call.
    ///
    /// # Errors
    ///
    /// - `SubmissionNotFound`, `InvalidResumeToken`, `SubmissionExpired`
    /// - `InvalidStateTransition`: the submission is terminal
    #[tracing::instrument(skip(self, resume_token, actor), name = "lifecycle.issue_handoff_url", fields(submission_id = %id))]
    pub async fn issue_handoff_url(
        &self,
        id: &SubmissionId,
        resume_token: &str,
        actor: Actor,
    ) -> Result<HandoffLink> {
        self.observed("issue_handoff_url", async {
            let _guard = self.lock(id).await;
            let mut submission = self.load(id).await?;
            self.authorize(&submission, resume_token)?;
            Self::ensure_open(&submission, "handoff")?;

            let url = format!(
                "{}/{}?token={}",
                self.config.handoff_base_url.trim_end_matches('/'),
                submission.id,
                submission.resume_token.as_str()
            );
            let payload = json!({ "expiresAt": submission.expires_at });
            self.record(&mut submission, EventType::HandoffLinkIssued, &actor, Some(payload))
                .await?;

            Ok(HandoffLink {
                submission_id: submission.id,
                url,
                expires_at: submission.expires_at,
            })
        })
        .await
    }

    /// Pick a submission up from a handoff token.
    ///
    /// Records `handoff.resumed` without rotating the token and returns the
    /// submission.
    ///
    /// # Errors
    ///
    /// - `InvalidResumeToken`: no submission carries this token
    /// - `SubmissionExpired`
    /// - `InvalidStateTransition`: the submission is terminal
    #[tracing::instrument(skip(self, resume_token, actor), name = "lifecycle.resume")]
    pub async fn resume(&self, resume_token: &str, actor: Actor) -> Result<Submission> {
        self.observed("resume", async {
            let found = self
                .storage
                .get_by_resume_token(resume_token.to_string())
                .await?
                .ok_or(LifecycleError::InvalidResumeToken)?;

            let _guard = self.lock(&found.id).await;
            let mut submission = self.load(&found.id).await?;
            self.authorize(&submission, resume_token)?;
            Self::ensure_open(&submission, "handoff")?;

            self.record(&mut submission, EventType::HandoffResumed, &actor, None)
                .await?;
            Ok(submission)
        })
        .await
    }

    /// Append a delivery attempt and record the matching `delivery.*` event.
    ///
    /// Fields, state and token are untouched, so this is allowed on
    /// terminal submissions.
    ///
    /// # Errors
    ///
    /// - `SubmissionNotFound`
    /// - `Storage`, `ConcurrencyConflict`: a backend failed or diverged
    #[tracing::instrument(skip(self, record), name = "lifecycle.record_delivery", fields(submission_id = %id, attempt = record.attempt))]
    pub async fn record_delivery(&self, id: &SubmissionId, record: DeliveryRecord) -> Result<Mutation> {
        self.observed("record_delivery", async {
            let _guard = self.lock(id).await;
            let mut submission = self.load(id).await?;

            let event_type = record.outcome.event_type();
            let mut payload = Map::new();
            payload.insert("attempt".to_string(), json!(record.attempt));
            payload.insert("retryable".to_string(), json!(record.retryable));
            if let Some(status) = record.status_code {
                payload.insert("statusCode".to_string(), json!(status));
            }
            if let Some(error) = &record.error {
                payload.insert("error".to_string(), json!(error));
            }
            if let Some(event_id) = &record.event_id {
                payload.insert("eventId".to_string(), json!(event_id));
            }
            submission.deliveries.push(record);

            let actor = Self::system_actor("delivery-worker");
            self.record(&mut submission, event_type, &actor, Some(Value::Object(payload)))
                .await
        })
        .await
    }

    async fn discard_pending_uploads(&self, submission: &Submission) {
        let Some(files) = self.files.as_ref() else {
            return;
        };
        for upload_id in submission.pending_upload_ids() {
            if let Err(error) = files.delete_upload(upload_id.clone()).await {
                tracing::warn!(
                    submission_id = %submission.id,
                    upload_id = %upload_id,
                    error = %error,
                    "Failed to delete pending upload"
                );
            }
        }
    }
}
