//! File uploads through the file-storage collaborator.

use super::{LifecycleManager, UploadConfirmOutcome, UploadRequestOutcome};
use intake_core::actor::Actor;
use intake_core::collaborators::FileDescriptor;
use intake_core::error::{LifecycleError, Result};
use intake_core::event::EventType;
use intake_core::ids::SubmissionId;
use intake_core::state_machine::{transition, SubmissionState, Trigger};
use intake_core::submission::{UploadRecord, UploadStatus};
use serde_json::json;

impl LifecycleManager {
    /// Obtain an upload URL for a file field.
    ///
    /// Moves the submission to `awaiting_upload` until the upload is
    /// confirmed.
    ///
    /// # Errors
    ///
    /// - `SubmissionNotFound`, `InvalidResumeToken`, `SubmissionExpired`
    /// - `InvalidStateTransition`: the submission is terminal
    /// - `Collaborator`: no file storage is configured, or it failed
    #[tracing::instrument(skip(self, resume_token, actor, file), name = "lifecycle.request_upload", fields(submission_id = %id, field_path = %field_path))]
    pub async fn request_upload(
        &self,
        id: &SubmissionId,
        resume_token: &str,
        actor: Actor,
        field_path: String,
        file: FileDescriptor,
    ) -> Result<UploadRequestOutcome> {
        self.observed("request_upload", async {
            let _guard = self.lock(id).await;
            let mut submission = self.load(id).await?;
            self.authorize(&submission, resume_token)?;
            let next = transition(submission.state, Trigger::UploadRequested)?;
            let files = self.files()?;

            let ticket = files
                .generate_upload_url(submission.id.clone(), field_path.clone(), file.clone())
                .await?;

            submission.uploads.push(UploadRecord {
                upload_id: ticket.upload_id.clone(),
                field_path: field_path.clone(),
                filename: file.filename.clone(),
                status: UploadStatus::Pending,
                requested_at: self.clock.now(),
                completed_at: None,
            });
            submission.state = next;
            self.rotate_token(&mut submission);

            let payload = json!({
                "uploadId": ticket.upload_id,
                "fieldPath": field_path,
                "filename": file.filename,
                "contentType": file.content_type,
                "sizeBytes": file.size_bytes,
            });
            let mutation = self
                .record(&mut submission, EventType::UploadRequested, &actor, Some(payload))
                .await?;

            Ok(UploadRequestOutcome { mutation, ticket })
        })
        .await
    }

    /// Confirm a pending upload.
    ///
    /// When file storage verifies the upload, the field is set to an upload
    /// reference (`{"uploadId", "filename"}`) attributed to `actor`, and the
    /// submission leaves `awaiting_upload` once no other upload is pending.
    /// Otherwise `upload.failed` is recorded and the state is unchanged.
    ///
    /// # Errors
    ///
    /// - `SubmissionNotFound`, `InvalidResumeToken`, `SubmissionExpired`
    /// - `UploadNotFound`: no pending upload with this id
    /// - `InvalidStateTransition`: the submission is terminal
    /// - `Collaborator`: no file storage is configured, or it failed
    #[tracing::instrument(skip(self, resume_token, actor), name = "lifecycle.confirm_upload", fields(submission_id = %id, upload_id = %upload_id))]
    pub async fn confirm_upload(
        &self,
        id: &SubmissionId,
        resume_token: &str,
        actor: Actor,
        upload_id: &str,
    ) -> Result<UploadConfirmOutcome> {
        self.observed("confirm_upload", async {
            let _guard = self.lock(id).await;
            let mut submission = self.load(id).await?;
            self.authorize(&submission, resume_token)?;
            Self::ensure_open(&submission, Trigger::UploadCompleted.name())?;

            let pending = submission
                .upload(upload_id)
                .filter(|upload| upload.status == UploadStatus::Pending)
                .cloned()
                .ok_or_else(|| LifecycleError::UploadNotFound {
                    submission_id: submission.id.clone(),
                    upload_id: upload_id.to_string(),
                })?;

            let verified = self.files()?.verify_upload(upload_id.to_string()).await?;
            let now = self.clock.now();

            let (event_type, payload) = if verified {
                let reference = json!({
                    "uploadId": pending.upload_id,
                    "filename": pending.filename,
                });
                if let Some(upload) = submission.upload_mut(upload_id) {
                    upload.status = UploadStatus::Completed;
                    upload.completed_at = Some(now);
                }
                submission
                    .fields
                    .insert(pending.field_path.clone(), reference.clone());
                submission
                    .field_attribution
                    .insert(pending.field_path.clone(), actor.clone());

                let all_arrived = submission.pending_upload_ids().is_empty();
                if submission.state == SubmissionState::AwaitingUpload && all_arrived {
                    submission.state = transition(submission.state, Trigger::UploadCompleted)?;
                }
                (
                    EventType::UploadCompleted,
                    json!({
                        "uploadId": pending.upload_id,
                        "fieldPath": pending.field_path,
                        "fields": { pending.field_path.clone(): reference },
                    }),
                )
            } else {
                if let Some(upload) = submission.upload_mut(upload_id) {
                    upload.status = UploadStatus::Failed;
                }
                tracing::warn!(
                    submission_id = %submission.id,
                    upload_id,
                    "Upload could not be verified"
                );
                (
                    EventType::UploadFailed,
                    json!({
                        "uploadId": pending.upload_id,
                        "fieldPath": pending.field_path,
                    }),
                )
            };
            self.rotate_token(&mut submission);

            let mutation = self
                .record(&mut submission, event_type, &actor, Some(payload))
                .await?;
            Ok(UploadConfirmOutcome { mutation, verified })
        })
        .await
    }
}
