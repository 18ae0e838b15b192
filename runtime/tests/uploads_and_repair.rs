//! Integration tests for file uploads, delivery records and snapshot repair.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)] // Test code can use unwrap/expect/panic

mod common;

use common::harness;
use intake_core::collaborators::FileDescriptor;
use intake_core::delivery::{DeliveryOutcome, DeliveryRecord};
use intake_core::error::LifecycleError;
use intake_core::event::EventType;
use intake_core::event_store::EventFilter;
use intake_core::ids::Version;
use intake_core::state_machine::SubmissionState;
use intake_core::submission::UploadStatus;
use intake_testing::fixtures::{self, SIMPLE_INTAKE};
use serde_json::json;

// ============================================================================
// uploads
// ============================================================================

#[tokio::test]
async fn verified_upload_sets_the_field_and_resumes_progress() {
    let h = harness();
    let created = h.create(SIMPLE_INTAKE).await;

    let requested = h
        .manager
        .request_upload(
            &created.submission_id,
            created.resume_token.as_str(),
            fixtures::human("user-1"),
            "attachment".to_string(),
            FileDescriptor::named("passport.pdf"),
        )
        .await
        .expect("request upload");
    assert_eq!(requested.mutation.state, SubmissionState::AwaitingUpload);

    h.files.mark_uploaded(&requested.ticket.upload_id);
    let confirmed = h
        .manager
        .confirm_upload(
            &created.submission_id,
            requested.mutation.resume_token.as_str(),
            fixtures::human("user-1"),
            &requested.ticket.upload_id,
        )
        .await
        .expect("confirm upload");

    assert!(confirmed.verified);
    assert_eq!(confirmed.mutation.state, SubmissionState::InProgress);

    let submission = h.snapshot(&created).await;
    assert_eq!(
        submission.fields["attachment"],
        json!({"uploadId": requested.ticket.upload_id, "filename": "passport.pdf"})
    );
    assert_eq!(submission.field_attribution["attachment"], fixtures::human("user-1"));
    assert_eq!(submission.uploads[0].status, UploadStatus::Completed);
    assert_eq!(submission.events.last().expect("event").event_type, EventType::UploadCompleted);
}

#[tokio::test]
async fn unverified_upload_records_failure_and_keeps_state() {
    let h = harness();
    let created = h.create(SIMPLE_INTAKE).await;
    let requested = h
        .manager
        .request_upload(
            &created.submission_id,
            created.resume_token.as_str(),
            fixtures::agent(),
            "attachment".to_string(),
            FileDescriptor::named("scan.png"),
        )
        .await
        .expect("request upload");

    let confirmed = h
        .manager
        .confirm_upload(
            &created.submission_id,
            requested.mutation.resume_token.as_str(),
            fixtures::agent(),
            &requested.ticket.upload_id,
        )
        .await
        .expect("confirm returns data");

    assert!(!confirmed.verified);
    assert_eq!(confirmed.mutation.state, SubmissionState::AwaitingUpload);
    assert_ne!(confirmed.mutation.resume_token, requested.mutation.resume_token);

    let submission = h.snapshot(&created).await;
    assert!(!submission.fields.contains_key("attachment"));
    assert_eq!(submission.uploads[0].status, UploadStatus::Failed);
    assert_eq!(submission.events.last().expect("event").event_type, EventType::UploadFailed);
}

#[tokio::test]
async fn confirming_an_unknown_upload_fails() {
    let h = harness();
    let created = h.create(SIMPLE_INTAKE).await;
    let err = h
        .manager
        .confirm_upload(
            &created.submission_id,
            created.resume_token.as_str(),
            fixtures::agent(),
            "upl_missing",
        )
        .await
        .expect_err("unknown upload");
    assert_eq!(err.code(), "upload_not_found");
}

// ============================================================================
// delivery records
// ============================================================================

#[tokio::test]
async fn delivery_records_are_allowed_on_terminal_submissions() {
    let h = harness();
    let filled = h.filled(SIMPLE_INTAKE).await;
    let submitted = h
        .manager
        .submit(&filled.submission_id, filled.resume_token.as_str(), "s1", fixtures::agent())
        .await
        .expect("submit");
    let finalized = h
        .manager
        .finalize(&filled.submission_id, submitted.mutation.resume_token.as_str(), fixtures::agent())
        .await
        .expect("finalize");

    let now = h.manager.clock().now();
    let recorded = h
        .manager
        .record_delivery(
            &filled.submission_id,
            DeliveryRecord::failed(now, 1, "connection refused", true, true),
        )
        .await
        .expect("attempted");
    h.manager
        .record_delivery(&filled.submission_id, DeliveryRecord::succeeded(now, 2, 204))
        .await
        .expect("succeeded");

    assert_eq!(recorded.state, SubmissionState::Finalized);
    assert_eq!(recorded.resume_token, finalized.resume_token);

    let submission = h.snapshot(&filled).await;
    assert_eq!(submission.deliveries.len(), 2);
    assert_eq!(submission.deliveries[0].outcome, DeliveryOutcome::Retrying);
    let types: Vec<EventType> = submission.events.iter().rev().take(2).map(|e| e.event_type).collect();
    assert_eq!(types, vec![EventType::DeliverySucceeded, EventType::DeliveryAttempted]);
    assert_eq!(submission.events.last().expect("event").actor.id, "delivery-worker");
}

// ============================================================================
// triple-write failures and reconcile
// ============================================================================

#[tokio::test]
async fn failed_log_append_leaves_snapshot_untouched() {
    let h = harness();
    let created = h.create(SIMPLE_INTAKE).await;
    h.events.set_fail_appends(true);

    let err = h
        .manager
        .set_fields(
            &created.submission_id,
            created.resume_token.as_str(),
            fixtures::agent(),
            fixtures::fields([("name", json!("Ada"))]),
        )
        .await
        .expect_err("append fails");
    assert_eq!(err.code(), "storage_error");

    let submission = h.snapshot(&created).await;
    assert_eq!(submission.version(), Version::new(1));
    assert_eq!(submission.resume_token, created.resume_token);
}

#[tokio::test]
async fn reconcile_replays_log_into_a_lagging_snapshot() {
    let h = harness();
    let created = h.create(SIMPLE_INTAKE).await;

    h.storage.set_fail_saves(true);
    h.manager
        .set_fields(
            &created.submission_id,
            created.resume_token.as_str(),
            fixtures::human("user-1"),
            fixtures::fields([("name", json!("Ada"))]),
        )
        .await
        .expect_err("snapshot save fails");
    h.storage.set_fail_saves(false);

    // The log moved on; the snapshot did not.
    let err = h
        .manager
        .set_fields(
            &created.submission_id,
            created.resume_token.as_str(),
            fixtures::human("user-1"),
            fixtures::fields([("email", json!("ada@example.com"))]),
        )
        .await
        .expect_err("diverged");
    assert!(matches!(
        err,
        LifecycleError::ConcurrencyConflict { expected, actual, .. }
            if expected == Version::new(1) && actual == Version::new(2)
    ));

    assert_eq!(h.manager.reconcile(&created.submission_id).await.expect("reconcile"), 1);
    assert_eq!(h.manager.reconcile(&created.submission_id).await.expect("idempotent"), 0);

    let submission = h.snapshot(&created).await;
    assert_eq!(submission.version(), Version::new(2));
    assert_eq!(submission.fields["name"], json!("Ada"));
    assert_eq!(submission.field_attribution["name"], fixtures::human("user-1"));
    assert_eq!(submission.state, SubmissionState::InProgress);

    let logged = h
        .manager
        .get_events(&created.submission_id, EventFilter::all())
        .await
        .expect("events");
    assert_eq!(logged, submission.events);

    h.manager
        .set_fields(
            &created.submission_id,
            submission.resume_token.as_str(),
            fixtures::human("user-1"),
            fixtures::fields([("email", json!("ada@example.com"))]),
        )
        .await
        .expect("writes resume after reconcile");
}

#[tokio::test]
async fn health_reports_backends() {
    let h = harness();
    h.create(SIMPLE_INTAKE).await;

    let report = h.manager.health().await;
    assert!(report.is_healthy());
    assert_eq!(report.checks.len(), 3);
}
