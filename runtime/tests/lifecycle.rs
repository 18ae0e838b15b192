//! Integration tests for the Lifecycle Manager's core operations.
//!
//! Covers creation, field updates, submission, finalization, cancellation,
//! expiry and the handoff operations, plus the invariants every mutating
//! call must uphold.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)] // Test code can use unwrap/expect/panic

mod common;

use common::{harness, SHORT_LIVED_INTAKE};
use intake_core::error::LifecycleError;
use intake_core::event::EventType;
use intake_core::event_store::EventFilter;
use intake_core::ids::{SubmissionId, Version};
use intake_core::state_machine::SubmissionState;
use intake_core::submission_store::{Pagination, SubmissionFilter};
use intake_runtime::lifecycle::CreateSubmission;
use intake_runtime::scheduler::{LifecycleScheduler, SchedulerConfig};
use intake_testing::fixtures::{self, GATED_INTAKE, SIMPLE_INTAKE};
use serde_json::json;

// ============================================================================
// create
// ============================================================================

#[tokio::test]
async fn create_starts_a_draft_with_one_created_event() {
    let h = harness();
    let created = h.create(SIMPLE_INTAKE).await;

    assert_eq!(created.state, SubmissionState::Draft);
    assert_eq!(created.version, Version::new(1));

    let submission = h.snapshot(&created).await;
    assert_eq!(submission.events.len(), 1);
    assert_eq!(submission.events[0].event_type, EventType::SubmissionCreated);
    assert_eq!(submission.created_by, fixtures::agent());
    assert!(submission.expires_at.is_none());
}

#[tokio::test]
async fn create_with_same_key_twice_returns_same_submission() {
    let h = harness();
    let request = CreateSubmission::new(SIMPLE_INTAKE, fixtures::agent()).with_idempotency_key("k1");

    let first = h.manager.create(request.clone()).await.expect("first create");
    let second = h.manager.create(request).await.expect("second create");

    assert_eq!(first.mutation.submission_id, second.mutation.submission_id);
    assert!(!first.replayed);
    assert!(second.replayed);

    assert_eq!(h.events.len(), 1);
    assert_eq!(h.recorder.types(), vec![EventType::SubmissionCreated]);
}

#[tokio::test]
async fn concurrent_creates_with_same_key_produce_one_submission() {
    let h = harness();
    let request = CreateSubmission::new(SIMPLE_INTAKE, fixtures::agent()).with_idempotency_key("k1");

    let (a, b) = tokio::join!(
        h.manager.create(request.clone()),
        h.manager.create(request.clone())
    );

    assert_eq!(a.expect("a").mutation.submission_id, b.expect("b").mutation.submission_id);
    assert_eq!(h.storage.len(), 1);
}

#[tokio::test]
async fn idempotency_key_of_another_intake_conflicts() {
    let h = harness();
    h.manager
        .create(CreateSubmission::new(SIMPLE_INTAKE, fixtures::agent()).with_idempotency_key("k1"))
        .await
        .expect("create");

    let err = h
        .manager
        .create(CreateSubmission::new(GATED_INTAKE, fixtures::agent()).with_idempotency_key("k1"))
        .await
        .expect_err("key belongs to another intake");

    assert_eq!(err.code(), "idempotency_conflict");
}

#[tokio::test]
async fn create_for_unknown_intake_fails() {
    let h = harness();
    let err = h
        .manager
        .create(CreateSubmission::new("nope", fixtures::agent()))
        .await
        .expect_err("unknown intake");
    assert!(matches!(err, LifecycleError::IntakeNotFound(_)));
    assert!(h.storage.is_empty());
}

#[tokio::test]
async fn create_with_initial_fields_applies_them_with_fresh_token() {
    let h = harness();
    let outcome = h
        .manager
        .create(
            CreateSubmission::new(SIMPLE_INTAKE, fixtures::agent())
                .with_fields(fixtures::fields([("name", json!("Ada"))])),
        )
        .await
        .expect("create");

    assert_eq!(outcome.mutation.state, SubmissionState::InProgress);
    assert_eq!(outcome.mutation.version, Version::new(2));
    assert!(outcome.field_errors.is_empty());

    let submission = h.snapshot(&outcome.mutation).await;
    assert_eq!(submission.fields["name"], json!("Ada"));
    assert_eq!(submission.field_attribution["name"], fixtures::agent());
}

#[tokio::test]
async fn ttl_sets_expiry_from_clock() {
    let h = harness();
    let created = h.create(SHORT_LIVED_INTAKE).await;
    let submission = h.snapshot(&created).await;
    assert_eq!(
        submission.expires_at,
        Some(submission.created_at + chrono::Duration::milliseconds(1000))
    );
}

// ============================================================================
// set_fields
// ============================================================================

#[tokio::test]
async fn set_fields_rotates_token_and_attributes_changes() {
    let h = harness();
    let created = h.create(SIMPLE_INTAKE).await;

    let outcome = h
        .manager
        .set_fields(
            &created.submission_id,
            created.resume_token.as_str(),
            fixtures::human("reviewer-7"),
            fixtures::fields([("name", json!("Grace")), ("email", json!(42))]),
        )
        .await
        .expect("set fields");

    assert_ne!(outcome.mutation.resume_token, created.resume_token);
    assert_eq!(outcome.mutation.state, SubmissionState::InProgress);
    assert_eq!(outcome.changed, vec!["email".to_string(), "name".to_string()]);
    assert_eq!(outcome.field_errors.len(), 1);
    assert_eq!(outcome.field_errors[0].path, "email");
    assert_eq!(outcome.field_errors[0].code, "invalid_type");

    let submission = h.snapshot(&created).await;
    assert_eq!(submission.field_attribution["name"], fixtures::human("reviewer-7"));
    let event = submission.events.last().expect("event");
    assert_eq!(event.event_type, EventType::FieldUpdated);
    assert_eq!(event.payload.as_ref().expect("payload")["fields"]["name"], json!("Grace"));
}

#[tokio::test]
async fn unchanged_fields_keep_draft_and_attribution() {
    let h = harness();
    let created = h.create(SIMPLE_INTAKE).await;

    let outcome = h
        .manager
        .set_fields(
            &created.submission_id,
            created.resume_token.as_str(),
            fixtures::agent(),
            fixtures::fields([]),
        )
        .await
        .expect("empty update");

    assert_eq!(outcome.mutation.state, SubmissionState::Draft);
    assert!(outcome.changed.is_empty());
    assert_eq!(outcome.mutation.version, Version::new(2));
}

#[tokio::test]
async fn superseded_token_is_rejected_and_submission_is_unchanged() {
    let h = harness();
    let created = h.create(SIMPLE_INTAKE).await;
    h.manager
        .set_fields(
            &created.submission_id,
            created.resume_token.as_str(),
            fixtures::agent(),
            fixtures::fields([("name", json!("Ada"))]),
        )
        .await
        .expect("first update");
    let before = serde_json::to_vec(&h.snapshot(&created).await).expect("serialize");

    let err = h
        .manager
        .set_fields(
            &created.submission_id,
            created.resume_token.as_str(),
            fixtures::agent(),
            fixtures::fields([("name", json!("Mallory"))]),
        )
        .await
        .expect_err("stale token");

    assert_eq!(err.code(), "invalid_resume_token");
    let after = serde_json::to_vec(&h.snapshot(&created).await).expect("serialize");
    assert_eq!(before, after);
}

#[tokio::test]
async fn unknown_submission_is_not_found() {
    let h = harness();
    let err = h
        .manager
        .set_fields(
            &SubmissionId::new("sub_missing"),
            "rtok_whatever",
            fixtures::agent(),
            fixtures::fields([]),
        )
        .await
        .expect_err("missing");
    assert_eq!(err, LifecycleError::SubmissionNotFound(SubmissionId::new("sub_missing")));
}

// ============================================================================
// validate / submit / finalize
// ============================================================================

#[tokio::test]
async fn validate_records_outcome_without_changing_state() {
    let h = harness();
    let created = h.create(SIMPLE_INTAKE).await;

    let outcome = h
        .manager
        .validate(&created.submission_id, created.resume_token.as_str(), fixtures::agent())
        .await
        .expect("validate");

    assert!(!outcome.accepted);
    assert_eq!(outcome.field_errors.len(), 2);
    assert_eq!(outcome.mutation.state, SubmissionState::Draft);
    assert_ne!(outcome.mutation.resume_token, created.resume_token);
    assert_eq!(h.recorder.types().last(), Some(&EventType::ValidationFailed));
}

#[tokio::test]
async fn submit_without_gates_reaches_submitted_then_finalized() {
    let h = harness();
    let filled = h.filled(SIMPLE_INTAKE).await;

    let submitted = h
        .manager
        .submit(&filled.submission_id, filled.resume_token.as_str(), "submit-1", fixtures::agent())
        .await
        .expect("submit");
    assert!(submitted.accepted);
    assert_eq!(submitted.mutation.state, SubmissionState::Submitted);

    let finalized = h
        .manager
        .finalize(
            &filled.submission_id,
            submitted.mutation.resume_token.as_str(),
            fixtures::human("ops-1"),
        )
        .await
        .expect("finalize");
    assert_eq!(finalized.state, SubmissionState::Finalized);
    assert_eq!(
        h.recorder.types(),
        vec![
            EventType::SubmissionCreated,
            EventType::FieldUpdated,
            EventType::SubmissionSubmitted,
            EventType::SubmissionFinalized,
        ]
    );
}

#[tokio::test]
async fn submit_with_missing_fields_records_validation_failure() {
    let h = harness();
    let created = h.create(SIMPLE_INTAKE).await;

    let outcome = h
        .manager
        .submit(&created.submission_id, created.resume_token.as_str(), "submit-1", fixtures::agent())
        .await
        .expect("submit returns data");

    assert!(!outcome.accepted);
    assert_eq!(outcome.mutation.state, SubmissionState::Draft);
    let paths: Vec<&str> = outcome.field_errors.iter().map(|e| e.path.as_str()).collect();
    assert_eq!(paths, vec!["name", "email"]);

    let submission = h.snapshot(&created).await;
    assert_eq!(submission.events.last().expect("event").event_type, EventType::ValidationFailed);
    assert!(submission.submit_receipts.is_empty());
}

#[tokio::test]
async fn submit_requires_idempotency_key() {
    let h = harness();
    let filled = h.filled(SIMPLE_INTAKE).await;
    let err = h
        .manager
        .submit(&filled.submission_id, filled.resume_token.as_str(), "", fixtures::agent())
        .await
        .expect_err("missing key");
    assert_eq!(err, LifecycleError::MissingIdempotencyKey);
}

#[tokio::test]
async fn repeated_submit_key_returns_earlier_outcome_without_event() {
    let h = harness();
    let filled = h.filled(SIMPLE_INTAKE).await;

    let first = h
        .manager
        .submit(&filled.submission_id, filled.resume_token.as_str(), "submit-1", fixtures::agent())
        .await
        .expect("submit");
    let events_after_first = h.snapshot(&filled).await.events.len();

    // Retried with the token that was current before the first call.
    let retry = h
        .manager
        .submit(&filled.submission_id, filled.resume_token.as_str(), "submit-1", fixtures::agent())
        .await
        .expect("retry");

    assert!(retry.replayed);
    assert_eq!(retry.mutation.state, first.mutation.state);
    assert_eq!(retry.mutation.version, first.mutation.version);
    assert_eq!(retry.mutation.resume_token, first.mutation.resume_token);
    assert_eq!(h.snapshot(&filled).await.events.len(), events_after_first);
}

#[tokio::test]
async fn submit_replay_requires_the_original_or_current_token() {
    let h = harness();
    let filled = h.filled(SIMPLE_INTAKE).await;
    let first = h
        .manager
        .submit(&filled.submission_id, filled.resume_token.as_str(), "submit-1", fixtures::agent())
        .await
        .expect("submit");

    let err = h
        .manager
        .submit(&filled.submission_id, "not-a-token", "submit-1", fixtures::human("stranger"))
        .await
        .expect_err("unknown token");
    assert_eq!(err, LifecycleError::InvalidResumeToken);

    let with_current = h
        .manager
        .submit(&filled.submission_id, first.mutation.resume_token.as_str(), "submit-1", fixtures::agent())
        .await
        .expect("current token replays");
    assert!(with_current.replayed);
    assert_eq!(with_current.mutation.version, first.mutation.version);
}

#[tokio::test]
async fn finalize_from_draft_is_an_invalid_transition() {
    let h = harness();
    let created = h.create(SIMPLE_INTAKE).await;
    let err = h
        .manager
        .finalize(&created.submission_id, created.resume_token.as_str(), fixtures::agent())
        .await
        .expect_err("draft cannot finalize");
    assert_eq!(
        err,
        LifecycleError::InvalidStateTransition {
            from: SubmissionState::Draft,
            trigger: "finalize".to_string()
        }
    );
}

// ============================================================================
// terminal immutability
// ============================================================================

#[tokio::test]
async fn terminal_submission_rejects_every_mutation() {
    let h = harness();
    let created = h.create(SIMPLE_INTAKE).await;
    let cancelled = h
        .manager
        .cancel(&created.submission_id, fixtures::human("ops-1"), Some("duplicate".to_string()))
        .await
        .expect("cancel");
    assert_eq!(cancelled.state, SubmissionState::Cancelled);

    let before = h.snapshot(&created).await;
    let token = cancelled.resume_token.as_str();
    let id = &created.submission_id;

    assert!(h
        .manager
        .set_fields(id, token, fixtures::agent(), fixtures::fields([("name", json!("x"))]))
        .await
        .is_err());
    assert!(h.manager.submit(id, token, "k", fixtures::agent()).await.is_err());
    assert!(h.manager.finalize(id, token, fixtures::agent()).await.is_err());
    assert!(h.manager.cancel(id, fixtures::agent(), None).await.is_err());
    assert!(h.manager.validate(id, token, fixtures::agent()).await.is_err());
    assert!(h.manager.issue_handoff_url(id, token, fixtures::agent()).await.is_err());
    assert!(h.manager.approve(id, fixtures::human("r"), Vec::new()).await.is_err());
    assert!(!h.manager.expire(id).await.expect("expire is a no-op"));

    let after = h.snapshot(&created).await;
    assert_eq!(before.fields, after.fields);
    assert_eq!(before.field_attribution, after.field_attribution);
    assert_eq!(before.state, after.state);
    assert_eq!(before.resume_token, after.resume_token);
    assert_eq!(before.events.len(), after.events.len());
}

// ============================================================================
// expiry
// ============================================================================

#[tokio::test]
async fn expiry_scan_expires_elapsed_drafts() {
    let h = harness();
    let created = h.create(SHORT_LIVED_INTAKE).await;
    let live = h.create(SIMPLE_INTAKE).await;

    h.clock.advance(chrono::Duration::milliseconds(1500));
    let scheduler = LifecycleScheduler::new(h.manager.clone(), SchedulerConfig::default());
    let report = scheduler.expire_due().await.expect("scan");

    assert_eq!(report.expired, 1);
    assert_eq!(h.snapshot(&created).await.state, SubmissionState::Expired);
    assert_eq!(h.snapshot(&live).await.state, SubmissionState::Draft);

    let expired_event = h.snapshot(&created).await.events.last().cloned().expect("event");
    assert_eq!(expired_event.event_type, EventType::SubmissionExpired);
    assert_eq!(expired_event.actor.kind, intake_core::actor::ActorKind::System);

    let err = h
        .manager
        .set_fields(
            &created.submission_id,
            h.snapshot(&created).await.resume_token.as_str(),
            fixtures::agent(),
            fixtures::fields([("name", json!("late"))]),
        )
        .await
        .expect_err("expired");
    assert_eq!(err, LifecycleError::SubmissionExpired(created.submission_id.clone()));
}

#[tokio::test]
async fn elapsed_ttl_blocks_mutation_before_the_scan_runs() {
    let h = harness();
    let created = h.create(SHORT_LIVED_INTAKE).await;
    h.clock.advance(chrono::Duration::seconds(2));

    let err = h
        .manager
        .set_fields(
            &created.submission_id,
            created.resume_token.as_str(),
            fixtures::agent(),
            fixtures::fields([("name", json!("late"))]),
        )
        .await
        .expect_err("ttl elapsed");
    assert_eq!(err.code(), "submission_expired");
}

#[tokio::test]
async fn expire_deletes_pending_uploads() {
    let h = harness();
    let created = h.create(SHORT_LIVED_INTAKE).await;
    let requested = h
        .manager
        .request_upload(
            &created.submission_id,
            created.resume_token.as_str(),
            fixtures::agent(),
            "attachment".to_string(),
            intake_core::collaborators::FileDescriptor::named("cv.pdf"),
        )
        .await
        .expect("request upload");

    assert!(h.manager.expire(&created.submission_id).await.expect("expire"));
    assert_eq!(h.files.deleted(), vec![requested.ticket.upload_id]);
}

// ============================================================================
// handoff
// ============================================================================

#[tokio::test]
async fn handoff_url_embeds_current_token_without_rotating_it() {
    let h = harness();
    let created = h.create(SIMPLE_INTAKE).await;

    let link = h
        .manager
        .issue_handoff_url(&created.submission_id, created.resume_token.as_str(), fixtures::agent())
        .await
        .expect("link");

    assert_eq!(
        link.url,
        format!(
            "http://localhost:3000/resume/{}?token={}",
            created.submission_id,
            created.resume_token.as_str()
        )
    );
    let submission = h.snapshot(&created).await;
    assert_eq!(submission.resume_token, created.resume_token);
    assert_eq!(submission.events.last().expect("event").event_type, EventType::HandoffLinkIssued);

    // The same token still works for the next mutating call.
    h.manager
        .set_fields(
            &created.submission_id,
            created.resume_token.as_str(),
            fixtures::human("user-1"),
            fixtures::fields([("name", json!("Ada"))]),
        )
        .await
        .expect("token still current");
}

#[tokio::test]
async fn resume_finds_submission_by_token() {
    let h = harness();
    let created = h.create(SIMPLE_INTAKE).await;

    let resumed = h
        .manager
        .resume(created.resume_token.as_str(), fixtures::human("user-1"))
        .await
        .expect("resume");

    assert_eq!(resumed.id, created.submission_id);
    assert_eq!(resumed.resume_token, created.resume_token);
    assert_eq!(resumed.events.last().expect("event").event_type, EventType::HandoffResumed);

    let err = h
        .manager
        .resume("rtok_unknown", fixtures::human("user-1"))
        .await
        .expect_err("unknown token");
    assert_eq!(err, LifecycleError::InvalidResumeToken);
}

#[tokio::test]
async fn tokens_never_appear_in_event_payloads() {
    let h = harness();
    let created = h.create(SIMPLE_INTAKE).await;
    h.manager
        .issue_handoff_url(&created.submission_id, created.resume_token.as_str(), fixtures::agent())
        .await
        .expect("link");

    for event in h.recorder.events() {
        let json = serde_json::to_string(&event).expect("serialize");
        assert!(!json.contains(created.resume_token.as_str()));
    }
}

// ============================================================================
// triple-write
// ============================================================================

#[tokio::test]
async fn every_mutation_adds_exactly_one_event_everywhere() {
    let h = harness();
    let created = h.create(SIMPLE_INTAKE).await;
    let mut token = created.resume_token.clone();

    for n in 0..5 {
        let before = h.snapshot(&created).await.events.len();
        let outcome = h
            .manager
            .set_fields(
                &created.submission_id,
                token.as_str(),
                fixtures::agent(),
                fixtures::fields([("notes", json!(format!("note {n}")))]),
            )
            .await
            .expect("update");
        token = outcome.mutation.resume_token;

        let snapshot = h.snapshot(&created).await;
        assert_eq!(snapshot.events.len(), before + 1);
        assert_eq!(snapshot.fields["notes"], json!(format!("note {n}")));

        let logged = h
            .manager
            .get_events(&created.submission_id, EventFilter::all())
            .await
            .expect("events");
        assert_eq!(logged.last(), snapshot.events.last());
    }
}

#[tokio::test]
async fn failing_listener_does_not_abort_the_call() {
    let h = harness();
    h.manager
        .register_listener(std::sync::Arc::new(intake_testing::FailingListener))
        .expect("register");

    let created = h.create(SIMPLE_INTAKE).await;
    assert_eq!(h.snapshot(&created).await.events.len(), 1);
    assert_eq!(h.recorder.events().len(), 1);
}

#[tokio::test]
async fn concurrent_updates_keep_versions_gapless() {
    let h = harness();
    let created = h.create(SIMPLE_INTAKE).await;

    // Every writer presents the same token; exactly one may win.
    let attempts = (0..8).map(|n| {
        let manager = h.manager.clone();
        let id = created.submission_id.clone();
        let token = created.resume_token.clone();
        tokio::spawn(async move {
            manager
                .set_fields(
                    &id,
                    token.as_str(),
                    fixtures::agent(),
                    fixtures::fields([("notes", json!(n))]),
                )
                .await
        })
    });
    let results = futures::future::join_all(attempts).await;
    let winners = results
        .into_iter()
        .map(|joined| joined.expect("task"))
        .filter(Result::is_ok)
        .count();
    assert_eq!(winners, 1);

    // Writers that re-read the token serialize cleanly.
    let tasks = (0..8).map(|n| {
        let manager = h.manager.clone();
        let id = created.submission_id.clone();
        tokio::spawn(async move {
            loop {
                let current = manager.get(&id).await.expect("get").resume_token;
                let result = manager
                    .set_fields(
                        &id,
                        current.as_str(),
                        fixtures::agent(),
                        fixtures::fields([("notes", json!(format!("writer {n}")))]),
                    )
                    .await;
                match result {
                    Ok(_) => break,
                    Err(LifecycleError::InvalidResumeToken) => tokio::task::yield_now().await,
                    Err(other) => panic!("unexpected error: {other}"),
                }
            }
        })
    });
    for task in futures::future::join_all(tasks).await {
        task.expect("writer");
    }

    let events = h
        .manager
        .get_events(&created.submission_id, EventFilter::all())
        .await
        .expect("events");
    let versions: Vec<u64> = events.iter().map(|e| e.version.value()).collect();
    assert_eq!(versions, (1..=10).collect::<Vec<u64>>());
}

// ============================================================================
// reads
// ============================================================================

#[tokio::test]
async fn list_returns_newest_first() {
    let h = harness();
    let first = h.create(SIMPLE_INTAKE).await;
    h.clock.advance(chrono::Duration::seconds(1));
    let second = h.create(SIMPLE_INTAKE).await;
    h.clock.advance(chrono::Duration::seconds(1));
    let third = h.create(GATED_INTAKE).await;

    let all = h
        .manager
        .list(SubmissionFilter::all(), Pagination::first(10))
        .await
        .expect("list");
    let ids: Vec<_> = all.iter().map(|s| s.id.clone()).collect();
    assert_eq!(ids, vec![third.submission_id, second.submission_id.clone(), first.submission_id.clone()]);

    let simple = h
        .manager
        .list(SubmissionFilter::all().for_intake(SIMPLE_INTAKE), Pagination::new(1, 10))
        .await
        .expect("list");
    assert_eq!(simple.len(), 1);
    assert_eq!(simple[0].id, first.submission_id);

    assert_eq!(h.manager.count(SubmissionFilter::all().live()).await.expect("count"), 3);
}

#[tokio::test]
async fn get_events_filters_by_type() {
    let h = harness();
    let filled = h.filled(SIMPLE_INTAKE).await;

    let updates = h
        .manager
        .get_events(
            &filled.submission_id,
            EventFilter::all().with_types([EventType::FieldUpdated]),
        )
        .await
        .expect("events");
    assert_eq!(updates.len(), 1);
    assert_eq!(updates[0].version, Version::new(2));
}
