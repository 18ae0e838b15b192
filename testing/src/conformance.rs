//! Backend conformance checks.
//!
//! Every storage backend must honor the same contracts. Backend crates call
//! these functions from their own integration tests against a fresh store;
//! each function panics with a descriptive message on the first violation.
//!
//! Stores passed in must be empty and, for the retention check, use
//! [`test_clock`](crate::test_clock) as their clock.

#![allow(clippy::expect_used, clippy::panic, clippy::missing_panics_doc)]

use crate::mocks::test_clock;
use futures::future::join_all;
use intake_core::actor::{Actor, ActorKind};
use intake_core::environment::Clock;
use intake_core::event::{EventType, SubmissionEvent};
use intake_core::event_store::{EventFilter, EventStore, EventStoreError};
use intake_core::ids::{EventId, IntakeId, ResumeToken, SubmissionId, Version};
use intake_core::state_machine::SubmissionState;
use intake_core::submission::Submission;
use intake_core::submission_store::{Pagination, StorageError, SubmissionFilter, SubmissionStorage};
use chrono::{DateTime, Duration, Utc};

fn event(id: &str, submission: &str, event_type: EventType, actor: Actor, ts: DateTime<Utc>) -> SubmissionEvent {
    SubmissionEvent::new(
        EventId::new(id),
        event_type,
        SubmissionId::new(submission),
        ts,
        actor,
        SubmissionState::InProgress,
        Version::INITIAL,
    )
}

fn submission(id: &str, intake: &str, created_offset_s: i64, key: Option<&str>) -> Submission {
    Submission::new(
        SubmissionId::new(id),
        IntakeId::new(intake),
        ResumeToken::new(format!("rtok_{id}")),
        Actor::agent("bot"),
        test_clock().now() + Duration::seconds(created_offset_s),
        None,
        key.map(str::to_string),
    )
}

fn versions(events: &[SubmissionEvent]) -> Vec<u64> {
    events.iter().map(|e| e.version.value()).collect()
}

/// Run every Event Log check against `store`.
pub async fn event_store_contract(store: &dyn EventStore) {
    versions_are_assigned_gaplessly(store).await;
    duplicate_event_ids_fail_loudly(store).await;
    expected_version_is_enforced(store).await;
    concurrent_appends_stay_gapless(store).await;
    queries_filter_and_page(store).await;
    stats_and_retention(store).await;
}

/// Run every Submission Store check against `store`.
pub async fn submission_store_contract(store: &dyn SubmissionStorage) {
    snapshots_roundtrip_by_every_key(store).await;
    idempotency_keys_are_unique(store).await;
    listing_is_newest_first(store).await;
    filters_apply_to_list_and_count(store).await;
}

async fn versions_are_assigned_gaplessly(store: &dyn EventStore) {
    let now = test_clock().now();
    for i in 1..=3 {
        let stored = store
            .append_event(
                event(&format!("evt_gapless_{i}"), "sub_gapless", EventType::FieldUpdated, Actor::agent("bot"), now),
                None,
            )
            .await
            .expect("append");
        assert_eq!(stored.version, Version::new(i), "append {i} got the wrong version");
    }
    assert_eq!(
        store.latest_version(SubmissionId::new("sub_gapless")).await.expect("latest"),
        Version::new(3)
    );
    assert_eq!(
        store.latest_version(SubmissionId::new("sub_unknown")).await.expect("latest"),
        Version::INITIAL
    );
    let stored = store
        .get_events(SubmissionId::new("sub_gapless"), EventFilter::all())
        .await
        .expect("events");
    assert_eq!(versions(&stored), vec![1, 2, 3]);
}

async fn duplicate_event_ids_fail_loudly(store: &dyn EventStore) {
    let now = test_clock().now();
    let original = store
        .append_event(event("evt_dup", "sub_dup_a", EventType::FieldUpdated, Actor::agent("bot"), now), None)
        .await
        .expect("append");

    let err = store
        .append_event(event("evt_dup", "sub_dup_b", EventType::SubmissionCreated, Actor::human("eve"), now), None)
        .await
        .expect_err("duplicate event id must fail");
    assert_eq!(err, EventStoreError::DuplicateEventId(EventId::new("evt_dup")));

    // The original is intact and the refused append consumed no version.
    let stored = store
        .get_events(SubmissionId::new("sub_dup_a"), EventFilter::all())
        .await
        .expect("events");
    assert_eq!(stored, vec![original]);
    assert_eq!(
        store.latest_version(SubmissionId::new("sub_dup_b")).await.expect("latest"),
        Version::INITIAL
    );
}

async fn expected_version_is_enforced(store: &dyn EventStore) {
    let now = test_clock().now();
    let first = store
        .append_event(
            event("evt_occ_1", "sub_occ", EventType::SubmissionCreated, Actor::agent("bot"), now),
            Some(Version::INITIAL),
        )
        .await
        .expect("first append");
    assert_eq!(first.version, Version::new(1));

    let err = store
        .append_event(
            event("evt_occ_2", "sub_occ", EventType::FieldUpdated, Actor::agent("bot"), now),
            Some(Version::INITIAL),
        )
        .await
        .expect_err("stale expectation");
    assert_eq!(
        err,
        EventStoreError::ConcurrencyConflict {
            submission_id: SubmissionId::new("sub_occ"),
            expected: Version::INITIAL,
            actual: Version::new(1),
        }
    );

    let second = store
        .append_event(
            event("evt_occ_3", "sub_occ", EventType::FieldUpdated, Actor::agent("bot"), now),
            Some(Version::new(1)),
        )
        .await
        .expect("matching expectation");
    assert_eq!(second.version, Version::new(2));
}

async fn concurrent_appends_stay_gapless(store: &dyn EventStore) {
    let now = test_clock().now();
    let appends = (0..20).map(|i| {
        store.append_event(
            event(&format!("evt_race_{i}"), "sub_race", EventType::FieldUpdated, Actor::agent("bot"), now),
            None,
        )
    });
    let mut assigned: Vec<u64> = join_all(appends)
        .await
        .into_iter()
        .map(|r| r.expect("concurrent append").version.value())
        .collect();
    assigned.sort_unstable();
    assert_eq!(assigned, (1..=20).collect::<Vec<_>>(), "versions must be unique and gapless");
}

async fn queries_filter_and_page(store: &dyn EventStore) {
    let start = test_clock().now();
    let plan = [
        (EventType::SubmissionCreated, Actor::agent("bot")),
        (EventType::FieldUpdated, Actor::agent("bot")),
        (EventType::FieldUpdated, Actor::human("alice")),
        (EventType::SubmissionSubmitted, Actor::human("alice")),
        (EventType::FieldUpdated, Actor::system("scanner")),
    ];
    for (i, (event_type, actor)) in plan.into_iter().enumerate() {
        let offset = i64::try_from(i).expect("small index");
        store
            .append_event(
                event(&format!("evt_query_{i}"), "sub_query", event_type, actor, start + Duration::seconds(offset)),
                None,
            )
            .await
            .expect("append");
    }
    let id = || SubmissionId::new("sub_query");

    let updates = store
        .get_events(id(), EventFilter::all().with_types([EventType::FieldUpdated]))
        .await
        .expect("by type");
    assert_eq!(versions(&updates), vec![2, 3, 5]);

    let human = store
        .get_events(id(), EventFilter::all().with_actor_kind(ActorKind::Human))
        .await
        .expect("by actor");
    assert_eq!(versions(&human), vec![3, 4]);

    let window = store
        .get_events(
            id(),
            EventFilter::all().between(Some(start + Duration::seconds(1)), Some(start + Duration::seconds(3))),
        )
        .await
        .expect("by time");
    assert_eq!(versions(&window), vec![2, 3]);

    let page = store
        .get_events(id(), EventFilter::all().paged(1, 2))
        .await
        .expect("paged");
    assert_eq!(versions(&page), vec![2, 3]);

    let combined = store
        .get_events(id(), EventFilter::all().with_types([EventType::FieldUpdated]).paged(1, 5))
        .await
        .expect("filtered page");
    assert_eq!(versions(&combined), vec![3, 5]);

    assert_eq!(updates[1].actor, Actor::human("alice"), "events must roundtrip intact");
}

async fn stats_and_retention(store: &dyn EventStore) {
    let now = test_clock().now();
    let before = store.get_stats().await.expect("stats");

    for (i, age_days) in [40, 35, 1].into_iter().enumerate() {
        store
            .append_event(
                event(
                    &format!("evt_retention_{i}"),
                    "sub_retention",
                    EventType::FieldUpdated,
                    Actor::agent("bot"),
                    now - Duration::days(age_days),
                ),
                None,
            )
            .await
            .expect("append");
    }

    let stats = store.get_stats().await.expect("stats");
    assert_eq!(stats.total_events, before.total_events + 3);
    assert_eq!(stats.submission_count, before.submission_count + 1);
    assert_eq!(stats.oldest_event, Some(now - Duration::days(40)));

    let removed = store.cleanup_old(Duration::days(30)).await.expect("cleanup");
    assert_eq!(removed, 2);
    let remaining = store
        .get_events(SubmissionId::new("sub_retention"), EventFilter::all())
        .await
        .expect("events");
    assert_eq!(versions(&remaining), vec![3]);

    // Versions keep counting after cleanup.
    let next = store
        .append_event(
            event("evt_retention_next", "sub_retention", EventType::FieldUpdated, Actor::agent("bot"), now),
            None,
        )
        .await
        .expect("append after cleanup");
    assert_eq!(next.version, Version::new(4));
}

async fn snapshots_roundtrip_by_every_key(store: &dyn SubmissionStorage) {
    let mut original = submission("sub_rt", "kyc", 0, Some("idem-rt"));
    original.fields.insert("name".to_string(), serde_json::json!("Ada"));
    original.expires_at = Some(test_clock().now() + Duration::hours(1));
    store.save(original.clone()).await.expect("save");

    let by_id = store.get(SubmissionId::new("sub_rt")).await.expect("get");
    assert_eq!(by_id.as_ref(), Some(&original));
    let by_token = store.get_by_resume_token("rtok_sub_rt".to_string()).await.expect("by token");
    assert_eq!(by_token.as_ref(), Some(&original));
    let by_key = store.get_by_idempotency_key("idem-rt".to_string()).await.expect("by key");
    assert_eq!(by_key.as_ref(), Some(&original));

    // Token lookup is exact.
    assert!(store.get_by_resume_token("rtok_sub_r".to_string()).await.expect("prefix").is_none());
    assert!(store.get_by_resume_token("RTOK_SUB_RT".to_string()).await.expect("case").is_none());

    // Upsert replaces the snapshot and the token index.
    let mut updated = original.clone();
    updated.resume_token = ResumeToken::new("rtok_rotated");
    updated.state = SubmissionState::InProgress;
    store.save(updated.clone()).await.expect("upsert");
    assert!(store.get_by_resume_token("rtok_sub_rt".to_string()).await.expect("old").is_none());
    assert_eq!(
        store.get_by_resume_token("rtok_rotated".to_string()).await.expect("new"),
        Some(updated)
    );

    assert!(store.delete(SubmissionId::new("sub_rt")).await.expect("delete"));
    assert!(!store.delete(SubmissionId::new("sub_rt")).await.expect("delete twice"));
    assert!(store.get(SubmissionId::new("sub_rt")).await.expect("get").is_none());
}

async fn idempotency_keys_are_unique(store: &dyn SubmissionStorage) {
    store
        .save(submission("sub_key_a", "kyc", 0, Some("idem-shared")))
        .await
        .expect("first");
    let err = store
        .save(submission("sub_key_b", "kyc", 1, Some("idem-shared")))
        .await
        .expect_err("second owner of a key");
    assert_eq!(err, StorageError::DuplicateIdempotencyKey("idem-shared".to_string()));

    // Re-saving the owner is fine.
    store
        .save(submission("sub_key_a", "kyc", 0, Some("idem-shared")))
        .await
        .expect("owner upsert");
    assert!(store.get(SubmissionId::new("sub_key_b")).await.expect("get").is_none());

    store.delete(SubmissionId::new("sub_key_a")).await.expect("cleanup");
}

async fn listing_is_newest_first(store: &dyn SubmissionStorage) {
    for (id, offset) in [("sub_list_a", 0), ("sub_list_b", 10), ("sub_list_c", 10), ("sub_list_d", 5)] {
        store.save(submission(id, "listing", offset, None)).await.expect("save");
    }
    let filter = || SubmissionFilter::all().for_intake("listing");

    let all = store.list(filter(), Pagination::first(10)).await.expect("list");
    let ids: Vec<&str> = all.iter().map(|s| s.id.as_str()).collect();
    assert_eq!(ids, vec!["sub_list_c", "sub_list_b", "sub_list_d", "sub_list_a"]);

    let page = store.list(filter(), Pagination::new(1, 2)).await.expect("page");
    let ids: Vec<&str> = page.iter().map(|s| s.id.as_str()).collect();
    assert_eq!(ids, vec!["sub_list_b", "sub_list_d"]);

    assert_eq!(store.count(filter()).await.expect("count"), 4);
}

async fn filters_apply_to_list_and_count(store: &dyn SubmissionStorage) {
    let now = test_clock().now();
    let mut draft = submission("sub_filter_draft", "filtering", 0, None);
    draft.expires_at = Some(now - Duration::minutes(1));
    let mut review = submission("sub_filter_review", "filtering", 1, None);
    review.state = SubmissionState::NeedsReview;
    review.expires_at = Some(now + Duration::days(1));
    let mut done = submission("sub_filter_done", "filtering", 2, None);
    done.state = SubmissionState::Finalized;
    for s in [draft, review, done] {
        store.save(s).await.expect("save");
    }
    let base = || SubmissionFilter::all().for_intake("filtering");

    let live = store.list(base().live(), Pagination::first(10)).await.expect("live");
    let ids: Vec<&str> = live.iter().map(|s| s.id.as_str()).collect();
    assert_eq!(ids, vec!["sub_filter_review", "sub_filter_draft"]);

    let due = store
        .list(base().live().expiring_by(now), Pagination::first(10))
        .await
        .expect("due");
    assert_eq!(due.len(), 1);
    assert_eq!(due[0].id.as_str(), "sub_filter_draft");

    assert_eq!(
        store.count(base().in_states([SubmissionState::NeedsReview])).await.expect("count"),
        1
    );
    assert_eq!(store.count(base().in_states([])).await.expect("empty state set"), 0);
    assert_eq!(store.count(SubmissionFilter::all().for_intake("nothing")).await.expect("count"), 0);
}
