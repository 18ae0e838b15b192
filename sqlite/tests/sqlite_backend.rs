//! Integration tests for the SQLite backends.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)] // Test code can use unwrap/expect/panic

use futures::future::join_all;
use intake_core::event_store::{EventFilter, EventStore};
use intake_core::ids::Version;
use intake_core::state_machine::SubmissionState;
use intake_core::submission_store::{SubmissionFilter, SubmissionStorage};
use intake_runtime::lifecycle::{CreateSubmission, LifecycleManager};
use intake_runtime::registry::InMemoryIntakeRegistry;
use intake_sqlite::{connect, connect_in_memory, migrate, SqliteEventStore, SqliteSubmissionStore};
use intake_testing::conformance::{event_store_contract, submission_store_contract};
use intake_testing::{fixtures, test_clock, SequentialIdGenerator};
use sqlx::SqlitePool;
use std::sync::Arc;

fn manager(pool: &SqlitePool) -> LifecycleManager {
    LifecycleManager::builder(
        Arc::new(SqliteSubmissionStore::from_pool(pool.clone())),
        Arc::new(SqliteEventStore::from_pool(pool.clone())),
        Arc::new(InMemoryIntakeRegistry::with_definitions([fixtures::simple_intake()])),
    )
    .id_generator(Arc::new(SequentialIdGenerator::new()))
    .build()
    .expect("manager")
}

#[tokio::test]
async fn event_store_satisfies_contract() {
    let pool = connect_in_memory().await.expect("pool");
    let store = SqliteEventStore::from_pool(pool).with_clock(Arc::new(test_clock()));

    event_store_contract(&store).await;
}

#[tokio::test]
async fn submission_store_satisfies_contract() {
    let pool = connect_in_memory().await.expect("pool");

    submission_store_contract(&SqliteSubmissionStore::from_pool(pool)).await;
}

#[tokio::test]
async fn data_survives_reopening_the_file() {
    let dir = tempfile::tempdir().expect("tempdir");
    let url = format!("sqlite://{}", dir.path().join("intake.db").display());

    let id = {
        let pool = connect(&url, 4).await.expect("connect");
        migrate(&pool).await.expect("migrate");
        let created = manager(&pool)
            .create(CreateSubmission::new(fixtures::SIMPLE_INTAKE, fixtures::agent()).with_idempotency_key("k1"))
            .await
            .expect("create")
            .mutation;
        pool.close().await;
        created.submission_id
    };

    let pool = connect(&url, 4).await.expect("reconnect");
    migrate(&pool).await.expect("migrate again");

    let stored = SqliteSubmissionStore::from_pool(pool.clone())
        .get_by_idempotency_key("k1".to_string())
        .await
        .expect("lookup")
        .expect("persisted");
    assert_eq!(stored.id, id);
    assert_eq!(stored.state, SubmissionState::Draft);

    let events = SqliteEventStore::from_pool(pool);
    assert_eq!(events.latest_version(id.clone()).await.expect("head"), Version::new(1));
    assert_eq!(events.get_events(id, EventFilter::default()).await.expect("events").len(), 1);
}

#[tokio::test]
async fn concurrent_updates_keep_versions_gapless() {
    let pool = connect_in_memory().await.expect("pool");
    let manager = manager(&pool);

    let created = manager
        .create(CreateSubmission::new(fixtures::SIMPLE_INTAKE, fixtures::agent()))
        .await
        .expect("create")
        .mutation;

    // Only the first writer holding the original token wins; the rest see a
    // superseded token. Whatever succeeded must be numbered without gaps.
    let attempts = (0..8).map(|i| {
        manager.set_fields(
            &created.submission_id,
            created.resume_token.as_str(),
            fixtures::agent(),
            fixtures::fields([("name", serde_json::json!(format!("writer {i}")))]),
        )
    });
    let results = join_all(attempts).await;
    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);

    let events = manager
        .get_events(&created.submission_id, EventFilter::default())
        .await
        .expect("events");
    let versions: Vec<u64> = events.iter().map(|e| e.version.value()).collect();
    let expected: Vec<u64> = (1..=u64::try_from(events.len()).unwrap()).collect();
    assert_eq!(versions, expected);

    let snapshot = manager.get(&created.submission_id).await.expect("get");
    assert_eq!(snapshot.events.len(), events.len());
    assert_eq!(
        manager.count(SubmissionFilter::all().live()).await.expect("count"),
        1
    );
}
