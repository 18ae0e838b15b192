//! Shared harness for the lifecycle integration tests.

#![allow(dead_code)]

use intake_core::intake::{ApprovalGate, IntakeDefinition, ReviewerSpec};
use intake_core::submission::Submission;
use intake_runtime::lifecycle::{CreateSubmission, LifecycleManager, Mutation};
use intake_runtime::registry::InMemoryIntakeRegistry;
use intake_testing::{
    fixtures, InMemoryEventStore, InMemoryFileStorage, InMemorySubmissionStore, ManualClock,
    RecordingListener, SequentialIdGenerator,
};
use std::sync::Arc;

/// Intake whose submissions live one second.
pub const SHORT_LIVED_INTAKE: &str = "short-lived";
/// Intake with two gates, one needing two approvals.
pub const TWO_GATE_INTAKE: &str = "procurement";

pub struct Harness {
    pub manager: Arc<LifecycleManager>,
    pub storage: InMemorySubmissionStore,
    pub events: InMemoryEventStore,
    pub files: InMemoryFileStorage,
    pub clock: Arc<ManualClock>,
    pub recorder: RecordingListener,
}

pub fn definitions() -> Vec<IntakeDefinition> {
    vec![
        fixtures::simple_intake(),
        fixtures::gated_intake(),
        IntakeDefinition::new(SHORT_LIVED_INTAKE, fixtures::contact_schema()).with_ttl_ms(1000),
        IntakeDefinition::new(TWO_GATE_INTAKE, fixtures::contact_schema())
            .with_gate(
                ApprovalGate::new("legal")
                    .with_reviewers(ReviewerSpec::Actors {
                        ids: vec!["lawyer-1".to_string()],
                    })
                    .with_escalation_after_ms(60_000),
            )
            .with_gate(ApprovalGate::new("finance").with_required_approvals(2)),
    ]
}

pub fn harness() -> Harness {
    let clock = Arc::new(ManualClock::default());
    let storage = InMemorySubmissionStore::new();
    let events = InMemoryEventStore::with_clock(clock.clone());
    let files = InMemoryFileStorage::new();
    let recorder = RecordingListener::new();

    let manager = LifecycleManager::builder(
        Arc::new(storage.clone()),
        Arc::new(events.clone()),
        Arc::new(InMemoryIntakeRegistry::with_definitions(definitions())),
    )
    .file_storage(Arc::new(files.clone()))
    .clock(clock.clone())
    .id_generator(Arc::new(SequentialIdGenerator::new()))
    .listener(Arc::new(recorder.clone()))
    .build()
    .expect("manager builds");

    Harness {
        manager: Arc::new(manager),
        storage,
        events,
        files,
        clock,
        recorder,
    }
}

impl Harness {
    pub async fn create(&self, intake: &str) -> Mutation {
        self.manager
            .create(CreateSubmission::new(intake, fixtures::agent()))
            .await
            .expect("create")
            .mutation
    }

    /// A submission of `intake` with every required field filled in.
    pub async fn filled(&self, intake: &str) -> Mutation {
        self.manager
            .create(
                CreateSubmission::new(intake, fixtures::agent())
                    .with_fields(fixtures::complete_fields()),
            )
            .await
            .expect("create with fields")
            .mutation
    }

    pub async fn snapshot(&self, mutation: &Mutation) -> Submission {
        self.manager
            .get(&mutation.submission_id)
            .await
            .expect("submission exists")
    }
}
