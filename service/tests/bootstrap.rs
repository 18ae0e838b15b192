//! Startup wiring tests: backend selection, intake loading and the delivery
//! path from a finalized submission to an outbound request.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)] // Test code can use unwrap/expect/panic

use intake_core::delivery::DeliveryOutcome;
use intake_core::state_machine::SubmissionState;
use intake_core::submission_store::{SubmissionFilter, SubmissionStorage};
use intake_delivery::{OutboundRequest, StaticResolver, Transport, TransportError, UrlGuard};
use intake_runtime::lifecycle::CreateSubmission;
use intake_service::{backend, load_intakes, BackendKind, BootstrapError, Config, ConfigError, Service};
use intake_testing::fixtures;
use std::collections::HashMap;
use std::future::Future;
use std::path::Path;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;

const INTAKES: &str = r#"[
    {"id": "contact-form", "schema": {"fields": [
        {"path": "name", "required": true, "kind": "text"},
        {"path": "email", "required": true, "kind": "text"}
    ]}},
    {"id": "vendor", "schema": {"fields": [
        {"path": "name", "required": true, "kind": "text"},
        {"path": "email", "required": true, "kind": "text"}
    ]}, "destination": {"kind": "webhook", "url": "https://hooks.example.com/vendor"}}
]"#;

const NO_DESTINATIONS: &str = r#"[{"id": "contact-form"}]"#;

fn write_intakes(dir: &Path, json: &str) -> String {
    let path = dir.join("intakes.json");
    std::fs::write(&path, json).expect("write intakes");
    path.display().to_string()
}

fn config(pairs: &[(&str, &str)]) -> Config {
    let vars: HashMap<String, String> =
        pairs.iter().map(|(k, v)| ((*k).to_string(), (*v).to_string())).collect();
    Config::from_lookup(|key| vars.get(key).cloned()).expect("config")
}

#[derive(Default)]
struct RecordingTransport {
    sent: Mutex<Vec<OutboundRequest>>,
}

impl Transport for RecordingTransport {
    fn send(
        &self,
        request: OutboundRequest,
    ) -> Pin<Box<dyn Future<Output = Result<u16, TransportError>> + Send + '_>> {
        self.sent.lock().unwrap().push(request);
        Box::pin(async { Ok(200) })
    }
}

#[tokio::test]
async fn memory_backend_without_destinations_runs_and_stops() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_intakes(dir.path(), NO_DESTINATIONS);
    let config = config(&[("STORAGE_BACKEND", "memory"), ("INTAKES_PATH", &path)]);

    let service = Service::build(&config).await.expect("build");
    assert!(!service.delivers());

    let created = service
        .manager()
        .create(CreateSubmission::new("contact-form", fixtures::agent()))
        .await
        .expect("create");
    assert_eq!(created.mutation.state, SubmissionState::Draft);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let running = tokio::spawn(service.run(shutdown_rx));
    shutdown_tx.send(true).unwrap();
    tokio::time::timeout(Duration::from_secs(5), running)
        .await
        .expect("stops in time")
        .expect("task");
}

#[tokio::test]
async fn destinations_require_a_signing_secret() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_intakes(dir.path(), INTAKES);
    let config = config(&[("STORAGE_BACKEND", "memory"), ("INTAKES_PATH", &path)]);

    let err = Service::build(&config).await.err().expect("missing secret");
    assert!(matches!(
        err,
        BootstrapError::Config(ConfigError::Missing("DELIVERY_SIGNING_SECRET"))
    ));
}

#[tokio::test]
async fn unreadable_intakes_are_reported() {
    let err = load_intakes(Path::new("/nonexistent/intakes.json")).expect_err("missing file");
    assert!(matches!(err, BootstrapError::Intakes { .. }));

    let dir = tempfile::tempdir().unwrap();
    let path = write_intakes(dir.path(), r#"{"id": "not-an-array"}"#);
    let err = load_intakes(Path::new(&path)).expect_err("bad json");
    assert!(matches!(err, BootstrapError::Registry(_)));
}

#[cfg(feature = "sqlite")]
#[tokio::test]
async fn sqlite_backend_opens_a_file() {
    let dir = tempfile::tempdir().unwrap();
    let url = format!("sqlite://{}", dir.path().join("intake.db").display());
    let config = config(&[("STORAGE_BACKEND", "sqlite"), ("DATABASE_URL", &url)]);

    let backends = backend::open(&config.storage).await.expect("open");
    assert_eq!(backends.submissions.count(SubmissionFilter::all()).await.expect("count"), 0);
    assert!(dir.path().join("intake.db").exists());
}

#[cfg(not(feature = "postgres"))]
#[tokio::test]
async fn backends_left_out_of_the_build_fail_fast() {
    let config = config(&[("STORAGE_BACKEND", "postgres"), ("DATABASE_URL", "postgres://db/intake")]);

    let err = backend::open(&config.storage).await.err().expect("unavailable");
    assert!(matches!(
        err,
        BootstrapError::Config(ConfigError::BackendUnavailable(BackendKind::Postgres))
    ));
}

#[tokio::test]
async fn finalized_submissions_are_delivered() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_intakes(dir.path(), INTAKES);
    let config = config(&[
        ("STORAGE_BACKEND", "memory"),
        ("INTAKES_PATH", &path),
        ("DELIVERY_SIGNING_SECRET", "whsec_service"),
    ]);

    let transport = Arc::new(RecordingTransport::default());
    let guard = UrlGuard::new(Arc::new(
        StaticResolver::new().with_host("hooks.example.com", "93.184.216.34".parse().unwrap()),
    ));
    let service = Service::assemble(
        &config,
        load_intakes(Path::new(&path)).expect("intakes"),
        backend::open(&config.storage).await.expect("backend"),
        transport.clone(),
        guard,
    )
    .expect("assemble");
    assert!(service.delivers());

    let manager = service.manager().clone();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let running = tokio::spawn(service.run(shutdown_rx));

    let created = manager
        .create(CreateSubmission::new("vendor", fixtures::agent()).with_fields(fixtures::complete_fields()))
        .await
        .expect("create")
        .mutation;
    let submitted = manager
        .submit(&created.submission_id, created.resume_token.as_str(), "submit-1", fixtures::agent())
        .await
        .expect("submit")
        .mutation;
    manager
        .finalize(&created.submission_id, submitted.resume_token.as_str(), fixtures::human("ops-1"))
        .await
        .expect("finalize");

    let delivered = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let submission = manager.get(&created.submission_id).await.expect("get");
            if !submission.deliveries.is_empty() {
                return submission;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("delivered in time");
    assert_eq!(delivered.deliveries[0].outcome, DeliveryOutcome::Succeeded);
    assert_eq!(transport.sent.lock().unwrap().len(), 1);

    shutdown_tx.send(true).unwrap();
    tokio::time::timeout(Duration::from_secs(5), running)
        .await
        .expect("stops in time")
        .expect("task");
}
