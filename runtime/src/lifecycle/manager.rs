use super::{LifecycleConfig, Mutation};
use crate::fanout::{FanoutError, ListenerFanout};
use crate::locks::{KeyGuard, KeyedLocks};
use crate::health::{HealthCheck, HealthReport};
use crate::metrics::{LifecycleMetrics, SchedulerMetrics};
use crate::validation::SchemaValidator;
use intake_core::actor::Actor;
use intake_core::collaborators::{
    CollaboratorError, FieldValidator, FileStorage, IntakeRegistry,
};
use intake_core::environment::{Clock, IdGenerator, RandomIdGenerator, SystemClock};
use intake_core::error::{LifecycleError, Result};
use intake_core::event::{EventType, SubmissionEvent};
use intake_core::event_store::{EventFilter, EventStats, EventStore};
use intake_core::ids::{IntakeId, SubmissionId};
use intake_core::intake::IntakeDefinition;
use intake_core::listener::EventListener;
use intake_core::state_machine::SubmissionState;
use intake_core::submission::Submission;
use intake_core::submission_store::{Pagination, SubmissionFilter, SubmissionStorage};
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

/// Orchestrates every change to a submission.
///
/// Cheap to share behind an `Arc`; all collaborators are injected.
///
/// # Example
///
/// ```no_run
/// use intake_runtime::lifecycle::{CreateSubmission, LifecycleManager};
/// use intake_runtime::registry::InMemoryIntakeRegistry;
/// use intake_core::actor::Actor;
/// use intake_core::event_store::EventStore;
/// use intake_core::submission_store::SubmissionStorage;
/// use std::sync::Arc;
///
/// # async fn example(
/// #     storage: Arc<dyn SubmissionStorage>,
/// #     events: Arc<dyn EventStore>,
/// # ) -> Result<(), Box<dyn std::error::Error>> {
/// let registry = Arc::new(InMemoryIntakeRegistry::new());
/// let manager = LifecycleManager::builder(storage, events, registry).build()?;
///
/// let created = manager
///     .create(CreateSubmission::new("contact-form", Actor::agent("bot")).with_idempotency_key("k1"))
///     .await?;
/// println!("resume with {:?}", created.mutation.resume_token);
/// # Ok(())
/// # }
/// ```
pub struct LifecycleManager {
    pub(super) storage: Arc<dyn SubmissionStorage>,
    pub(super) event_store: Arc<dyn EventStore>,
    pub(super) registry: Arc<dyn IntakeRegistry>,
    pub(super) validator: Arc<dyn FieldValidator>,
    pub(super) files: Option<Arc<dyn FileStorage>>,
    pub(super) clock: Arc<dyn Clock>,
    pub(super) ids: Arc<dyn IdGenerator>,
    pub(super) fanout: ListenerFanout,
    pub(super) locks: KeyedLocks,
    pub(super) config: LifecycleConfig,
}

/// Builder for [`LifecycleManager`].
pub struct LifecycleManagerBuilder {
    storage: Arc<dyn SubmissionStorage>,
    event_store: Arc<dyn EventStore>,
    registry: Arc<dyn IntakeRegistry>,
    validator: Arc<dyn FieldValidator>,
    files: Option<Arc<dyn FileStorage>>,
    clock: Arc<dyn Clock>,
    ids: Arc<dyn IdGenerator>,
    listeners: Vec<Arc<dyn EventListener>>,
    config: LifecycleConfig,
}

impl LifecycleManagerBuilder {
    /// Replace the default [`SchemaValidator`].
    #[must_use]
    pub fn validator(mut self, validator: Arc<dyn FieldValidator>) -> Self {
        self.validator = validator;
        self
    }

    /// Enable file uploads.
    #[must_use]
    pub fn file_storage(mut self, files: Arc<dyn FileStorage>) -> Self {
        self.files = Some(files);
        self
    }

    /// Replace the system clock.
    #[must_use]
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Replace the random id generator.
    #[must_use]
    pub fn id_generator(mut self, ids: Arc<dyn IdGenerator>) -> Self {
        self.ids = ids;
        self
    }

    /// Register an event listener.
    #[must_use]
    pub fn listener(mut self, listener: Arc<dyn EventListener>) -> Self {
        self.listeners.push(listener);
        self
    }

    /// Replace the configuration.
    #[must_use]
    pub fn config(mut self, config: LifecycleConfig) -> Self {
        self.config = config;
        self
    }

    /// Build the manager.
    ///
    /// # Errors
    ///
    /// Returns [`FanoutError::TooManyListeners`] if more listeners were
    /// registered than the configuration allows.
    pub fn build(self) -> std::result::Result<LifecycleManager, FanoutError> {
        let fanout = ListenerFanout::new(self.config.max_listeners);
        for listener in self.listeners {
            fanout.register(listener)?;
        }
        Ok(LifecycleManager {
            storage: self.storage,
            event_store: self.event_store,
            registry: self.registry,
            validator: self.validator,
            files: self.files,
            clock: self.clock,
            ids: self.ids,
            fanout,
            locks: KeyedLocks::new(),
            config: self.config,
        })
    }
}

impl LifecycleManager {
    /// Start building a manager over the given backends.
    #[must_use]
    pub fn builder(
        storage: Arc<dyn SubmissionStorage>,
        event_store: Arc<dyn EventStore>,
        registry: Arc<dyn IntakeRegistry>,
    ) -> LifecycleManagerBuilder {
        LifecycleManagerBuilder {
            storage,
            event_store,
            registry,
            validator: Arc::new(SchemaValidator),
            files: None,
            clock: Arc::new(SystemClock),
            ids: Arc::new(RandomIdGenerator),
            listeners: Vec::new(),
            config: LifecycleConfig::default(),
        }
    }

    /// Register an event listener after construction.
    ///
    /// # Errors
    ///
    /// Returns [`FanoutError::TooManyListeners`] when the limit is reached.
    pub fn register_listener(
        &self,
        listener: Arc<dyn EventListener>,
    ) -> std::result::Result<(), FanoutError> {
        self.fanout.register(listener)
    }

    /// The manager's configuration.
    #[must_use]
    pub const fn config(&self) -> &LifecycleConfig {
        &self.config
    }

    /// The manager's clock.
    #[must_use]
    pub fn clock(&self) -> &dyn Clock {
        self.clock.as_ref()
    }

    // ---------------------------------------------------------------------
    // Reads
    // ---------------------------------------------------------------------

    /// Load a submission.
    ///
    /// # Errors
    ///
    /// - `SubmissionNotFound`: no such submission
    /// - `Storage`: the backend failed
    pub async fn get(&self, id: &SubmissionId) -> Result<Submission> {
        self.load(id).await
    }

    /// Load a submission once no mutation of it is in flight.
    ///
    /// Listeners run inside the critical section of the call that produced
    /// the event; background consumers use this to observe the snapshot
    /// that call saved.
    ///
    /// # Errors
    ///
    /// Same as [`get`](Self::get).
    pub async fn get_settled(&self, id: &SubmissionId) -> Result<Submission> {
        let _guard = self.lock(id).await;
        self.load(id).await
    }

    /// Events of a submission from the Event Log.
    ///
    /// # Errors
    ///
    /// - `SubmissionNotFound`: no such submission
    /// - `Storage`: a backend failed
    pub async fn get_events(
        &self,
        id: &SubmissionId,
        filter: EventFilter,
    ) -> Result<Vec<SubmissionEvent>> {
        self.load(id).await?;
        Ok(self.event_store.get_events(id.clone(), filter).await?)
    }

    /// List submissions, newest first.
    ///
    /// # Errors
    ///
    /// Returns `Storage` if the backend fails.
    pub async fn list(&self, filter: SubmissionFilter, page: Pagination) -> Result<Vec<Submission>> {
        Ok(self.storage.list(filter, page).await?)
    }

    /// Count submissions.
    ///
    /// # Errors
    ///
    /// Returns `Storage` if the backend fails.
    pub async fn count(&self, filter: SubmissionFilter) -> Result<u64> {
        Ok(self.storage.count(filter).await?)
    }

    /// Event Log statistics.
    ///
    /// # Errors
    ///
    /// Returns `Storage` if the Event Log fails.
    pub async fn event_stats(&self) -> Result<EventStats> {
        Ok(self.event_store.get_stats().await?)
    }

    /// Delete Event Log entries older than `older_than`.
    ///
    /// Retention only touches the log; snapshots keep their embedded events.
    ///
    /// # Errors
    ///
    /// Returns `Storage` if the Event Log fails.
    pub async fn purge_events(&self, older_than: chrono::Duration) -> Result<u64> {
        let purged = self.event_store.cleanup_old(older_than).await?;
        SchedulerMetrics::record_purged(purged);
        if purged > 0 {
            tracing::info!(purged, "Purged events past retention");
        }
        Ok(purged)
    }

    /// Probe both storage backends.
    pub async fn health(&self) -> HealthReport {
        let events = match self.event_store.get_stats().await {
            Ok(stats) => HealthCheck::healthy("event_log")
                .with_metadata("total_events", stats.total_events.to_string()),
            Err(error) => HealthCheck::unhealthy("event_log", error.to_string()),
        };
        let submissions = match self.storage.count(SubmissionFilter::all().live()).await {
            Ok(live) => HealthCheck::healthy("submission_store")
                .with_metadata("live_submissions", live.to_string()),
            Err(error) => HealthCheck::unhealthy("submission_store", error.to_string()),
        };
        let listeners = HealthCheck::healthy("listener_fanout")
            .with_metadata("listeners", self.fanout.len().to_string());
        HealthReport::new(vec![events, submissions, listeners], self.clock.now())
    }

    // ---------------------------------------------------------------------
    // Repair
    // ---------------------------------------------------------------------

    /// Replay Event Log entries newer than the snapshot into the snapshot.
    ///
    /// The Event Log is the source of truth. When a triple-write failed after
    /// the log append (snapshot save failed), the snapshot lags behind the log
    /// and the next mutation fails with `ConcurrencyConflict`. Reconciling
    /// brings state, field values, attribution and the embedded event list
    /// up to date; the resume token is kept.
    ///
    /// Returns the number of replayed events.
    ///
    /// # Errors
    ///
    /// - `SubmissionNotFound`: no such submission
    /// - `Storage`: a backend failed
    #[tracing::instrument(skip(self), fields(submission_id = %id))]
    pub async fn reconcile(&self, id: &SubmissionId) -> Result<u64> {
        self.observed("reconcile", async {
            let _guard = self.lock(id).await;
            let mut submission = self.load(id).await?;
            let known = submission.version();

            let missing: Vec<SubmissionEvent> = self
                .event_store
                .get_events(id.clone(), EventFilter::all())
                .await?
                .into_iter()
                .filter(|event| event.version > known)
                .collect();

            if missing.is_empty() {
                return Ok(0);
            }

            for event in &missing {
                apply_logged_event(&mut submission, event);
            }
            self.storage.save(submission).await?;

            let replayed = missing.len() as u64;
            tracing::warn!(
                submission_id = %id,
                replayed,
                "Reconciled snapshot from event log"
            );
            metrics::counter!("lifecycle_reconciled_events_total").increment(replayed);
            Ok(replayed)
        })
        .await
    }

    // ---------------------------------------------------------------------
    // Internals shared by the operation modules
    // ---------------------------------------------------------------------

    pub(super) async fn lock(&self, id: &SubmissionId) -> KeyGuard {
        self.locks.lock(id.as_str()).await
    }

    pub(super) async fn lock_key(&self, key: &str) -> KeyGuard {
        self.locks.lock(&format!("idem:{key}")).await
    }

    pub(super) async fn load(&self, id: &SubmissionId) -> Result<Submission> {
        self.storage
            .get(id.clone())
            .await?
            .ok_or_else(|| LifecycleError::SubmissionNotFound(id.clone()))
    }

    /// Look up an intake definition through the configured registry.
    ///
    /// # Errors
    ///
    /// Returns [`LifecycleError::IntakeNotFound`] for unknown intakes.
    pub async fn intake(&self, id: &IntakeId) -> Result<IntakeDefinition> {
        self.registry
            .get(id.clone())
            .await?
            .ok_or_else(|| LifecycleError::IntakeNotFound(id.clone()))
    }

    pub(super) fn files(&self) -> Result<&Arc<dyn FileStorage>> {
        self.files.as_ref().ok_or_else(|| {
            LifecycleError::Collaborator(CollaboratorError::Unavailable(
                "no file storage configured".to_string(),
            ))
        })
    }

    /// Token check followed by expiry check.
    pub(super) fn authorize(&self, submission: &Submission, presented: &str) -> Result<()> {
        if !submission.resume_token.matches(presented) {
            return Err(LifecycleError::InvalidResumeToken);
        }
        self.ensure_not_expired(submission)
    }

    /// Fails for expired submissions and for live submissions past their TTL.
    pub(super) fn ensure_not_expired(&self, submission: &Submission) -> Result<()> {
        let overdue = !submission.is_terminal() && submission.ttl_elapsed(self.clock.now());
        if submission.state == SubmissionState::Expired || overdue {
            return Err(LifecycleError::SubmissionExpired(submission.id.clone()));
        }
        Ok(())
    }

    /// Fails for terminal submissions on operations outside the state machine.
    pub(super) fn ensure_open(submission: &Submission, operation: &str) -> Result<()> {
        if submission.is_terminal() {
            return Err(LifecycleError::InvalidStateTransition {
                from: submission.state,
                trigger: operation.to_string(),
            });
        }
        Ok(())
    }

    pub(super) fn rotate_token(&self, submission: &mut Submission) {
        submission.resume_token = self.ids.resume_token();
    }

    pub(super) fn system_actor(role: &str) -> Actor {
        Actor::system(role)
    }

    /// The triple-write.
    ///
    /// 1. append the event to the snapshot's embedded list with the next version
    /// 2. concurrently fan out to listeners and append to the Event Log,
    ///    expecting the log to be at the snapshot's previous version
    /// 3. save the snapshot
    ///
    /// On error the caller's snapshot copy must be discarded.
    pub(super) async fn record(
        &self,
        submission: &mut Submission,
        event_type: EventType,
        actor: &Actor,
        payload: Option<Value>,
    ) -> Result<Mutation> {
        let now = self.clock.now();
        let previous = submission.version();

        let mut event = SubmissionEvent::new(
            self.ids.event_id(),
            event_type,
            submission.id.clone(),
            now,
            actor.clone(),
            submission.state,
            previous.next(),
        );
        event.payload = payload;

        submission.events.push(event.clone());
        submission.updated_at = now;
        submission.updated_by = actor.clone();

        let (_, appended) = futures::join!(
            self.fanout.publish(&event),
            self.event_store.append_event(event.clone(), Some(previous)),
        );

        if let Err(error) = appended {
            metrics::counter!("event_log_append_failures_total").increment(1);
            tracing::error!(
                submission_id = %submission.id,
                event_type = %event_type,
                version = %event.version,
                error = %error,
                "Event log append failed; listeners already received the event"
            );
            return Err(error.into());
        }
        metrics::counter!("event_log_appends_total", "event_type" => event_type.as_str())
            .increment(1);

        if let Err(error) = self.storage.save(submission.clone()).await {
            metrics::counter!("snapshot_save_failures_total").increment(1);
            tracing::error!(
                submission_id = %submission.id,
                event_type = %event_type,
                version = %event.version,
                error = %error,
                "Snapshot save failed after event log append; snapshot diverged from log"
            );
            return Err(error.into());
        }

        tracing::info!(
            submission_id = %submission.id,
            event_type = %event_type,
            version = %event.version,
            state = %submission.state,
            actor = %actor,
            "Recorded lifecycle event"
        );

        Ok(Mutation::of(submission))
    }

    /// Run an operation, recording its outcome and duration.
    pub(super) async fn observed<T, F>(&self, operation: &'static str, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        let start = Instant::now();
        let result = fut.await;
        let outcome = match &result {
            Ok(_) => "ok",
            Err(error) => error.code(),
        };
        LifecycleMetrics::record_operation(operation, outcome, start.elapsed());
        if let Err(error) = &result {
            tracing::debug!(operation, code = error.code(), error = %error, "Lifecycle operation rejected");
        }
        result
    }
}

/// Fold one Event Log entry into a snapshot that has not seen it.
fn apply_logged_event(submission: &mut Submission, event: &SubmissionEvent) {
    if let Some(Value::Object(fields)) = event.payload.as_ref().and_then(|p| p.get("fields")) {
        for (path, value) in fields {
            submission.fields.insert(path.clone(), value.clone());
            submission
                .field_attribution
                .insert(path.clone(), event.actor.clone());
        }
    }
    submission.state = event.state;
    submission.updated_at = event.ts;
    submission.updated_by = event.actor.clone();
    submission.events.push(event.clone());
}
