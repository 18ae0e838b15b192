//! The delivery worker.
//!
//! Consumes [`DeliveryJob`]s, builds the signed webhook body and drives the
//! retry loop. Every attempt, successful or not, is reported back through
//! [`LifecycleManager::record_delivery`], so the attempt history lives on
//! the submission and in the Event Log like any other change.
//!
//! A job is only acted on once its event is part of the stored snapshot:
//! fan-out runs alongside the Event Log append, so a queued job may belong
//! to a change that never landed. Jobs lost to a full queue or a restart
//! are recovered by [`DeliveryWorker::catch_up`], which the run loop calls
//! on an interval.

use crate::dispatcher::{is_delivery_event, DeliveryJob};
use crate::error::DeliveryError;
use crate::guard::UrlGuard;
use crate::headers::sanitize_headers;
use crate::signing::{SIGNATURE_HEADER, Signer, TIMESTAMP_HEADER};
use crate::transport::{OutboundRequest, Transport, is_retryable_status};
use chrono::{DateTime, Utc};
use intake_core::actor::Actor;
use intake_core::collaborators::FieldMap;
use intake_core::delivery::DeliveryRecord;
use intake_core::event::EventType;
use intake_core::ids::{EventId, IntakeId, SubmissionId};
use intake_core::intake::{Destination, IntakeDefinition};
use intake_core::state_machine::SubmissionState;
use intake_core::submission::{ReviewDecision, Submission};
use intake_core::submission_store::{Pagination, SubmissionFilter};
use intake_runtime::lifecycle::LifecycleManager;
use intake_runtime::metrics::DeliveryMetrics;
use reqwest::header::{CONTENT_TYPE, HeaderName, HeaderValue};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinSet;

/// Default number of deliveries processed concurrently.
pub const DEFAULT_MAX_IN_FLIGHT: usize = 16;

/// Default period of the catch-up sweep.
pub const DEFAULT_CATCH_UP_INTERVAL: Duration = Duration::from_secs(60);

/// Default page size of the catch-up sweep.
pub const DEFAULT_CATCH_UP_BATCH: usize = 100;

/// What became of one job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryReport {
    /// Nothing to send: the intake has no destination for this event type,
    /// the event never reached the submission, or its delivery already
    /// settled.
    Skipped,
    /// The destination accepted the payload.
    Delivered {
        /// Attempts made, including the successful one.
        attempts: u32,
        /// Final HTTP status.
        status: u16,
    },
    /// The delivery gave up.
    Failed {
        /// Attempts made.
        attempts: u32,
        /// Reason of the last failure.
        reason: String,
    },
}

/// Webhook body.
///
/// The resume token is deliberately absent: a destination must never be
/// able to mutate the submission it was told about.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct WebhookPayload<'a> {
    event_id: &'a EventId,
    event_type: EventType,
    submission_id: &'a SubmissionId,
    intake_id: &'a IntakeId,
    intake_version: u32,
    state: SubmissionState,
    fields: &'a FieldMap,
    field_attribution: &'a BTreeMap<String, Actor>,
    created_by: &'a Actor,
    updated_by: &'a Actor,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    reviews: &'a [ReviewDecision],
}

impl<'a> WebhookPayload<'a> {
    fn new(job: &'a DeliveryJob, submission: &'a Submission, intake: &IntakeDefinition) -> Self {
        Self {
            event_id: &job.event_id,
            event_type: job.event_type,
            submission_id: &submission.id,
            intake_id: &submission.intake_id,
            intake_version: intake.version,
            state: submission.state,
            fields: &submission.fields,
            field_attribution: &submission.field_attribution,
            created_by: &submission.created_by,
            updated_by: &submission.updated_by,
            created_at: submission.created_at,
            updated_at: submission.updated_at,
            reviews: &submission.reviews,
        }
    }
}

struct AttemptFailure {
    reason: String,
    retryable: bool,
    status: Option<u16>,
}

/// Delivers submissions to their intake's destination.
pub struct DeliveryWorker {
    manager: Arc<LifecycleManager>,
    guard: UrlGuard,
    transport: Arc<dyn Transport>,
    signer: Signer,
    max_in_flight: usize,
    catch_up_interval: Option<Duration>,
    catch_up_batch: usize,
    claimed: Mutex<HashSet<EventId>>,
    sweeping: AtomicBool,
}

/// Marks an event as being delivered; released on drop.
struct Claim<'a> {
    claimed: &'a Mutex<HashSet<EventId>>,
    event_id: EventId,
}

impl Drop for Claim<'_> {
    fn drop(&mut self) {
        self.claimed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.event_id);
    }
}

impl DeliveryWorker {
    /// Create a worker.
    #[must_use]
    pub fn new(
        manager: Arc<LifecycleManager>,
        guard: UrlGuard,
        transport: Arc<dyn Transport>,
        signer: Signer,
    ) -> Self {
        Self {
            manager,
            guard,
            transport,
            signer,
            max_in_flight: DEFAULT_MAX_IN_FLIGHT,
            catch_up_interval: Some(DEFAULT_CATCH_UP_INTERVAL),
            catch_up_batch: DEFAULT_CATCH_UP_BATCH,
            claimed: Mutex::default(),
            sweeping: AtomicBool::new(false),
        }
    }

    /// Limit concurrent deliveries.
    #[must_use]
    pub fn with_max_in_flight(mut self, max_in_flight: usize) -> Self {
        self.max_in_flight = max_in_flight.max(1);
        self
    }

    /// Configure the catch-up sweep; `None` turns it off in [`run`](Self::run).
    #[must_use]
    pub fn with_catch_up(mut self, interval: Option<Duration>, batch_size: usize) -> Self {
        self.catch_up_interval = interval.filter(|i| !i.is_zero());
        self.catch_up_batch = batch_size.max(1);
        self
    }

    /// Deliver one job, retrying per the destination's policy.
    ///
    /// Failed deliveries are reported, not returned as errors.
    ///
    /// # Errors
    ///
    /// Returns [`DeliveryError`] if the submission cannot be loaded, the
    /// body cannot be serialized, or an attempt cannot be recorded.
    #[tracing::instrument(skip(self, job), name = "delivery.deliver", fields(submission_id = %job.submission_id, event_type = %job.event_type))]
    pub async fn deliver(&self, job: &DeliveryJob) -> Result<DeliveryReport, DeliveryError> {
        let submission = self.manager.get_settled(&job.submission_id).await?;
        if !submission.has_event(&job.event_id) {
            tracing::warn!(
                event_id = %job.event_id,
                state = ?submission.state,
                "Triggering event is not part of the submission; skipping delivery"
            );
            return Ok(DeliveryReport::Skipped);
        }
        if submission.delivery_settled(&job.event_id) {
            tracing::debug!(event_id = %job.event_id, "Delivery already settled; skipping");
            return Ok(DeliveryReport::Skipped);
        }

        let intake = self.manager.intake(&submission.intake_id).await?;
        let Some(destination) = intake
            .destination
            .as_ref()
            .filter(|d| d.triggers_on(job.event_type))
        else {
            tracing::debug!("No destination for event; skipping delivery");
            return Ok(DeliveryReport::Skipped);
        };

        let body = serde_json::to_vec(&WebhookPayload::new(job, &submission, &intake))?;
        let policy = &destination.retry;
        let mut attempt = 0;

        loop {
            attempt += 1;
            let failure = match self.attempt(destination, &body).await {
                Ok(status) => {
                    let now = self.manager.clock().now();
                    self.manager
                        .record_delivery(
                            &job.submission_id,
                            DeliveryRecord::succeeded(now, attempt, status).for_event(job.event_id.clone()),
                        )
                        .await?;
                    tracing::info!(attempt, status, "Delivery succeeded");
                    return Ok(DeliveryReport::Delivered { attempts: attempt, status });
                }
                Err(failure) => failure,
            };

            let will_retry = failure.retryable && policy.allows_another(attempt);
            let now = self.manager.clock().now();
            let mut record =
                DeliveryRecord::failed(now, attempt, &failure.reason, failure.retryable, will_retry)
                    .for_event(job.event_id.clone());
            if let Some(status) = failure.status {
                record = record.with_status(status);
            }
            self.manager.record_delivery(&job.submission_id, record).await?;

            if !will_retry {
                tracing::warn!(
                    attempt,
                    retryable = failure.retryable,
                    reason = %failure.reason,
                    "Delivery failed permanently"
                );
                return Ok(DeliveryReport::Failed {
                    attempts: attempt,
                    reason: failure.reason,
                });
            }

            let delay = policy.delay_for_attempt(attempt - 1);
            tracing::debug!(attempt, delay_ms = delay.as_millis(), reason = %failure.reason, "Retrying delivery");
            tokio::time::sleep(delay).await;
        }
    }

    async fn attempt(&self, destination: &Destination, body: &[u8]) -> Result<u16, AttemptFailure> {
        let target = match self.guard.check(&destination.url).await {
            Ok(target) => target,
            Err(error) => {
                if !error.is_retryable() {
                    DeliveryMetrics::record_rejected_destination();
                    tracing::warn!(url = %destination.url, error = %error, "Refused delivery destination");
                }
                return Err(AttemptFailure {
                    reason: error.to_string(),
                    retryable: error.is_retryable(),
                    status: None,
                });
            }
        };

        let timestamp = self.manager.clock().now().timestamp();
        let signature = HeaderValue::from_str(&self.signer.sign(timestamp, body)).map_err(|e| {
            AttemptFailure {
                reason: format!("invalid signature header: {e}"),
                retryable: false,
                status: None,
            }
        })?;

        let mut headers = sanitize_headers(&destination.headers);
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(HeaderName::from_static(SIGNATURE_HEADER), signature);
        headers.insert(HeaderName::from_static(TIMESTAMP_HEADER), HeaderValue::from(timestamp));

        let started = Instant::now();
        let result = self
            .transport
            .send(OutboundRequest {
                target,
                headers,
                body: body.to_vec(),
            })
            .await;

        match result {
            Ok(status) if (200..300).contains(&status) => {
                DeliveryMetrics::record_attempt("succeeded", started.elapsed());
                Ok(status)
            }
            Ok(status) => {
                DeliveryMetrics::record_attempt("error_status", started.elapsed());
                Err(AttemptFailure {
                    reason: format!("destination responded with status {status}"),
                    retryable: is_retryable_status(status),
                    status: Some(status),
                })
            }
            Err(error) => {
                DeliveryMetrics::record_attempt("transport_error", started.elapsed());
                Err(AttemptFailure {
                    reason: error.to_string(),
                    retryable: true,
                    status: None,
                })
            }
        }
    }

    /// Deliver every trigger event whose delivery has not settled.
    ///
    /// Pages through all submissions of intakes with a destination. Events
    /// already being delivered by this worker are left alone, so a sweep and
    /// the queue never deliver the same event concurrently. Returns how many
    /// events were picked up.
    ///
    /// # Errors
    ///
    /// Returns [`DeliveryError`] if submissions cannot be listed. Failures of
    /// single deliveries are logged and the sweep continues.
    #[tracing::instrument(skip(self), name = "delivery.catch_up")]
    pub async fn catch_up(&self) -> Result<usize, DeliveryError> {
        let mut destinations: HashMap<IntakeId, Option<Destination>> = HashMap::new();
        let mut picked_up = 0;
        let mut offset = 0;

        loop {
            let page = self
                .manager
                .list(SubmissionFilter::all(), Pagination::new(offset, self.catch_up_batch))
                .await?;
            let fetched = page.len();

            for submission in page {
                if !destinations.contains_key(&submission.intake_id) {
                    let destination = match self.manager.intake(&submission.intake_id).await {
                        Ok(intake) => intake.destination,
                        Err(error) => {
                            tracing::debug!(intake_id = %submission.intake_id, error = %error, "Intake unavailable; skipping");
                            None
                        }
                    };
                    destinations.insert(submission.intake_id.clone(), destination);
                }
                let Some(Some(destination)) = destinations.get(&submission.intake_id) else {
                    continue;
                };

                let pending: Vec<DeliveryJob> = submission
                    .events
                    .iter()
                    .filter(|e| !is_delivery_event(e.event_type) && destination.triggers_on(e.event_type))
                    .filter(|e| !submission.delivery_settled(&e.event_id))
                    .map(DeliveryJob::from)
                    .collect();

                for job in pending {
                    tracing::info!(
                        submission_id = %job.submission_id,
                        event_id = %job.event_id,
                        "Catching up on undelivered event"
                    );
                    self.handle(job).await;
                    picked_up += 1;
                }
            }

            if fetched < self.catch_up_batch {
                break;
            }
            offset += fetched;
        }

        Ok(picked_up)
    }

    fn claim(&self, event_id: &EventId) -> Option<Claim<'_>> {
        let fresh = self
            .claimed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(event_id.clone());
        fresh.then(|| Claim {
            claimed: &self.claimed,
            event_id: event_id.clone(),
        })
    }

    async fn sweep(&self) {
        match self.catch_up().await {
            Ok(0) => tracing::debug!("Delivery catch-up found nothing"),
            Ok(picked_up) => tracing::info!(picked_up, "Delivery catch-up done"),
            Err(error) => tracing::error!(error = %error, "Delivery catch-up failed"),
        }
        self.sweeping.store(false, Ordering::SeqCst);
    }

    async fn handle(&self, job: DeliveryJob) {
        let Some(_claim) = self.claim(&job.event_id) else {
            tracing::debug!(event_id = %job.event_id, "Delivery already in progress");
            return;
        };
        match self.deliver(&job).await {
            Ok(report) => tracing::debug!(submission_id = %job.submission_id, ?report, "Delivery job done"),
            Err(error) => tracing::error!(
                submission_id = %job.submission_id,
                event_id = %job.event_id,
                error = %error,
                "Delivery job could not be processed"
            ),
        }
    }

    /// Process jobs until the queue closes or `shutdown` flips to `true`.
    ///
    /// A catch-up sweep runs at start and then on the configured interval.
    /// Deliveries still in flight at shutdown are abandoned; their attempts
    /// so far are already recorded and the next sweep resumes them.
    pub async fn run(self: Arc<Self>, mut jobs: mpsc::Receiver<DeliveryJob>, mut shutdown: watch::Receiver<bool>) {
        let mut in_flight = JoinSet::new();
        let mut catch_up = tokio::time::interval(self.catch_up_interval.unwrap_or(DEFAULT_CATCH_UP_INTERVAL));
        catch_up.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        tracing::info!(
            max_in_flight = self.max_in_flight,
            catch_up_interval = ?self.catch_up_interval,
            "Delivery worker started"
        );

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                Some(_) = in_flight.join_next(), if !in_flight.is_empty() => {}
                _ = catch_up.tick(), if self.catch_up_interval.is_some() => {
                    if !self.sweeping.swap(true, Ordering::SeqCst) {
                        let worker = Arc::clone(&self);
                        in_flight.spawn(async move { worker.sweep().await });
                    }
                }
                job = jobs.recv(), if in_flight.len() < self.max_in_flight => {
                    let Some(job) = job else { break };
                    DeliveryMetrics::record_queue_depth(jobs.len());
                    let worker = Arc::clone(&self);
                    in_flight.spawn(async move { worker.handle(job).await });
                }
            }
        }

        if !in_flight.is_empty() {
            tracing::warn!(in_flight = in_flight.len(), "Abandoning in-flight deliveries");
            in_flight.shutdown().await;
        }
        tracing::info!("Delivery worker stopped");
    }
}
