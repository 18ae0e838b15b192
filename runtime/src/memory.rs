//! In-memory storage backends.
//!
//! [`InMemoryEventStore`] and [`InMemorySubmissionStore`] honor the same
//! contracts as the SQL backends (atomic version assignment, duplicate event
//! rejection, unique idempotency keys, newest-first listing). They back the
//! service's `memory` storage mode and the tests of every crate; nothing
//! survives a restart.

use intake_core::environment::{Clock, SystemClock};
use intake_core::event::SubmissionEvent;
use intake_core::event_store::{retention_cutoff, EventFilter, EventStats, EventStore, EventStoreError};
use intake_core::ids::{EventId, SubmissionId, Version};
use intake_core::submission::Submission;
use intake_core::submission_store::{Pagination, StorageError, SubmissionFilter, SubmissionStorage};
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

#[derive(Default)]
struct EventLog {
    streams: HashMap<SubmissionId, Vec<SubmissionEvent>>,
    heads: HashMap<SubmissionId, Version>,
    ids: HashSet<EventId>,
}

/// In-memory Event Log for fast, deterministic testing.
///
/// Clones share the same log.
///
/// # Example
///
/// ```
/// use intake_runtime::memory::InMemoryEventStore;
/// use intake_core::event_store::{EventFilter, EventStore};
/// use intake_core::ids::SubmissionId;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let store = InMemoryEventStore::new();
/// let events = store.get_events(SubmissionId::new("sub_1"), EventFilter::all()).await?;
/// assert!(events.is_empty());
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct InMemoryEventStore {
    log: Arc<RwLock<EventLog>>,
    clock: Arc<dyn Clock>,
    fail_appends: Arc<AtomicBool>,
}

impl InMemoryEventStore {
    /// Create an empty store using the system clock for retention.
    #[must_use]
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Create an empty store whose retention cutoff uses `clock`.
    #[must_use]
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            log: Arc::new(RwLock::new(EventLog::default())),
            clock,
            fail_appends: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Make every subsequent append fail with a database error.
    pub fn set_fail_appends(&self, fail: bool) {
        self.fail_appends.store(fail, Ordering::SeqCst);
    }

    /// Number of stored events across all submissions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.log
            .read()
            .map(|log| log.streams.values().map(Vec::len).sum())
            .unwrap_or(0)
    }

    /// Whether the store holds no events.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn poisoned() -> EventStoreError {
        EventStoreError::DatabaseError("event log lock poisoned".to_string())
    }
}

impl Default for InMemoryEventStore {
    fn default() -> Self {
        Self::new()
    }
}

impl EventStore for InMemoryEventStore {
    fn append_event(
        &self,
        mut event: SubmissionEvent,
        expected_version: Option<Version>,
    ) -> Pin<Box<dyn Future<Output = Result<SubmissionEvent, EventStoreError>> + Send + '_>> {
        Box::pin(async move {
            if self.fail_appends.load(Ordering::SeqCst) {
                return Err(EventStoreError::DatabaseError(
                    "injected append failure".to_string(),
                ));
            }

            let mut log = self.log.write().map_err(|_| Self::poisoned())?;

            if log.ids.contains(&event.event_id) {
                return Err(EventStoreError::DuplicateEventId(event.event_id));
            }

            let current = log
                .heads
                .get(&event.submission_id)
                .copied()
                .unwrap_or(Version::INITIAL);

            if let Some(expected) = expected_version {
                if expected != current {
                    return Err(EventStoreError::ConcurrencyConflict {
                        submission_id: event.submission_id,
                        expected,
                        actual: current,
                    });
                }
            }

            event.version = current.next();
            log.heads.insert(event.submission_id.clone(), event.version);
            log.ids.insert(event.event_id.clone());
            log.streams
                .entry(event.submission_id.clone())
                .or_default()
                .push(event.clone());

            Ok(event)
        })
    }

    fn get_events(
        &self,
        submission_id: SubmissionId,
        filter: EventFilter,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<SubmissionEvent>, EventStoreError>> + Send + '_>> {
        Box::pin(async move {
            let log = self.log.read().map_err(|_| Self::poisoned())?;
            Ok(log
                .streams
                .get(&submission_id)
                .map(|events| filter.apply(events))
                .unwrap_or_default())
        })
    }

    fn latest_version(
        &self,
        submission_id: SubmissionId,
    ) -> Pin<Box<dyn Future<Output = Result<Version, EventStoreError>> + Send + '_>> {
        Box::pin(async move {
            let log = self.log.read().map_err(|_| Self::poisoned())?;
            Ok(log
                .heads
                .get(&submission_id)
                .copied()
                .unwrap_or(Version::INITIAL))
        })
    }

    fn get_stats(&self) -> Pin<Box<dyn Future<Output = Result<EventStats, EventStoreError>> + Send + '_>> {
        Box::pin(async move {
            let log = self.log.read().map_err(|_| Self::poisoned())?;
            let all = log.streams.values().flatten();
            let mut stats = EventStats::default();
            for event in all {
                stats.total_events += 1;
                stats.oldest_event = Some(stats.oldest_event.map_or(event.ts, |t| t.min(event.ts)));
                stats.newest_event = Some(stats.newest_event.map_or(event.ts, |t| t.max(event.ts)));
            }
            stats.submission_count = log.streams.values().filter(|s| !s.is_empty()).count() as u64;
            Ok(stats)
        })
    }

    fn cleanup_old(
        &self,
        threshold: chrono::Duration,
    ) -> Pin<Box<dyn Future<Output = Result<u64, EventStoreError>> + Send + '_>> {
        Box::pin(async move {
            let Some(cutoff) = retention_cutoff(self.clock.now(), threshold) else {
                return Ok(0);
            };
            let mut log = self.log.write().map_err(|_| Self::poisoned())?;
            let EventLog { streams, ids, .. } = &mut *log;

            let mut removed = 0u64;
            for events in streams.values_mut() {
                events.retain(|event| {
                    let keep = event.ts >= cutoff;
                    if !keep {
                        ids.remove(&event.event_id);
                        removed += 1;
                    }
                    keep
                });
            }
            streams.retain(|_, events| !events.is_empty());
            Ok(removed)
        })
    }
}

/// In-memory Submission Store for fast, deterministic testing.
///
/// Clones share the same map.
#[derive(Clone, Default)]
pub struct InMemorySubmissionStore {
    data: Arc<RwLock<HashMap<SubmissionId, Submission>>>,
    fail_saves: Arc<AtomicBool>,
}

impl InMemorySubmissionStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent save fail with a database error.
    pub fn set_fail_saves(&self, fail: bool) {
        self.fail_saves.store(fail, Ordering::SeqCst);
    }

    /// Number of stored submissions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.read().map(|d| d.len()).unwrap_or(0)
    }

    /// Whether the store is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn poisoned() -> StorageError {
        StorageError::DatabaseError("submission store lock poisoned".to_string())
    }

    fn find<F>(&self, predicate: F) -> Result<Option<Submission>, StorageError>
    where
        F: Fn(&Submission) -> bool,
    {
        let data = self.data.read().map_err(|_| Self::poisoned())?;
        Ok(data.values().find(|s| predicate(s)).cloned())
    }
}

impl SubmissionStorage for InMemorySubmissionStore {
    fn get(
        &self,
        id: SubmissionId,
    ) -> Pin<Box<dyn Future<Output = Result<Option<Submission>, StorageError>> + Send + '_>> {
        Box::pin(async move {
            let data = self.data.read().map_err(|_| Self::poisoned())?;
            Ok(data.get(&id).cloned())
        })
    }

    fn get_by_resume_token(
        &self,
        token: String,
    ) -> Pin<Box<dyn Future<Output = Result<Option<Submission>, StorageError>> + Send + '_>> {
        Box::pin(async move { self.find(|s| s.resume_token.as_str() == token) })
    }

    fn get_by_idempotency_key(
        &self,
        key: String,
    ) -> Pin<Box<dyn Future<Output = Result<Option<Submission>, StorageError>> + Send + '_>> {
        Box::pin(async move { self.find(|s| s.idempotency_key.as_deref() == Some(key.as_str())) })
    }

    fn save(
        &self,
        submission: Submission,
    ) -> Pin<Box<dyn Future<Output = Result<(), StorageError>> + Send + '_>> {
        Box::pin(async move {
            if self.fail_saves.load(Ordering::SeqCst) {
                return Err(StorageError::DatabaseError("injected save failure".to_string()));
            }
            let mut data = self.data.write().map_err(|_| Self::poisoned())?;
            if let Some(key) = &submission.idempotency_key {
                let taken = data
                    .values()
                    .any(|s| s.id != submission.id && s.idempotency_key.as_ref() == Some(key));
                if taken {
                    return Err(StorageError::DuplicateIdempotencyKey(key.clone()));
                }
            }
            data.insert(submission.id.clone(), submission);
            Ok(())
        })
    }

    fn delete(
        &self,
        id: SubmissionId,
    ) -> Pin<Box<dyn Future<Output = Result<bool, StorageError>> + Send + '_>> {
        Box::pin(async move {
            let mut data = self.data.write().map_err(|_| Self::poisoned())?;
            Ok(data.remove(&id).is_some())
        })
    }

    fn list(
        &self,
        filter: SubmissionFilter,
        page: Pagination,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<Submission>, StorageError>> + Send + '_>> {
        Box::pin(async move {
            let data = self.data.read().map_err(|_| Self::poisoned())?;
            let mut matching: Vec<&Submission> =
                data.values().filter(|s| filter.matches(s)).collect();
            matching.sort_by(|a, b| {
                b.created_at
                    .cmp(&a.created_at)
                    .then_with(|| b.id.cmp(&a.id))
            });
            Ok(matching
                .into_iter()
                .skip(page.offset)
                .take(page.limit)
                .cloned()
                .collect())
        })
    }

    fn count(
        &self,
        filter: SubmissionFilter,
    ) -> Pin<Box<dyn Future<Output = Result<u64, StorageError>> + Send + '_>> {
        Box::pin(async move {
            let data = self.data.read().map_err(|_| Self::poisoned())?;
            Ok(data.values().filter(|s| filter.matches(s)).count() as u64)
        })
    }
}
