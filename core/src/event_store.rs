//! Event Log trait and related types.
//!
//! The Event Log is the append-only source of truth of the engine. Each
//! submission owns a gapless sequence of versioned events; the log assigns the
//! version atomically and refuses an event whose id it has already stored.
//!
//! # Implementations
//!
//! - `InMemoryEventStore` (in `intake-runtime`): volatile, for tests and local runs
//! - `SqliteEventStore` (in `intake-sqlite`): embedded, file-backed
//! - `PostgresEventStore` (in `intake-postgres`): networked, production
//!
//! # Example
//!
//! ```no_run
//! use intake_core::event_store::{EventFilter, EventStore, EventStoreError};
//! use intake_core::event::SubmissionEvent;
//! use intake_core::ids::SubmissionId;
//!
//! async fn example(store: &dyn EventStore, event: SubmissionEvent) -> Result<(), EventStoreError> {
//!     let expected = event.version.value().checked_sub(1).map(Into::into);
//!     let stored = store.append_event(event, expected).await?;
//!
//!     let history = store
//!         .get_events(stored.submission_id.clone(), EventFilter::default())
//!         .await?;
//!     assert_eq!(history.last().map(|e| e.version), Some(stored.version));
//!     Ok(())
//! }
//! ```

use crate::actor::ActorKind;
use crate::event::{EventType, SubmissionEvent};
use crate::ids::{EventId, SubmissionId, Version};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// Errors that can occur during event store operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EventStoreError {
    /// An event with this id is already stored.
    #[error("Duplicate event id: {0}")]
    DuplicateEventId(EventId),

    /// Optimistic concurrency conflict: the log moved past the expected version.
    #[error("Concurrency conflict on {submission_id}: expected version {expected}, found {actual}")]
    ConcurrencyConflict {
        /// The submission whose log moved on.
        submission_id: SubmissionId,
        /// The version the writer expected.
        expected: Version,
        /// The version actually stored.
        actual: Version,
    },

    /// Database connection or query error.
    #[error("Database error: {0}")]
    DatabaseError(String),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    SerializationError(String),
}

/// Query filter for [`EventStore::get_events`].
///
/// All conditions are conjunctive; unset conditions match everything.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventFilter {
    /// Only these event types.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub types: Option<Vec<EventType>>,
    /// Only events caused by this kind of actor.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actor_kind: Option<ActorKind>,
    /// Only events at or after this time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub since: Option<DateTime<Utc>>,
    /// Only events before this time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub until: Option<DateTime<Utc>>,
    /// Number of matching events to skip.
    #[serde(default)]
    pub offset: usize,
    /// Maximum number of events to return.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
}

impl EventFilter {
    /// Match everything.
    #[must_use]
    pub fn all() -> Self {
        Self::default()
    }

    /// Restrict to a set of event types.
    #[must_use]
    pub fn with_types(mut self, types: impl IntoIterator<Item = EventType>) -> Self {
        self.types = Some(types.into_iter().collect());
        self
    }

    /// Restrict to one actor kind.
    #[must_use]
    pub const fn with_actor_kind(mut self, kind: ActorKind) -> Self {
        self.actor_kind = Some(kind);
        self
    }

    /// Restrict to a time range `[since, until)`.
    #[must_use]
    pub const fn between(mut self, since: Option<DateTime<Utc>>, until: Option<DateTime<Utc>>) -> Self {
        self.since = since;
        self.until = until;
        self
    }

    /// Page through matching events.
    #[must_use]
    pub const fn paged(mut self, offset: usize, limit: usize) -> Self {
        self.offset = offset;
        self.limit = Some(limit);
        self
    }

    /// Whether `event` satisfies the non-paging conditions.
    #[must_use]
    pub fn matches(&self, event: &SubmissionEvent) -> bool {
        if let Some(types) = &self.types {
            if !types.contains(&event.event_type) {
                return false;
            }
        }
        if let Some(kind) = self.actor_kind {
            if event.actor.kind != kind {
                return false;
            }
        }
        if let Some(since) = self.since {
            if event.ts < since {
                return false;
            }
        }
        if let Some(until) = self.until {
            if event.ts >= until {
                return false;
            }
        }
        true
    }

    /// Apply the filter, including paging, to events already in version order.
    #[must_use]
    pub fn apply<'a>(&self, events: impl IntoIterator<Item = &'a SubmissionEvent>) -> Vec<SubmissionEvent> {
        events
            .into_iter()
            .filter(|e| self.matches(e))
            .skip(self.offset)
            .take(self.limit.unwrap_or(usize::MAX))
            .cloned()
            .collect()
    }
}

/// Aggregate numbers about the Event Log.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventStats {
    /// Number of stored events.
    pub total_events: u64,
    /// Number of submissions with at least one event.
    pub submission_count: u64,
    /// Timestamp of the oldest event.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub oldest_event: Option<DateTime<Utc>>,
    /// Timestamp of the newest event.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub newest_event: Option<DateTime<Utc>>,
}

/// Append-only, per-submission-versioned event storage.
///
/// # Dyn Compatibility
///
/// This trait uses explicit `Pin<Box<dyn Future>>` returns instead of `async fn`
/// so it can be held as `Arc<dyn EventStore>` and chosen at startup.
pub trait EventStore: Send + Sync {
    /// Append one event.
    ///
    /// The stored version is assigned by the log as `max + 1` for the
    /// submission, atomically. The caller-supplied `event.version` is
    /// overwritten; the returned event carries the assigned version.
    ///
    /// # Optimistic Concurrency
    ///
    /// - `Some(version)`: assert the submission's log is currently at this version
    /// - `None`: append unconditionally
    ///
    /// # Errors
    ///
    /// - `DuplicateEventId`: the event id is already stored
    /// - `ConcurrencyConflict`: the log is not at `expected_version`
    /// - `DatabaseError`: the backend failed
    fn append_event(
        &self,
        event: SubmissionEvent,
        expected_version: Option<Version>,
    ) -> Pin<Box<dyn Future<Output = Result<SubmissionEvent, EventStoreError>> + Send + '_>>;

    /// Events of one submission matching `filter`, in ascending version order.
    ///
    /// An unknown submission yields an empty list.
    ///
    /// # Errors
    ///
    /// - `DatabaseError`: the backend failed
    /// - `SerializationError`: a stored event could not be decoded
    fn get_events(
        &self,
        submission_id: SubmissionId,
        filter: EventFilter,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<SubmissionEvent>, EventStoreError>> + Send + '_>>;

    /// Highest stored version of a submission, [`Version::INITIAL`] if none.
    ///
    /// # Errors
    ///
    /// - `DatabaseError`: the backend failed
    fn latest_version(
        &self,
        submission_id: SubmissionId,
    ) -> Pin<Box<dyn Future<Output = Result<Version, EventStoreError>> + Send + '_>>;

    /// Totals over the whole log.
    ///
    /// # Errors
    ///
    /// - `DatabaseError`: the backend failed
    fn get_stats(&self) -> Pin<Box<dyn Future<Output = Result<EventStats, EventStoreError>> + Send + '_>>;

    /// Delete events older than `now - threshold`; returns how many were deleted.
    ///
    /// # Errors
    ///
    /// - `DatabaseError`: the backend failed
    fn cleanup_old(
        &self,
        threshold: chrono::Duration,
    ) -> Pin<Box<dyn Future<Output = Result<u64, EventStoreError>> + Send + '_>>;
}

/// The instant before which events are old enough to delete.
///
/// `None` when `now - threshold` falls outside the representable range;
/// nothing is that old, so callers delete nothing.
#[must_use]
pub fn retention_cutoff(now: DateTime<Utc>, threshold: chrono::Duration) -> Option<DateTime<Utc>> {
    now.checked_sub_signed(threshold)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actor::Actor;
    use crate::state_machine::SubmissionState;

    fn event(version: u64, event_type: EventType, actor: Actor) -> SubmissionEvent {
        SubmissionEvent::new(
            EventId::new(format!("evt_{version}")),
            event_type,
            SubmissionId::new("sub_1"),
            DateTime::<Utc>::UNIX_EPOCH + chrono::Duration::seconds(i64::try_from(version).unwrap_or(0)),
            actor,
            SubmissionState::InProgress,
            Version::new(version),
        )
    }

    #[test]
    fn retention_cutoff_saturates_to_nothing() {
        let now = DateTime::<Utc>::UNIX_EPOCH;
        assert_eq!(
            retention_cutoff(now, chrono::Duration::days(1)),
            Some(now - chrono::Duration::days(1))
        );
        assert_eq!(retention_cutoff(now, chrono::Duration::MAX), None);
    }

    #[test]
    fn concurrency_conflict_error_display() {
        let error = EventStoreError::ConcurrencyConflict {
            submission_id: SubmissionId::new("sub_1"),
            expected: Version::new(5),
            actual: Version::new(7),
        };

        let display = format!("{error}");
        assert!(display.contains("expected version 5"));
        assert!(display.contains("found 7"));
    }

    #[test]
    fn filter_by_type_actor_and_time() {
        let events = vec![
            event(1, EventType::SubmissionCreated, Actor::agent("bot")),
            event(2, EventType::FieldUpdated, Actor::agent("bot")),
            event(3, EventType::FieldUpdated, Actor::human("alice")),
            event(4, EventType::SubmissionSubmitted, Actor::human("alice")),
        ];

        let updates = EventFilter::all().with_types([EventType::FieldUpdated]).apply(&events);
        assert_eq!(updates.len(), 2);

        let human = EventFilter::all().with_actor_kind(ActorKind::Human).apply(&events);
        assert_eq!(human.iter().map(|e| e.version.value()).collect::<Vec<_>>(), vec![3, 4]);

        let window = EventFilter::all()
            .between(Some(events[1].ts), Some(events[3].ts))
            .apply(&events);
        assert_eq!(window.iter().map(|e| e.version.value()).collect::<Vec<_>>(), vec![2, 3]);
    }

    #[test]
    fn filter_pages_after_matching() {
        let events: Vec<_> = (1..=6)
            .map(|v| event(v, EventType::FieldUpdated, Actor::agent("bot")))
            .collect();
        let page = EventFilter::all().paged(2, 3).apply(&events);
        assert_eq!(page.iter().map(|e| e.version.value()).collect::<Vec<_>>(), vec![3, 4, 5]);
    }
}
