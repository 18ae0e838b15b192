use crate::{from_millis, to_i64, to_millis};
use intake_core::environment::{Clock, SystemClock};
use intake_core::event::SubmissionEvent;
use intake_core::event_store::{retention_cutoff, EventFilter, EventStats, EventStore, EventStoreError};
use intake_core::ids::{SubmissionId, Version};
use sqlx::sqlite::SqlitePool;
use sqlx::types::Json;
use sqlx::{QueryBuilder, Sqlite};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// Event Log in the `submission_events` table.
///
/// Same algorithm as the Postgres log: the per-submission sequence row is
/// bumped first inside the append transaction, which takes SQLite's write
/// lock and holds it until commit.
#[derive(Clone)]
pub struct SqliteEventStore {
    pool: SqlitePool,
    clock: Arc<dyn Clock>,
}

fn db_error(e: sqlx::Error) -> EventStoreError {
    EventStoreError::DatabaseError(e.to_string())
}

fn to_version(value: i64) -> Result<Version, EventStoreError> {
    u64::try_from(value)
        .map(Version::new)
        .map_err(|_| EventStoreError::DatabaseError(format!("Negative version in database: {value}")))
}

impl SqliteEventStore {
    /// Use an existing pool. Tables must exist (see [`crate::migrate`]).
    #[must_use]
    pub fn from_pool(pool: SqlitePool) -> Self {
        Self {
            pool,
            clock: Arc::new(SystemClock),
        }
    }

    /// Use `clock` for the retention cutoff.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    async fn append(
        &self,
        mut event: SubmissionEvent,
        expected_version: Option<Version>,
    ) -> Result<SubmissionEvent, EventStoreError> {
        let mut tx = self.pool.begin().await.map_err(db_error)?;

        let (assigned,): (i64,) = sqlx::query_as(
            r"
            INSERT INTO submission_versions (submission_id, last_version)
            VALUES (?1, 1)
            ON CONFLICT (submission_id)
            DO UPDATE SET last_version = last_version + 1
            RETURNING last_version
            ",
        )
        .bind(event.submission_id.as_str())
        .fetch_one(&mut *tx)
        .await
        .map_err(db_error)?;

        let assigned = to_version(assigned)?;
        let current = Version::new(assigned.value().saturating_sub(1));

        if let Some(expected) = expected_version {
            if expected != current {
                metrics::counter!("event_log_conflicts_total", "backend" => "sqlite").increment(1);
                return Err(EventStoreError::ConcurrencyConflict {
                    submission_id: event.submission_id,
                    expected,
                    actual: current,
                });
            }
        }

        event.version = assigned;
        let version = i64::try_from(assigned.value())
            .map_err(|_| EventStoreError::DatabaseError("Version overflow".to_string()))?;

        let inserted = sqlx::query(
            r"
            INSERT INTO submission_events
                (event_id, submission_id, version, event_type, actor_kind, ts_ms, event)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            ",
        )
        .bind(event.event_id.as_str())
        .bind(event.submission_id.as_str())
        .bind(version)
        .bind(event.event_type.as_str())
        .bind(event.actor.kind.as_str())
        .bind(to_millis(event.ts))
        .bind(Json(&event))
        .execute(&mut *tx)
        .await;

        match inserted {
            Ok(_) => {}
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => {
                return Err(EventStoreError::DuplicateEventId(event.event_id));
            }
            Err(e) => return Err(db_error(e)),
        }

        tx.commit().await.map_err(db_error)?;

        tracing::debug!(
            submission_id = %event.submission_id,
            event_type = %event.event_type,
            version = event.version.value(),
            "Appended event"
        );
        Ok(event)
    }

    async fn query(
        &self,
        submission_id: SubmissionId,
        filter: EventFilter,
    ) -> Result<Vec<SubmissionEvent>, EventStoreError> {
        let mut qb: QueryBuilder<'_, Sqlite> =
            QueryBuilder::new("SELECT event FROM submission_events WHERE submission_id = ");
        qb.push_bind(submission_id.as_str().to_string());

        if let Some(types) = &filter.types {
            if types.is_empty() {
                qb.push(" AND 1 = 0");
            } else {
                qb.push(" AND event_type IN (");
                let mut names = qb.separated(", ");
                for event_type in types {
                    names.push_bind(event_type.as_str());
                }
                names.push_unseparated(")");
            }
        }
        if let Some(kind) = filter.actor_kind {
            qb.push(" AND actor_kind = ").push_bind(kind.as_str());
        }
        if let Some(since) = filter.since {
            qb.push(" AND ts_ms >= ").push_bind(to_millis(since));
        }
        if let Some(until) = filter.until {
            qb.push(" AND ts_ms < ").push_bind(to_millis(until));
        }

        // SQLite only accepts OFFSET after a LIMIT; -1 means unbounded.
        qb.push(" ORDER BY version ASC LIMIT ")
            .push_bind(filter.limit.map_or(-1, to_i64))
            .push(" OFFSET ")
            .push_bind(to_i64(filter.offset));

        let rows: Vec<(Json<SubmissionEvent>,)> = qb
            .build_query_as()
            .fetch_all(&self.pool)
            .await
            .map_err(db_error)?;
        Ok(rows.into_iter().map(|(Json(event),)| event).collect())
    }

    async fn head(&self, submission_id: SubmissionId) -> Result<Version, EventStoreError> {
        let row: Option<(i64,)> =
            sqlx::query_as("SELECT last_version FROM submission_versions WHERE submission_id = ?1")
                .bind(submission_id.as_str())
                .fetch_optional(&self.pool)
                .await
                .map_err(db_error)?;
        row.map_or(Ok(Version::INITIAL), |(v,)| to_version(v))
    }

    async fn stats(&self) -> Result<EventStats, EventStoreError> {
        let (total, submissions, oldest, newest): (i64, i64, Option<i64>, Option<i64>) = sqlx::query_as(
            "SELECT COUNT(*), COUNT(DISTINCT submission_id), MIN(ts_ms), MAX(ts_ms) FROM submission_events",
        )
        .fetch_one(&self.pool)
        .await
        .map_err(db_error)?;

        Ok(EventStats {
            total_events: u64::try_from(total).unwrap_or(0),
            submission_count: u64::try_from(submissions).unwrap_or(0),
            oldest_event: oldest.and_then(from_millis),
            newest_event: newest.and_then(from_millis),
        })
    }

    async fn cleanup(&self, threshold: chrono::Duration) -> Result<u64, EventStoreError> {
        let Some(cutoff) = retention_cutoff(self.clock.now(), threshold) else {
            tracing::debug!("Retention threshold reaches before any representable time; nothing to remove");
            return Ok(0);
        };
        let result = sqlx::query("DELETE FROM submission_events WHERE ts_ms < ?1")
            .bind(to_millis(cutoff))
            .execute(&self.pool)
            .await
            .map_err(db_error)?;

        let removed = result.rows_affected();
        tracing::info!(removed, %cutoff, "Removed expired events");
        Ok(removed)
    }
}

impl EventStore for SqliteEventStore {
    fn append_event(
        &self,
        event: SubmissionEvent,
        expected_version: Option<Version>,
    ) -> Pin<Box<dyn Future<Output = Result<SubmissionEvent, EventStoreError>> + Send + '_>> {
        Box::pin(self.append(event, expected_version))
    }

    fn get_events(
        &self,
        submission_id: SubmissionId,
        filter: EventFilter,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<SubmissionEvent>, EventStoreError>> + Send + '_>> {
        Box::pin(self.query(submission_id, filter))
    }

    fn latest_version(
        &self,
        submission_id: SubmissionId,
    ) -> Pin<Box<dyn Future<Output = Result<Version, EventStoreError>> + Send + '_>> {
        Box::pin(self.head(submission_id))
    }

    fn get_stats(&self) -> Pin<Box<dyn Future<Output = Result<EventStats, EventStoreError>> + Send + '_>> {
        Box::pin(self.stats())
    }

    fn cleanup_old(
        &self,
        threshold: chrono::Duration,
    ) -> Pin<Box<dyn Future<Output = Result<u64, EventStoreError>> + Send + '_>> {
        Box::pin(self.cleanup(threshold))
    }
}
