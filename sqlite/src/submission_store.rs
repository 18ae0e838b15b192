use crate::{to_i64, to_millis};
use intake_core::ids::SubmissionId;
use intake_core::submission::Submission;
use intake_core::submission_store::{Pagination, StorageError, SubmissionFilter, SubmissionStorage};
use sqlx::sqlite::SqlitePool;
use sqlx::types::Json;
use sqlx::{QueryBuilder, Sqlite};
use std::future::Future;
use std::pin::Pin;

/// Snapshot store in the `submissions` table.
#[derive(Clone)]
pub struct SqliteSubmissionStore {
    pool: SqlitePool,
}

fn db_error(e: sqlx::Error) -> StorageError {
    StorageError::DatabaseError(e.to_string())
}

fn push_filter(qb: &mut QueryBuilder<'_, Sqlite>, filter: &SubmissionFilter) {
    qb.push(" WHERE 1 = 1");
    if let Some(intake_id) = &filter.intake_id {
        qb.push(" AND intake_id = ").push_bind(intake_id.as_str().to_string());
    }
    if let Some(states) = &filter.states {
        if states.is_empty() {
            qb.push(" AND 1 = 0");
        } else {
            qb.push(" AND state IN (");
            let mut names = qb.separated(", ");
            for state in states {
                names.push_bind(state.as_str());
            }
            names.push_unseparated(")");
        }
    }
    if let Some(at) = filter.expires_before {
        qb.push(" AND expires_at_ms IS NOT NULL AND expires_at_ms <= ")
            .push_bind(to_millis(at));
    }
    if let Some(after) = filter.created_after {
        qb.push(" AND created_at_ms >= ").push_bind(to_millis(after));
    }
    if let Some(before) = filter.created_before {
        qb.push(" AND created_at_ms < ").push_bind(to_millis(before));
    }
}

impl SqliteSubmissionStore {
    /// Use an existing pool. Tables must exist (see [`crate::migrate`]).
    #[must_use]
    pub const fn from_pool(pool: SqlitePool) -> Self {
        Self { pool }
    }

    async fn fetch_one_by(&self, column: &str, value: String) -> Result<Option<Submission>, StorageError> {
        let mut qb: QueryBuilder<'_, Sqlite> = QueryBuilder::new("SELECT snapshot FROM submissions WHERE ");
        qb.push(column).push(" = ").push_bind(value);

        let row: Option<(Json<Submission>,)> = qb
            .build_query_as()
            .fetch_optional(&self.pool)
            .await
            .map_err(db_error)?;
        Ok(row.map(|(Json(submission),)| submission))
    }

    async fn upsert(&self, submission: Submission) -> Result<(), StorageError> {
        let result = sqlx::query(
            r"
            INSERT INTO submissions
                (id, intake_id, state, resume_token, idempotency_key,
                 created_at_ms, updated_at_ms, expires_at_ms, snapshot)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            ON CONFLICT (id) DO UPDATE SET
                intake_id = excluded.intake_id,
                state = excluded.state,
                resume_token = excluded.resume_token,
                idempotency_key = excluded.idempotency_key,
                updated_at_ms = excluded.updated_at_ms,
                expires_at_ms = excluded.expires_at_ms,
                snapshot = excluded.snapshot
            ",
        )
        .bind(submission.id.as_str())
        .bind(submission.intake_id.as_str())
        .bind(submission.state.as_str())
        .bind(submission.resume_token.as_str())
        .bind(submission.idempotency_key.as_deref())
        .bind(to_millis(submission.created_at))
        .bind(to_millis(submission.updated_at))
        .bind(submission.expires_at.map(to_millis))
        .bind(Json(&submission))
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => Err(
                StorageError::DuplicateIdempotencyKey(submission.idempotency_key.unwrap_or_default()),
            ),
            Err(e) => Err(db_error(e)),
        }
    }

    async fn remove(&self, id: SubmissionId) -> Result<bool, StorageError> {
        let result = sqlx::query("DELETE FROM submissions WHERE id = ?1")
            .bind(id.as_str())
            .execute(&self.pool)
            .await
            .map_err(db_error)?;
        Ok(result.rows_affected() > 0)
    }

    async fn select(&self, filter: SubmissionFilter, page: Pagination) -> Result<Vec<Submission>, StorageError> {
        let mut qb: QueryBuilder<'_, Sqlite> = QueryBuilder::new("SELECT snapshot FROM submissions");
        push_filter(&mut qb, &filter);
        qb.push(" ORDER BY created_at_ms DESC, id DESC LIMIT ")
            .push_bind(to_i64(page.limit))
            .push(" OFFSET ")
            .push_bind(to_i64(page.offset));

        let rows: Vec<(Json<Submission>,)> = qb
            .build_query_as()
            .fetch_all(&self.pool)
            .await
            .map_err(db_error)?;
        Ok(rows.into_iter().map(|(Json(submission),)| submission).collect())
    }

    async fn tally(&self, filter: SubmissionFilter) -> Result<u64, StorageError> {
        let mut qb: QueryBuilder<'_, Sqlite> = QueryBuilder::new("SELECT COUNT(*) FROM submissions");
        push_filter(&mut qb, &filter);

        let (count,): (i64,) = qb
            .build_query_as()
            .fetch_one(&self.pool)
            .await
            .map_err(db_error)?;
        Ok(u64::try_from(count).unwrap_or(0))
    }
}

impl SubmissionStorage for SqliteSubmissionStore {
    fn get(
        &self,
        id: SubmissionId,
    ) -> Pin<Box<dyn Future<Output = Result<Option<Submission>, StorageError>> + Send + '_>> {
        Box::pin(self.fetch_one_by("id", id.as_str().to_string()))
    }

    fn get_by_resume_token(
        &self,
        token: String,
    ) -> Pin<Box<dyn Future<Output = Result<Option<Submission>, StorageError>> + Send + '_>> {
        Box::pin(self.fetch_one_by("resume_token", token))
    }

    fn get_by_idempotency_key(
        &self,
        key: String,
    ) -> Pin<Box<dyn Future<Output = Result<Option<Submission>, StorageError>> + Send + '_>> {
        Box::pin(self.fetch_one_by("idempotency_key", key))
    }

    fn save(&self, submission: Submission) -> Pin<Box<dyn Future<Output = Result<(), StorageError>> + Send + '_>> {
        Box::pin(self.upsert(submission))
    }

    fn delete(&self, id: SubmissionId) -> Pin<Box<dyn Future<Output = Result<bool, StorageError>> + Send + '_>> {
        Box::pin(self.remove(id))
    }

    fn list(
        &self,
        filter: SubmissionFilter,
        page: Pagination,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<Submission>, StorageError>> + Send + '_>> {
        Box::pin(self.select(filter, page))
    }

    fn count(&self, filter: SubmissionFilter) -> Pin<Box<dyn Future<Output = Result<u64, StorageError>> + Send + '_>> {
        Box::pin(self.tally(filter))
    }
}
