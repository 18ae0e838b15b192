//! `PostgreSQL` Submission Store.

use intake_core::ids::SubmissionId;
use intake_core::submission::Submission;
use intake_core::submission_store::{Pagination, StorageError, SubmissionFilter, SubmissionStorage};
use sqlx::postgres::PgPool;
use sqlx::types::Json;
use sqlx::{Postgres, QueryBuilder};
use std::future::Future;
use std::pin::Pin;

/// Snapshot store backed by the `submissions` table.
///
/// The full snapshot lives in a JSONB column. Lookup and listing columns are
/// copied out of it on every save so they can be indexed; the
/// `idempotency_key` column carries a unique constraint.
#[derive(Clone)]
pub struct PostgresSubmissionStore {
    pool: PgPool,
}

fn db_error(e: sqlx::Error) -> StorageError {
    StorageError::DatabaseError(e.to_string())
}

fn to_i64(value: usize) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

/// Append the `WHERE` conditions of `filter`.
fn push_filter(qb: &mut QueryBuilder<'_, Postgres>, filter: &SubmissionFilter) {
    qb.push(" WHERE 1 = 1");
    if let Some(intake_id) = &filter.intake_id {
        qb.push(" AND intake_id = ").push_bind(intake_id.as_str().to_string());
    }
    if let Some(states) = &filter.states {
        if states.is_empty() {
            qb.push(" AND 1 = 0");
        } else {
            let names: Vec<String> = states.iter().map(|s| s.as_str().to_string()).collect();
            qb.push(" AND state = ANY(").push_bind(names).push(")");
        }
    }
    if let Some(at) = filter.expires_before {
        qb.push(" AND expires_at IS NOT NULL AND expires_at <= ").push_bind(at);
    }
    if let Some(after) = filter.created_after {
        qb.push(" AND created_at >= ").push_bind(after);
    }
    if let Some(before) = filter.created_before {
        qb.push(" AND created_at < ").push_bind(before);
    }
}

impl PostgresSubmissionStore {
    /// Use an existing pool. Tables must exist (see [`crate::migrate`]).
    #[must_use]
    pub const fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// The underlying pool.
    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn fetch_one_by(&self, column: &str, value: String) -> Result<Option<Submission>, StorageError> {
        let mut qb: QueryBuilder<'_, Postgres> = QueryBuilder::new("SELECT snapshot FROM submissions WHERE ");
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
                 created_at, updated_at, expires_at, snapshot)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (id) DO UPDATE SET
                intake_id = EXCLUDED.intake_id,
                state = EXCLUDED.state,
                resume_token = EXCLUDED.resume_token,
                idempotency_key = EXCLUDED.idempotency_key,
                updated_at = EXCLUDED.updated_at,
                expires_at = EXCLUDED.expires_at,
                snapshot = EXCLUDED.snapshot
            ",
        )
        .bind(submission.id.as_str())
        .bind(submission.intake_id.as_str())
        .bind(submission.state.as_str())
        .bind(submission.resume_token.as_str())
        .bind(submission.idempotency_key.as_deref())
        .bind(submission.created_at)
        .bind(submission.updated_at)
        .bind(submission.expires_at)
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
        let result = sqlx::query("DELETE FROM submissions WHERE id = $1")
            .bind(id.as_str())
            .execute(&self.pool)
            .await
            .map_err(db_error)?;
        Ok(result.rows_affected() > 0)
    }

    async fn select(&self, filter: SubmissionFilter, page: Pagination) -> Result<Vec<Submission>, StorageError> {
        let mut qb: QueryBuilder<'_, Postgres> = QueryBuilder::new("SELECT snapshot FROM submissions");
        push_filter(&mut qb, &filter);
        qb.push(" ORDER BY created_at DESC, id DESC LIMIT ")
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
        let mut qb: QueryBuilder<'_, Postgres> = QueryBuilder::new("SELECT COUNT(*) FROM submissions");
        push_filter(&mut qb, &filter);

        let (count,): (i64,) = qb
            .build_query_as()
            .fetch_one(&self.pool)
            .await
            .map_err(db_error)?;
        Ok(u64::try_from(count).unwrap_or(0))
    }
}

impl SubmissionStorage for PostgresSubmissionStore {
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
