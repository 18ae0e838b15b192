//! Submission Store trait and related types.
//!
//! The Submission Store keeps the latest snapshot of every submission, keyed
//! by id and reachable by resume token and by create idempotency key.
//!
//! Every backend must enforce:
//!
//! - at most one submission per idempotency key
//! - exact-match resume token lookup
//! - newest-created-first listing, ties broken by id descending

use crate::ids::{IntakeId, SubmissionId};
use crate::state_machine::SubmissionState;
use crate::submission::Submission;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// Errors that can occur during submission storage operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StorageError {
    /// Another submission already uses this idempotency key.
    #[error("Duplicate idempotency key: {0}")]
    DuplicateIdempotencyKey(String),

    /// Database connection or query error.
    #[error("Database error: {0}")]
    DatabaseError(String),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    SerializationError(String),
}

/// Conditions for [`SubmissionStorage::list`] and [`SubmissionStorage::count`].
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmissionFilter {
    /// Only submissions of this intake.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub intake_id: Option<IntakeId>,
    /// Only submissions in one of these states.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub states: Option<Vec<SubmissionState>>,
    /// Only submissions whose TTL elapses at or before this time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_before: Option<DateTime<Utc>>,
    /// Only submissions created at or after this time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_after: Option<DateTime<Utc>>,
    /// Only submissions created before this time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_before: Option<DateTime<Utc>>,
}

impl SubmissionFilter {
    /// Match everything.
    #[must_use]
    pub fn all() -> Self {
        Self::default()
    }

    /// Restrict to one intake.
    #[must_use]
    pub fn for_intake(mut self, intake_id: impl Into<IntakeId>) -> Self {
        self.intake_id = Some(intake_id.into());
        self
    }

    /// Restrict to a set of states.
    #[must_use]
    pub fn in_states(mut self, states: impl IntoIterator<Item = SubmissionState>) -> Self {
        self.states = Some(states.into_iter().collect());
        self
    }

    /// Restrict to non-terminal states.
    #[must_use]
    pub fn live(self) -> Self {
        self.in_states(SubmissionState::ALL.into_iter().filter(|s| !s.is_terminal()))
    }

    /// Restrict to submissions whose TTL elapsed by `at`.
    #[must_use]
    pub const fn expiring_by(mut self, at: DateTime<Utc>) -> Self {
        self.expires_before = Some(at);
        self
    }

    /// Whether `submission` satisfies the filter.
    #[must_use]
    pub fn matches(&self, submission: &Submission) -> bool {
        if let Some(intake_id) = &self.intake_id {
            if submission.intake_id != *intake_id {
                return false;
            }
        }
        if let Some(states) = &self.states {
            if !states.contains(&submission.state) {
                return false;
            }
        }
        if let Some(at) = self.expires_before {
            if !submission.expires_at.is_some_and(|expires| expires <= at) {
                return false;
            }
        }
        if let Some(after) = self.created_after {
            if submission.created_at < after {
                return false;
            }
        }
        if let Some(before) = self.created_before {
            if submission.created_at >= before {
                return false;
            }
        }
        true
    }
}

/// Offset pagination.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pagination {
    /// Rows to skip.
    pub offset: usize,
    /// Maximum rows to return.
    pub limit: usize,
}

impl Pagination {
    /// Default page size.
    pub const DEFAULT_LIMIT: usize = 50;

    /// Build a page request.
    #[must_use]
    pub const fn new(offset: usize, limit: usize) -> Self {
        Self { offset, limit }
    }

    /// The first page of `limit` rows.
    #[must_use]
    pub const fn first(limit: usize) -> Self {
        Self { offset: 0, limit }
    }
}

impl Default for Pagination {
    fn default() -> Self {
        Self::first(Self::DEFAULT_LIMIT)
    }
}

/// Keyed snapshot storage for submissions.
///
/// Uses `Pin<Box<dyn Future>>` returns so backends can be swapped behind
/// `Arc<dyn SubmissionStorage>`.
pub trait SubmissionStorage: Send + Sync {
    /// Load a submission by id.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] if the backend fails.
    fn get(
        &self,
        id: SubmissionId,
    ) -> Pin<Box<dyn Future<Output = Result<Option<Submission>, StorageError>> + Send + '_>>;

    /// Load the submission whose current resume token equals `token` exactly.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] if the backend fails.
    fn get_by_resume_token(
        &self,
        token: String,
    ) -> Pin<Box<dyn Future<Output = Result<Option<Submission>, StorageError>> + Send + '_>>;

    /// Load the submission created with `key`.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] if the backend fails.
    fn get_by_idempotency_key(
        &self,
        key: String,
    ) -> Pin<Box<dyn Future<Output = Result<Option<Submission>, StorageError>> + Send + '_>>;

    /// Insert or replace a snapshot.
    ///
    /// # Errors
    ///
    /// - `DuplicateIdempotencyKey`: another submission owns the key
    /// - `DatabaseError`: the backend failed
    fn save(
        &self,
        submission: Submission,
    ) -> Pin<Box<dyn Future<Output = Result<(), StorageError>> + Send + '_>>;

    /// Delete a snapshot; returns whether it existed.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] if the backend fails.
    fn delete(
        &self,
        id: SubmissionId,
    ) -> Pin<Box<dyn Future<Output = Result<bool, StorageError>> + Send + '_>>;

    /// List matching submissions, newest created first, ties by id descending.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] if the backend fails.
    fn list(
        &self,
        filter: SubmissionFilter,
        page: Pagination,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<Submission>, StorageError>> + Send + '_>>;

    /// Count matching submissions.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] if the backend fails.
    fn count(
        &self,
        filter: SubmissionFilter,
    ) -> Pin<Box<dyn Future<Output = Result<u64, StorageError>> + Send + '_>>;
}
