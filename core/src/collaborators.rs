//! Interfaces of external collaborators.
//!
//! The engine does not render forms, normalize schemas or store binary
//! files. It talks to the components that do through these traits:
//!
//! - [`FieldValidator`]: checks field values against an intake schema
//! - [`FileStorage`]: issues and verifies upload URLs
//! - [`IntakeRegistry`]: resolves intake definitions by id
//!
//! Async traits return `Pin<Box<dyn Future>>` so they stay dyn-compatible
//! and can be held as `Arc<dyn Trait>`.

use crate::ids::{IntakeId, SubmissionId};
use crate::intake::{FieldSchema, IntakeDefinition};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// Field values keyed by path.
pub type FieldMap = BTreeMap<String, Value>;

/// Error reported by a collaborator.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CollaboratorError {
    /// The collaborator could not be reached or failed internally.
    #[error("Collaborator unavailable: {0}")]
    Unavailable(String),

    /// The collaborator rejected the request.
    #[error("Collaborator rejected request: {0}")]
    Rejected(String),
}

/// A validation problem with one field.
///
/// Validation problems are data returned to the caller, not errors.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldError {
    /// Field path.
    pub path: String,
    /// Machine-readable code, e.g. `"required"`.
    pub code: String,
    /// Human-readable message.
    pub message: String,
}

impl FieldError {
    /// Create a field error.
    #[must_use]
    pub fn new(path: impl Into<String>, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            code: code.into(),
            message: message.into(),
        }
    }
}

/// Result of validating a set of fields.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationOutcome {
    /// Whether every checked field is valid.
    pub valid: bool,
    /// Problems found.
    #[serde(default)]
    pub errors: Vec<FieldError>,
}

impl ValidationOutcome {
    /// A passing outcome.
    #[must_use]
    pub const fn ok() -> Self {
        Self {
            valid: true,
            errors: Vec::new(),
        }
    }

    /// Build an outcome from a list of errors.
    #[must_use]
    pub fn from_errors(errors: Vec<FieldError>) -> Self {
        Self {
            valid: errors.is_empty(),
            errors,
        }
    }
}

/// Validates field values against a schema.
///
/// Validation is synchronous and side-effect free.
pub trait FieldValidator: Send + Sync {
    /// Validate `fields` against `schema`.
    fn validate(&self, fields: &FieldMap, schema: &FieldSchema) -> ValidationOutcome;
}

/// Metadata of a file about to be uploaded.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileDescriptor {
    /// Original file name.
    pub filename: String,
    /// MIME type.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    /// Size in bytes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size_bytes: Option<u64>,
}

impl FileDescriptor {
    /// A descriptor with only a file name.
    #[must_use]
    pub fn named(filename: impl Into<String>) -> Self {
        Self {
            filename: filename.into(),
            content_type: None,
            size_bytes: None,
        }
    }
}

/// A pre-signed upload target.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadTicket {
    /// Storage-side upload id.
    pub upload_id: String,
    /// URL the client uploads to.
    pub url: String,
    /// When the URL stops working.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

/// Binary file storage.
pub trait FileStorage: Send + Sync {
    /// Issue an upload URL for a file belonging to a submission field.
    ///
    /// # Errors
    ///
    /// Returns [`CollaboratorError`] if the storage cannot issue a URL.
    fn generate_upload_url(
        &self,
        submission_id: SubmissionId,
        field_path: String,
        file: FileDescriptor,
    ) -> Pin<Box<dyn Future<Output = Result<UploadTicket, CollaboratorError>> + Send + '_>>;

    /// Check whether the upload arrived.
    ///
    /// # Errors
    ///
    /// Returns [`CollaboratorError`] if the storage cannot be queried.
    fn verify_upload(
        &self,
        upload_id: String,
    ) -> Pin<Box<dyn Future<Output = Result<bool, CollaboratorError>> + Send + '_>>;

    /// Delete an upload.
    ///
    /// # Errors
    ///
    /// Returns [`CollaboratorError`] if deletion fails.
    fn delete_upload(
        &self,
        upload_id: String,
    ) -> Pin<Box<dyn Future<Output = Result<(), CollaboratorError>> + Send + '_>>;
}

/// Source of intake definitions.
pub trait IntakeRegistry: Send + Sync {
    /// Look up an intake definition.
    ///
    /// Returns `Ok(None)` if no such intake exists.
    ///
    /// # Errors
    ///
    /// Returns [`CollaboratorError`] if the registry cannot be queried.
    fn get(
        &self,
        intake_id: IntakeId,
    ) -> Pin<Box<dyn Future<Output = Result<Option<IntakeDefinition>, CollaboratorError>> + Send + '_>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outcome_validity_follows_errors() {
        assert!(ValidationOutcome::from_errors(Vec::new()).valid);
        let outcome =
            ValidationOutcome::from_errors(vec![FieldError::new("name", "required", "missing")]);
        assert!(!outcome.valid);
        assert_eq!(outcome.errors[0].code, "required");
    }
}
