//! In-memory file storage.

use intake_core::collaborators::{CollaboratorError, FileDescriptor, FileStorage, UploadTicket};
use intake_core::ids::SubmissionId;
use std::collections::{BTreeMap, BTreeSet};
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

#[derive(Debug, Clone)]
struct StoredUpload {
    uploaded: bool,
}

#[derive(Default)]
struct Inner {
    uploads: BTreeMap<String, StoredUpload>,
    deleted: BTreeSet<String>,
}

/// File storage that keeps upload state in memory.
///
/// Uploads start unverified; tests call [`mark_uploaded`](Self::mark_uploaded)
/// to simulate the client finishing the upload.
#[derive(Clone, Default)]
pub struct InMemoryFileStorage {
    inner: Arc<Mutex<Inner>>,
    counter: Arc<AtomicU64>,
    fail_deletes: Arc<AtomicBool>,
}

impl InMemoryFileStorage {
    /// Create an empty storage.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate a finished upload.
    pub fn mark_uploaded(&self, upload_id: &str) {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(upload) = inner.uploads.get_mut(upload_id) {
            upload.uploaded = true;
        }
    }

    /// Make deletions fail.
    pub fn set_fail_deletes(&self, fail: bool) {
        self.fail_deletes.store(fail, Ordering::SeqCst);
    }

    /// Ids of deleted uploads.
    #[must_use]
    pub fn deleted(&self) -> Vec<String> {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .deleted
            .iter()
            .cloned()
            .collect()
    }
}

impl FileStorage for InMemoryFileStorage {
    fn generate_upload_url(
        &self,
        submission_id: SubmissionId,
        field_path: String,
        file: FileDescriptor,
    ) -> Pin<Box<dyn Future<Output = Result<UploadTicket, CollaboratorError>> + Send + '_>> {
        Box::pin(async move {
            let n = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
            let upload_id = format!("upl_{n:06}");
            self.inner
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .uploads
                .insert(upload_id.clone(), StoredUpload { uploaded: false });
            Ok(UploadTicket {
                url: format!(
                    "memory://uploads/{submission_id}/{field_path}/{upload_id}/{}",
                    file.filename
                ),
                upload_id,
                expires_at: None,
            })
        })
    }

    fn verify_upload(
        &self,
        upload_id: String,
    ) -> Pin<Box<dyn Future<Output = Result<bool, CollaboratorError>> + Send + '_>> {
        Box::pin(async move {
            let inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
            Ok(inner.uploads.get(&upload_id).is_some_and(|u| u.uploaded))
        })
    }

    fn delete_upload(
        &self,
        upload_id: String,
    ) -> Pin<Box<dyn Future<Output = Result<(), CollaboratorError>> + Send + '_>> {
        Box::pin(async move {
            if self.fail_deletes.load(Ordering::SeqCst) {
                return Err(CollaboratorError::Unavailable("delete disabled".to_string()));
            }
            let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
            inner.uploads.remove(&upload_id);
            inner.deleted.insert(upload_id);
            Ok(())
        })
    }
}

#[cfg(test)]
#[allow(clippy::expect_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn uploads_verify_only_after_marking() {
        let storage = InMemoryFileStorage::new();
        let ticket = storage
            .generate_upload_url(
                SubmissionId::new("sub_1"),
                "id_document".to_string(),
                FileDescriptor::named("passport.pdf"),
            )
            .await
            .expect("ticket");

        assert!(!storage.verify_upload(ticket.upload_id.clone()).await.expect("verify"));
        storage.mark_uploaded(&ticket.upload_id);
        assert!(storage.verify_upload(ticket.upload_id.clone()).await.expect("verify"));

        storage.delete_upload(ticket.upload_id.clone()).await.expect("delete");
        assert_eq!(storage.deleted(), vec![ticket.upload_id]);
    }
}
