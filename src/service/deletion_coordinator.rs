//! Deletion coordinator
//!
//! Metadata goes first: rows are removed (and cover slots cleared) in one
//! atomic step, and only then are the blobs deleted. A blob deletion that
//! fails is logged and queued for the retry worker; it never turns a
//! committed metadata delete into a user-facing error.

use futures::future::join_all;
use log::{error, info, warn};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use crate::error::{Result, VaultError};
use crate::metadata::{now, MetadataStorage, Photo};
use crate::service::blob_call;
use crate::storage::{BlobFailure, BlobStore};

/// Outcome of a bulk delete
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BulkDeleteResult {
    pub deleted_count: usize,
    pub blob_failures: Vec<BlobFailure>,
    /// Requested ids that matched no photo
    pub not_found: Vec<String>,
}

pub struct DeletionCoordinator {
    metadata: Arc<dyn MetadataStorage>,
    storage: Arc<dyn BlobStore>,
    blob_timeout: Duration,
}

impl DeletionCoordinator {
    pub fn new(metadata: Arc<dyn MetadataStorage>, storage: Arc<dyn BlobStore>, blob_timeout: Duration) -> Self {
        Self {
            metadata,
            storage,
            blob_timeout,
        }
    }

    /// Delete one photo. Returns the removed record.
    pub async fn delete_photo(&self, photo_id: &str) -> Result<Photo> {
        let photo = self
            .metadata
            .delete_photos(&[photo_id.to_string()], now())?
            .into_iter()
            .next()
            .ok_or_else(|| VaultError::NotFound(format!("photo {}", photo_id)))?;
        info!("Deleted photo {} (blob {})", photo.id, photo.blob_id);

        let failures = self.delete_blobs(vec![photo.blob_id.clone()]).await;
        self.queue_retries(&failures);
        Ok(photo)
    }

    /// Delete several photos in one metadata batch, then their blobs
    pub async fn bulk_delete(&self, photo_ids: &[String]) -> Result<BulkDeleteResult> {
        if photo_ids.is_empty() {
            return Err(VaultError::Validation("no photo ids given".to_string()));
        }
        let mut seen = HashSet::new();
        let requested: Vec<String> = photo_ids.iter().filter(|id| seen.insert(id.as_str())).cloned().collect();

        let resolved = self.metadata.get_photos_by_ids(&requested)?;
        let found: HashSet<&str> = resolved.iter().map(|p| p.id.as_str()).collect();
        let not_found: Vec<String> = requested.iter().filter(|id| !found.contains(id.as_str())).cloned().collect();
        let ids: Vec<String> = resolved.iter().map(|p| p.id.clone()).collect();

        let deleted = if ids.is_empty() {
            Vec::new()
        } else {
            self.metadata.delete_photos(&ids, now())?
        };
        info!(
            "Bulk delete removed {} photo(s), {} id(s) not found",
            deleted.len(),
            not_found.len()
        );

        let blob_ids = deleted.iter().map(|p| p.blob_id.clone()).collect();
        let blob_failures = self.delete_blobs(blob_ids).await;
        self.queue_retries(&blob_failures);

        Ok(BulkDeleteResult {
            deleted_count: deleted.len(),
            blob_failures,
            not_found,
        })
    }

    /// Concurrent best-effort blob deletes; returns the failures
    async fn delete_blobs(&self, blob_ids: Vec<String>) -> Vec<BlobFailure> {
        let calls = blob_ids.into_iter().map(|blob_id| {
            let storage = Arc::clone(&self.storage);
            let limit = self.blob_timeout;
            async move {
                let target = blob_id.clone();
                let outcome = blob_call(limit, move || storage.delete(&target)).await;
                (blob_id, outcome)
            }
        });

        join_all(calls)
            .await
            .into_iter()
            .filter_map(|(blob_id, outcome)| match outcome {
                Ok(()) => None,
                Err(e) => {
                    warn!("Failed to delete blob {}: {}", blob_id, e);
                    Some(BlobFailure {
                        blob_id,
                        reason: e.to_string(),
                    })
                }
            })
            .collect()
    }

    fn queue_retries(&self, failures: &[BlobFailure]) {
        if failures.is_empty() {
            return;
        }
        if let Err(e) = self.metadata.queue_blob_deletions(failures, now()) {
            for failure in failures {
                error!("Leaked blob {}: could not queue retry: {}", failure.blob_id, e);
            }
        }
    }
}
