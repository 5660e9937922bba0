//! Upload coordinator
//!
//! Blobs are written first, one independent gateway call per item, and only
//! the items that were stored end up in a single batched metadata insert.
//! No photo row ever points at a blob that failed to upload. If the metadata
//! insert itself fails, the written blobs are orphaned: they are logged and
//! returned inside [`VaultError::MetadataCommit`] so the caller can retry the
//! metadata phase with [`UploadCoordinator::commit_uploaded`].

use bytes::Bytes;
use futures::future::join_all;
use log::{error, info, warn};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use crate::error::{Result, VaultError};
use crate::metadata::{format_timestamp, now, Album, MetadataStorage, Photo};
use crate::service::album_registry::AlbumRegistry;
use crate::service::blob_call;
use crate::storage::{BlobStore, UploadedBlob};

/// One payload of an upload batch
#[derive(Debug, Clone)]
pub struct UploadItem {
    pub file_name: String,
    pub data: Bytes,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UploadFailure {
    pub file_name: String,
    pub reason: String,
}

/// Partial-success outcome of an upload batch
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UploadResult {
    pub succeeded: Vec<Photo>,
    pub failed: Vec<UploadFailure>,
}

pub struct UploadCoordinator {
    metadata: Arc<dyn MetadataStorage>,
    storage: Arc<dyn BlobStore>,
    albums: Arc<AlbumRegistry>,
    folder: String,
    max_files: usize,
    blob_timeout: Duration,
}

/// File name without directories or extension
fn title_from_file_name(file_name: &str) -> Option<String> {
    Path::new(file_name)
        .file_stem()
        .and_then(|stem| stem.to_str())
        .map(str::trim)
        .filter(|stem| !stem.is_empty())
        .map(str::to_string)
}

impl UploadCoordinator {
    pub fn new(
        metadata: Arc<dyn MetadataStorage>,
        storage: Arc<dyn BlobStore>,
        albums: Arc<AlbumRegistry>,
        folder: &str,
        max_files: usize,
        blob_timeout: Duration,
    ) -> Self {
        Self {
            metadata,
            storage,
            albums,
            folder: folder.to_string(),
            max_files,
            blob_timeout,
        }
    }

    fn target_album(&self, album_id: Option<&str>) -> Result<Album> {
        match album_id {
            Some(id) => self.albums.get(id),
            None => self.albums.default_album(),
        }
    }

    /// Upload a batch into `album_id` (the default album when `None`).
    ///
    /// Per-item blob failures are reported in the result and never fail the
    /// batch. Errors are returned only when the batch cannot proceed at all.
    pub async fn upload(&self, items: Vec<UploadItem>, album_id: Option<&str>) -> Result<UploadResult> {
        if items.is_empty() {
            return Err(VaultError::Validation("no files to upload".to_string()));
        }
        if items.len() > self.max_files {
            return Err(VaultError::Validation(format!(
                "too many files: {} (max {})",
                items.len(),
                self.max_files
            )));
        }
        let album = self.target_album(album_id)?;
        info!("Uploading {} file(s) into album {}", items.len(), album.id);

        let calls = items.into_iter().map(|item| {
            let storage = Arc::clone(&self.storage);
            let folder = self.folder.clone();
            let limit = self.blob_timeout;
            async move {
                let UploadItem { file_name, data } = item;
                let outcome = if data.is_empty() {
                    Err(VaultError::Validation("empty payload".to_string()))
                } else {
                    blob_call(limit, move || storage.upload(&data, &folder)).await
                };
                (file_name, outcome)
            }
        });
        // Every blob call settles before the metadata phase starts
        let settled = join_all(calls).await;

        let mut uploaded = Vec::new();
        let mut failed = Vec::new();
        for (file_name, outcome) in settled {
            match outcome {
                Ok(blob) => uploaded.push(UploadedBlob { file_name, blob }),
                Err(e) => {
                    warn!("Upload of {} failed: {}", file_name, e);
                    failed.push(UploadFailure {
                        file_name,
                        reason: e.to_string(),
                    });
                }
            }
        }

        let succeeded = self.commit(&album.id, uploaded)?;
        info!(
            "Upload into album {} finished: {} succeeded, {} failed",
            album.id,
            succeeded.len(),
            failed.len()
        );
        Ok(UploadResult { succeeded, failed })
    }

    /// Retry the metadata phase for blobs reported by a failed commit.
    ///
    /// Only the blob ids and file names are taken from the caller; every blob
    /// is looked up in the store again and its stored description is used.
    /// Blobs that already have a photo row are returned as they are, so
    /// replaying a commit that went through is harmless.
    pub async fn commit_uploaded(&self, album_id: &str, uploaded: Vec<UploadedBlob>) -> Result<Vec<Photo>> {
        if uploaded.is_empty() {
            return Err(VaultError::Validation("no uploaded blobs to commit".to_string()));
        }
        if uploaded.len() > self.max_files {
            return Err(VaultError::Validation(format!(
                "too many blobs: {} (max {})",
                uploaded.len(),
                self.max_files
            )));
        }
        let album = self.albums.get(album_id)?;
        info!("Retrying metadata commit of {} blob(s) into album {}", uploaded.len(), album.id);

        let blob_ids: Vec<String> = uploaded.iter().map(|u| u.blob.blob_id.clone()).collect();
        let committed = self.metadata.get_photos_by_blob_ids(&blob_ids)?;
        let already: HashSet<&str> = committed.iter().map(|p| p.blob_id.as_str()).collect();

        let mut seen = HashSet::new();
        let pending: Vec<UploadedBlob> = uploaded
            .into_iter()
            .filter(|u| !already.contains(u.blob.blob_id.as_str()) && seen.insert(u.blob.blob_id.clone()))
            .collect();
        if !committed.is_empty() {
            info!("{} blob(s) were already committed", committed.len());
        }

        let lookups = pending.into_iter().map(|u| {
            let storage = Arc::clone(&self.storage);
            let limit = self.blob_timeout;
            async move {
                let blob_id = u.blob.blob_id.clone();
                let stored = blob_call(limit, move || storage.stat(&blob_id)).await;
                (u.file_name, u.blob.blob_id, stored)
            }
        });
        let mut verified = Vec::new();
        let mut missing = Vec::new();
        for (file_name, blob_id, stored) in join_all(lookups).await {
            match stored? {
                Some(blob) => verified.push(UploadedBlob { file_name, blob }),
                None => missing.push(blob_id),
            }
        }
        if !missing.is_empty() {
            warn!("Refusing to commit unknown blob(s): {}", missing.join(", "));
            return Err(VaultError::Validation(format!(
                "no stored blob for: {}",
                missing.join(", ")
            )));
        }

        let mut photos = committed;
        photos.extend(self.commit(&album.id, verified)?);
        Ok(photos)
    }

    fn commit(&self, album_id: &str, uploaded: Vec<UploadedBlob>) -> Result<Vec<Photo>> {
        if uploaded.is_empty() {
            return Ok(Vec::new());
        }
        let uploaded_at = now();
        let photos: Vec<Photo> = uploaded
            .iter()
            .map(|u| Photo::from_blob(&u.blob, album_id, title_from_file_name(&u.file_name), uploaded_at))
            .collect();

        match self.metadata.insert_photos(&photos) {
            Ok(()) => Ok(photos),
            // Another commit already wrote rows for these blobs; nothing is orphaned
            Err(e @ VaultError::Conflict(_)) => Err(e),
            Err(e) => {
                let at = format_timestamp(&uploaded_at);
                for u in &uploaded {
                    error!(
                        "Orphaned blob {} (file {}) intended for album {} at {}: {}",
                        u.blob.blob_id, u.file_name, album_id, at, e
                    );
                }
                Err(VaultError::MetadataCommit {
                    album_id: album_id.to_string(),
                    uploaded,
                    reason: e.to_string(),
                })
            }
        }
    }
}
