//! Blob Store Gateway Abstraction
//!
//! This module provides an abstraction over the binary object store that
//! holds photo bytes. The rest of the system only consumes the narrow
//! upload/delete contract defined by [`BlobStore`]; the backends decide where
//! bytes actually live (local disk, in-memory for tests, ...).

pub mod local_store;
pub mod mock_store;


use log::info;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::config::{StorageBackend, StorageConfig};
use crate::error::Result;
use local_store::LocalBlobStore;
use mock_store::MockBlobStore;

/// What the blob store hands back after a successful write
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StoredBlob {
    /// Stable identifier used for later deletion
    pub blob_id: String,
    /// Servable URL
    pub url: String,
    pub thumbnail_url: Option<String>,
    pub width: u32,
    pub height: u32,
    pub size_bytes: u64,
    /// Format tag, e.g. "jpeg" or "png"
    pub format: String,
}

/// A blob that was written for a named upload item
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UploadedBlob {
    pub file_name: String,
    pub blob: StoredBlob,
}

/// Per-blob failure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BlobFailure {
    pub blob_id: String,
    pub reason: String,
}

/// Outcome of a bulk delete; every id ends up in exactly one list
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct BulkDeleteOutcome {
    pub deleted: Vec<String>,
    pub failed: Vec<BlobFailure>,
}

/// Trait defining the blob store interface
pub trait BlobStore: Send + Sync {
    /// Store a payload under the given folder hint
    fn upload(&self, data: &[u8], folder: &str) -> Result<StoredBlob>;

    /// Describe a stored blob, `None` if nothing is stored under the id
    fn stat(&self, blob_id: &str) -> Result<Option<StoredBlob>>;

    /// Delete a blob by its stable identifier
    fn delete(&self, blob_id: &str) -> Result<()>;

    /// Delete several blobs; failures are per item
    fn bulk_delete(&self, blob_ids: &[String]) -> BulkDeleteOutcome {
        let mut outcome = BulkDeleteOutcome::default();
        for blob_id in blob_ids {
            match self.delete(blob_id) {
                Ok(()) => outcome.deleted.push(blob_id.clone()),
                Err(e) => outcome.failed.push(BlobFailure {
                    blob_id: blob_id.clone(),
                    reason: e.to_string(),
                }),
            }
        }
        outcome
    }
}

/// Create a blob store instance based on the configuration
pub fn create_store(config: &StorageConfig) -> Result<Arc<dyn BlobStore>> {
    match config.backend {
        StorageBackend::Local => {
            info!(
                "Using local blob store with base_path: {}, public_base_url: {}",
                config.base_path, config.public_base_url
            );
            Ok(Arc::new(LocalBlobStore::new(config)?))
        }
        StorageBackend::Mock => {
            info!("Using mock blob store");
            Ok(Arc::new(MockBlobStore::new()))
        }
    }
}
