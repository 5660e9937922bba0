//! Background worker for the blob deletion retry queue
//!
//! Blob deletions that failed after their metadata was already removed are
//! recorded in the metadata store. This worker periodically drains that
//! queue through the blob store's bulk delete. Successful entries are
//! removed; failed ones have their attempt count bumped until they reach
//! `max_attempts`, after which they stay in the table for manual cleanup.

use log::{error, info, warn};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time;

use crate::config::DeletionConfig;
use crate::error::Result;
use crate::metadata::MetadataStorage;
use crate::service::blob_call;
use crate::storage::{BlobFailure, BlobStore, BulkDeleteOutcome};

/// Background blob deletion worker
pub struct BlobDeletionWorker {
    metadata: Arc<dyn MetadataStorage>,
    storage: Arc<dyn BlobStore>,
    batch_size: usize,
    max_attempts: u32,
    retry_interval: Duration,
    blob_timeout: Duration,
}

impl BlobDeletionWorker {
    pub fn new(
        metadata: Arc<dyn MetadataStorage>,
        storage: Arc<dyn BlobStore>,
        config: &DeletionConfig,
        blob_timeout: Duration,
    ) -> Self {
        Self {
            metadata,
            storage,
            batch_size: config.batch_size,
            max_attempts: config.max_attempts,
            retry_interval: Duration::from_secs(config.retry_interval_secs),
            blob_timeout,
        }
    }

    /// Start the worker as a background task (non-blocking)
    pub fn start_background(self) -> tokio::task::JoinHandle<()> {
        info!(
            "Starting blob deletion worker with {}s interval",
            self.retry_interval.as_secs()
        );

        tokio::spawn(async move {
            let mut interval = time::interval(self.retry_interval);

            loop {
                interval.tick().await;

                if let Err(e) = self.run_once().await {
                    error!("Error processing pending blob deletions: {}", e);
                }
            }
        })
    }

    /// Process one batch of the queue. Returns the number of blobs deleted.
    pub async fn run_once(&self) -> Result<usize> {
        let pending = self.metadata.pending_blob_deletions(self.batch_size, self.max_attempts)?;
        if pending.is_empty() {
            return Ok(0);
        }
        info!("Retrying {} pending blob deletion(s)", pending.len());

        // The same blob can be queued more than once
        let mut entries: HashMap<String, Vec<i64>> = HashMap::new();
        for entry in &pending {
            entries.entry(entry.blob_id.clone()).or_default().push(entry.id);
        }
        let blob_ids: Vec<String> = entries.keys().cloned().collect();

        let storage = Arc::clone(&self.storage);
        let batch = blob_ids.clone();
        let limit = self.blob_timeout * blob_ids.len() as u32;
        let outcome = match blob_call(limit, move || Ok(storage.bulk_delete(&batch))).await {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!("Bulk blob delete did not complete: {}", e);
                BulkDeleteOutcome {
                    deleted: Vec::new(),
                    failed: blob_ids
                        .into_iter()
                        .map(|blob_id| BlobFailure {
                            blob_id,
                            reason: e.to_string(),
                        })
                        .collect(),
                }
            }
        };

        let completed: Vec<i64> = outcome
            .deleted
            .iter()
            .filter_map(|blob_id| entries.get(blob_id))
            .flatten()
            .copied()
            .collect();
        let failed: Vec<(i64, String)> = outcome
            .failed
            .iter()
            .filter_map(|failure| entries.get(&failure.blob_id).map(|ids| (ids, &failure.reason)))
            .flat_map(|(ids, reason)| ids.iter().map(move |id| (*id, reason.clone())))
            .collect();

        for failure in &outcome.failed {
            warn!("Blob {} still not deleted: {}", failure.blob_id, failure.reason);
        }
        self.metadata.complete_blob_deletions(&completed)?;
        self.metadata.record_blob_deletion_failures(&failed)?;

        info!(
            "Blob deletion retry: {} deleted, {} failed",
            outcome.deleted.len(),
            outcome.failed.len()
        );
        Ok(outcome.deleted.len())
    }
}
