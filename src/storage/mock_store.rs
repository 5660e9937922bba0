//! Mock implementation of BlobStore for testing

use crate::error::{Result, VaultError};
use crate::storage::{BlobStore, StoredBlob};
use log::info;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

#[derive(Default)]
struct MockState {
    // blob_id -> bytes
    blobs: HashMap<String, Vec<u8>>,
    // payloads containing one of these markers fail to upload
    failing_upload_markers: Vec<Vec<u8>>,
    // payloads containing the marker sleep before uploading
    slow_upload_markers: Vec<(Vec<u8>, Duration)>,
    failing_deletes: HashSet<String>,
}

/// In-memory blob store with failure injection
#[derive(Clone, Default)]
pub struct MockBlobStore {
    state: Arc<Mutex<MockState>>,
    next_id: Arc<AtomicU64>,
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    !needle.is_empty() && haystack.windows(needle.len()).any(|window| window == needle)
}

fn describe(blob_id: &str, data: &[u8]) -> StoredBlob {
    StoredBlob {
        blob_id: blob_id.to_string(),
        url: format!("mock://{}", blob_id),
        thumbnail_url: Some(format!("mock://thumbs/{}", blob_id)),
        width: 640,
        height: 480,
        size_bytes: data.len() as u64,
        format: "jpg".to_string(),
    }
}

impl MockBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        // A poisoned mock only happens after a test already panicked.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Uploads whose payload contains `marker` fail
    pub fn fail_uploads_containing(&self, marker: &[u8]) {
        self.lock().failing_upload_markers.push(marker.to_vec());
    }

    /// Uploads whose payload contains `marker` take `delay` first
    pub fn slow_uploads_containing(&self, marker: &[u8], delay: Duration) {
        self.lock().slow_upload_markers.push((marker.to_vec(), delay));
    }

    /// Deleting `blob_id` fails until [`MockBlobStore::heal_delete`] is called
    pub fn fail_delete_of(&self, blob_id: &str) {
        self.lock().failing_deletes.insert(blob_id.to_string());
    }

    pub fn heal_delete(&self, blob_id: &str) {
        self.lock().failing_deletes.remove(blob_id);
    }

    pub fn contains_blob(&self, blob_id: &str) -> bool {
        self.lock().blobs.contains_key(blob_id)
    }

    pub fn blob_count(&self) -> usize {
        self.lock().blobs.len()
    }

    pub fn blob_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.lock().blobs.keys().cloned().collect();
        ids.sort();
        ids
    }
}

impl BlobStore for MockBlobStore {
    fn upload(&self, data: &[u8], folder: &str) -> Result<StoredBlob> {
        let delay = {
            let state = self.lock();
            if state.failing_upload_markers.iter().any(|m| contains(data, m)) {
                return Err(VaultError::BlobStore("mock: upload rejected".to_string()));
            }
            state
                .slow_upload_markers
                .iter()
                .find(|(m, _)| contains(data, m))
                .map(|(_, delay)| *delay)
        };
        if let Some(delay) = delay {
            std::thread::sleep(delay);
        }

        let n = self.next_id.fetch_add(1, Ordering::SeqCst);
        let blob_id = format!("{}/mock-{}", folder, n);
        self.lock().blobs.insert(blob_id.clone(), data.to_vec());
        info!("Mock: stored blob {} with size {}", blob_id, data.len());

        Ok(describe(&blob_id, data))
    }

    fn stat(&self, blob_id: &str) -> Result<Option<StoredBlob>> {
        Ok(self.lock().blobs.get(blob_id).map(|data| describe(blob_id, data)))
    }

    fn delete(&self, blob_id: &str) -> Result<()> {
        let mut state = self.lock();
        if state.failing_deletes.contains(blob_id) {
            return Err(VaultError::BlobStore(format!("mock: delete of {} rejected", blob_id)));
        }
        state.blobs.remove(blob_id);
        info!("Mock: deleted blob {}", blob_id);
        Ok(())
    }
}
