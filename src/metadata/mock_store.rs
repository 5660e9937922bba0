//! Mock implementation of MetadataStorage trait for testing
//!
//! Each operation holds the state lock for its whole duration, which gives
//! the same all-or-nothing behaviour as the SQLite transactions.

use crate::error::{Result, VaultError};
use crate::metadata::{
    photo_matches_search, Album, AlbumPatch, AlbumScope, AlbumSummary, MetadataStorage, PendingBlobDeletion,
    Photo, PhotoFilter, PhotoPatch, DEFAULT_ALBUM_NAME,
};
use crate::storage::BlobFailure;
use chrono::{DateTime, Utc};
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use std::sync::{Arc, Mutex, MutexGuard};

#[derive(Default)]
struct MockState {
    albums: HashMap<String, Album>,
    photos: HashMap<String, Photo>,
    pending: Vec<PendingBlobDeletion>,
    next_pending_id: i64,
}

impl MockState {
    fn clear_cover_everywhere(&mut self, photo_id: &str, except: Option<&str>, updated_at: DateTime<Utc>) {
        for album in self.albums.values_mut() {
            if album.cover_photo_id.as_deref() == Some(photo_id) && Some(album.id.as_str()) != except {
                album.cover_photo_id = None;
                album.updated_at = updated_at;
            }
        }
    }

    fn adjust_count(&mut self, album_id: &str, delta: i64, updated_at: DateTime<Utc>) {
        if let Some(album) = self.albums.get_mut(album_id) {
            album.photo_count = (album.photo_count as i64 + delta).max(0) as u64;
            album.updated_at = updated_at;
        }
    }
}

/// In-memory metadata store
#[derive(Clone, Default)]
pub struct MockMetadataStore {
    state: Arc<Mutex<MockState>>,
    unavailable: Arc<AtomicBool>,
}

impl MockMetadataStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent call fail with a repository error
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, AtomicOrdering::SeqCst);
    }

    /// Clear all data from the store
    pub fn clear(&self) {
        if let Ok(mut state) = self.state.lock() {
            *state = MockState::default();
        }
    }

    /// Number of photos whose album reference is `album_id`, by full scan
    pub fn member_count(&self, album_id: &str) -> usize {
        self.state
            .lock()
            .map(|state| {
                state
                    .photos
                    .values()
                    .filter(|p| p.album_id.as_deref() == Some(album_id))
                    .count()
            })
            .unwrap_or(0)
    }

    fn lock(&self) -> Result<MutexGuard<'_, MockState>> {
        if self.unavailable.load(AtomicOrdering::SeqCst) {
            return Err(VaultError::Repository("mock metadata store unavailable".to_string()));
        }
        self.state
            .lock()
            .map_err(|_| VaultError::Repository("mock metadata lock poisoned".to_string()))
    }
}

fn newest_first(a: &Photo, b: &Photo) -> Ordering {
    b.uploaded_at.cmp(&a.uploaded_at).then_with(|| b.id.cmp(&a.id))
}

impl MetadataStorage for MockMetadataStore {
    fn ensure_album_named(&self, candidate: &Album) -> Result<Album> {
        let mut state = self.lock()?;
        if let Some(existing) = state.albums.values().find(|a| a.name == candidate.name) {
            return Ok(existing.clone());
        }
        state.albums.insert(candidate.id.clone(), candidate.clone());
        Ok(candidate.clone())
    }

    fn insert_album(&self, album: &Album) -> Result<()> {
        let mut state = self.lock()?;
        if state.albums.contains_key(&album.id) {
            return Err(VaultError::Repository(format!("album {} already exists", album.id)));
        }
        if album.name == DEFAULT_ALBUM_NAME && state.albums.values().any(|a| a.name == DEFAULT_ALBUM_NAME) {
            return Err(VaultError::Repository("default album already exists".to_string()));
        }
        state.albums.insert(album.id.clone(), album.clone());
        Ok(())
    }

    fn get_album(&self, album_id: &str) -> Result<Option<Album>> {
        Ok(self.lock()?.albums.get(album_id).cloned())
    }

    fn find_album_by_name(&self, name: &str) -> Result<Option<Album>> {
        let state = self.lock()?;
        let mut matches: Vec<&Album> = state.albums.values().filter(|a| a.name == name).collect();
        matches.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(matches.first().map(|a| (*a).clone()))
    }

    fn list_albums(&self) -> Result<Vec<AlbumSummary>> {
        let state = self.lock()?;
        let mut albums: Vec<AlbumSummary> = state
            .albums
            .values()
            .map(|album| AlbumSummary {
                cover_thumbnail_url: album
                    .cover_photo_id
                    .as_ref()
                    .and_then(|id| state.photos.get(id))
                    .map(|photo| photo.preview_url().to_string()),
                album: album.clone(),
            })
            .collect();
        albums.sort_by(|a, b| {
            a.album
                .created_at
                .cmp(&b.album.created_at)
                .then_with(|| a.album.id.cmp(&b.album.id))
        });
        Ok(albums)
    }

    fn update_album(&self, album_id: &str, patch: &AlbumPatch, updated_at: DateTime<Utc>) -> Result<Option<Album>> {
        let mut state = self.lock()?;
        let album = match state.albums.get_mut(album_id) {
            Some(album) => album,
            None => return Ok(None),
        };
        if let Some(name) = &patch.name {
            album.name = name.clone();
        }
        if let Some(description) = &patch.description {
            album.description = Some(description.clone());
        }
        if let Some(is_private) = patch.is_private {
            album.is_private = is_private;
        }
        album.updated_at = updated_at;
        Ok(Some(album.clone()))
    }

    fn set_album_cover(&self, album_id: &str, photo_id: Option<&str>, updated_at: DateTime<Utc>) -> Result<Option<Album>> {
        let mut state = self.lock()?;
        let is_default = match state.albums.get(album_id) {
            Some(album) => album.is_default(),
            None => return Ok(None),
        };
        if let Some(photo_id) = photo_id {
            let belongs = match state.photos.get(photo_id).map(|p| p.album_id.as_deref()) {
                Some(Some(owner)) => owner == album_id,
                Some(None) => is_default,
                None => false,
            };
            if !belongs {
                return Err(VaultError::Validation(format!(
                    "photo {} does not belong to album {}",
                    photo_id, album_id
                )));
            }
        }
        let album = match state.albums.get_mut(album_id) {
            Some(album) => album,
            None => return Ok(None),
        };
        album.cover_photo_id = photo_id.map(str::to_string);
        album.updated_at = updated_at;
        Ok(Some(album.clone()))
    }

    fn delete_album_reassigning(&self, album_id: &str, fallback_album_id: &str, updated_at: DateTime<Utc>) -> Result<Option<u64>> {
        if album_id == fallback_album_id {
            return Err(VaultError::Validation(
                "cannot reassign an album's photos to itself".to_string(),
            ));
        }
        let mut state = self.lock()?;
        if !state.albums.contains_key(album_id) {
            return Ok(None);
        }
        if !state.albums.contains_key(fallback_album_id) {
            return Err(VaultError::NotFound(format!("album {}", fallback_album_id)));
        }

        let mut moved = 0u64;
        for photo in state.photos.values_mut() {
            if photo.album_id.as_deref() == Some(album_id) {
                photo.album_id = Some(fallback_album_id.to_string());
                moved += 1;
            }
        }
        state.adjust_count(fallback_album_id, moved as i64, updated_at);
        state.albums.remove(album_id);
        Ok(Some(moved))
    }

    fn insert_photos(&self, photos: &[Photo]) -> Result<()> {
        let mut state = self.lock()?;
        // Validate the whole batch before touching anything
        let mut seen_blobs = HashSet::new();
        for photo in photos {
            if state.photos.contains_key(&photo.id) {
                return Err(VaultError::Repository(format!("photo {} already exists", photo.id)));
            }
            if !seen_blobs.insert(photo.blob_id.as_str())
                || state.photos.values().any(|p| p.blob_id == photo.blob_id)
            {
                return Err(VaultError::Conflict(format!("blob {} already has a photo", photo.blob_id)));
            }
            if let Some(album_id) = &photo.album_id {
                if !state.albums.contains_key(album_id) {
                    return Err(VaultError::Repository(format!(
                        "foreign key violation: album {}",
                        album_id
                    )));
                }
            }
        }
        for photo in photos {
            if let Some(album_id) = &photo.album_id {
                state.adjust_count(album_id, 1, photo.created_at);
            }
            state.photos.insert(photo.id.clone(), photo.clone());
        }
        Ok(())
    }

    fn get_photo(&self, photo_id: &str) -> Result<Option<Photo>> {
        Ok(self.lock()?.photos.get(photo_id).cloned())
    }

    fn get_photos_by_ids(&self, photo_ids: &[String]) -> Result<Vec<Photo>> {
        let state = self.lock()?;
        let mut seen = HashSet::new();
        Ok(photo_ids
            .iter()
            .filter(|id| seen.insert(id.as_str()))
            .filter_map(|id| state.photos.get(id).cloned())
            .collect())
    }

    fn get_photos_by_blob_ids(&self, blob_ids: &[String]) -> Result<Vec<Photo>> {
        let state = self.lock()?;
        let wanted: HashSet<&str> = blob_ids.iter().map(String::as_str).collect();
        Ok(state
            .photos
            .values()
            .filter(|photo| wanted.contains(photo.blob_id.as_str()))
            .cloned()
            .collect())
    }

    fn toggle_favorite(&self, photo_id: &str) -> Result<Option<bool>> {
        let mut state = self.lock()?;
        Ok(state.photos.get_mut(photo_id).map(|photo| {
            photo.is_favorite = !photo.is_favorite;
            photo.is_favorite
        }))
    }

    fn reassign_photo(&self, photo_id: &str, album_id: &str, updated_at: DateTime<Utc>) -> Result<Option<Photo>> {
        let mut state = self.lock()?;
        let previous = match state.photos.get(photo_id) {
            Some(photo) => photo.album_id.clone(),
            None => return Ok(None),
        };
        if !state.albums.contains_key(album_id) {
            return Err(VaultError::NotFound(format!("album {}", album_id)));
        }
        if previous.as_deref() != Some(album_id) {
            if let Some(previous) = previous.as_deref() {
                state.adjust_count(previous, -1, updated_at);
            }
            state.adjust_count(album_id, 1, updated_at);
            state.clear_cover_everywhere(photo_id, Some(album_id), updated_at);
            if let Some(photo) = state.photos.get_mut(photo_id) {
                photo.album_id = Some(album_id.to_string());
            }
        }
        Ok(state.photos.get(photo_id).cloned())
    }

    fn update_photo(&self, photo_id: &str, patch: &PhotoPatch) -> Result<Option<Photo>> {
        let mut state = self.lock()?;
        let photo = match state.photos.get_mut(photo_id) {
            Some(photo) => photo,
            None => return Ok(None),
        };
        if let Some(title) = &patch.title {
            photo.title = Some(title.clone());
        }
        if let Some(description) = &patch.description {
            photo.description = Some(description.clone());
        }
        if let Some(taken_at) = patch.taken_at {
            photo.taken_at = Some(taken_at);
        }
        if let Some(tags) = &patch.tags {
            photo.tags = tags.clone();
        }
        Ok(Some(photo.clone()))
    }

    fn delete_photos(&self, photo_ids: &[String], updated_at: DateTime<Utc>) -> Result<Vec<Photo>> {
        let mut state = self.lock()?;
        let mut deleted = Vec::new();
        for photo_id in photo_ids {
            let photo = match state.photos.remove(photo_id) {
                Some(photo) => photo,
                None => continue,
            };
            state.clear_cover_everywhere(photo_id, None, updated_at);
            if let Some(album_id) = photo.album_id.as_deref() {
                state.adjust_count(album_id, -1, updated_at);
            }
            deleted.push(photo);
        }
        Ok(deleted)
    }

    fn query_photos(&self, filter: &PhotoFilter, offset: u64, limit: u64) -> Result<Vec<Photo>> {
        let state = self.lock()?;
        let mut matches: Vec<&Photo> = state
            .photos
            .values()
            .filter(|photo| match &filter.scope {
                AlbumScope::All => true,
                AlbumScope::Album { album_id, include_unassigned } => match photo.album_id.as_deref() {
                    Some(owner) => owner == album_id,
                    None => *include_unassigned,
                },
            })
            .filter(|photo| !filter.favorites_only || photo.is_favorite)
            .filter(|photo| {
                filter
                    .search
                    .as_deref()
                    .map_or(true, |needle| photo_matches_search(photo, needle))
            })
            .collect();
        matches.sort_by(|a, b| newest_first(a, b));

        Ok(matches
            .into_iter()
            .skip(offset as usize)
            .take(limit as usize)
            .cloned()
            .collect())
    }

    fn count_photos(&self) -> Result<u64> {
        Ok(self.lock()?.photos.len() as u64)
    }

    fn count_albums(&self) -> Result<u64> {
        Ok(self.lock()?.albums.len() as u64)
    }

    fn count_favorites(&self) -> Result<u64> {
        Ok(self.lock()?.photos.values().filter(|p| p.is_favorite).count() as u64)
    }

    fn total_photo_bytes(&self) -> Result<u64> {
        Ok(self.lock()?.photos.values().map(|p| p.size_bytes).sum())
    }

    fn queue_blob_deletions(&self, failures: &[BlobFailure], enqueued_at: DateTime<Utc>) -> Result<()> {
        let mut state = self.lock()?;
        for failure in failures {
            state.next_pending_id += 1;
            let id = state.next_pending_id;
            state.pending.push(PendingBlobDeletion {
                id,
                blob_id: failure.blob_id.clone(),
                last_error: failure.reason.clone(),
                attempts: 0,
                enqueued_at,
            });
        }
        Ok(())
    }

    fn pending_blob_deletions(&self, limit: usize, max_attempts: u32) -> Result<Vec<PendingBlobDeletion>> {
        let state = self.lock()?;
        Ok(state
            .pending
            .iter()
            .filter(|entry| entry.attempts < max_attempts)
            .take(limit)
            .cloned()
            .collect())
    }

    fn complete_blob_deletions(&self, entry_ids: &[i64]) -> Result<()> {
        let mut state = self.lock()?;
        state.pending.retain(|entry| !entry_ids.contains(&entry.id));
        Ok(())
    }

    fn record_blob_deletion_failures(&self, failures: &[(i64, String)]) -> Result<()> {
        let mut state = self.lock()?;
        for (id, reason) in failures {
            if let Some(entry) = state.pending.iter_mut().find(|entry| entry.id == *id) {
                entry.attempts += 1;
                entry.last_error = reason.clone();
            }
        }
        Ok(())
    }
}
