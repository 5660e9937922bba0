//! Photo registry: lookups and single-store photo edits

use log::debug;
use std::collections::HashSet;
use std::sync::Arc;

use crate::error::{Result, VaultError};
use crate::metadata::{now, MetadataStorage, Photo, PhotoPatch};
use crate::service::album_registry::AlbumRegistry;

pub struct PhotoRegistry {
    metadata: Arc<dyn MetadataStorage>,
    albums: Arc<AlbumRegistry>,
}

/// Trim tags, drop empty ones and keep the first spelling of duplicates
/// that differ only by case
pub(crate) fn normalize_tags(tags: &[String]) -> Vec<String> {
    let mut seen = HashSet::new();
    tags.iter()
        .map(|tag| tag.trim())
        .filter(|tag| !tag.is_empty())
        .filter(|tag| seen.insert(tag.to_lowercase()))
        .map(str::to_string)
        .collect()
}

impl PhotoRegistry {
    pub fn new(metadata: Arc<dyn MetadataStorage>, albums: Arc<AlbumRegistry>) -> Self {
        Self { metadata, albums }
    }

    pub fn get(&self, photo_id: &str) -> Result<Photo> {
        self.metadata
            .get_photo(photo_id)?
            .ok_or_else(|| VaultError::NotFound(format!("photo {}", photo_id)))
    }

    /// Missing ids are left out of the result
    pub fn list_by_ids(&self, photo_ids: &[String]) -> Result<Vec<Photo>> {
        self.metadata.get_photos_by_ids(photo_ids)
    }

    /// Flip the favorite flag and return its new value
    pub fn toggle_favorite(&self, photo_id: &str) -> Result<bool> {
        let favorite = self
            .metadata
            .toggle_favorite(photo_id)?
            .ok_or_else(|| VaultError::NotFound(format!("photo {}", photo_id)))?;
        debug!("Photo {} favorite = {}", photo_id, favorite);
        Ok(favorite)
    }

    /// Move a photo to another album; `None` targets the default album
    pub fn reassign_album(&self, photo_id: &str, album_id: Option<&str>) -> Result<Photo> {
        let target = match album_id {
            Some(id) => id.to_string(),
            None => self.albums.default_album()?.id,
        };
        self.metadata
            .reassign_photo(photo_id, &target, now())?
            .ok_or_else(|| VaultError::NotFound(format!("photo {}", photo_id)))
    }

    pub fn update_details(&self, photo_id: &str, patch: &PhotoPatch) -> Result<Photo> {
        let mut patch = patch.clone();
        if let Some(tags) = patch.tags.as_deref() {
            patch.tags = Some(normalize_tags(tags));
        }
        self.metadata
            .update_photo(photo_id, &patch)?
            .ok_or_else(|| VaultError::NotFound(format!("photo {}", photo_id)))
    }
}
