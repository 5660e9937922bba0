//! Album registry: create, update, delete and cover management

use log::{debug, info};
use std::sync::Arc;

use crate::error::{Result, VaultError};
use crate::metadata::{now, Album, AlbumPatch, AlbumSummary, MetadataStorage, DEFAULT_ALBUM_NAME};

pub struct AlbumRegistry {
    metadata: Arc<dyn MetadataStorage>,
}

fn is_reserved_name(name: &str) -> bool {
    name.eq_ignore_ascii_case(DEFAULT_ALBUM_NAME)
}

/// Trimmed, non-empty album name
fn clean_name(name: &str) -> Result<String> {
    let name = name.trim();
    if name.is_empty() {
        return Err(VaultError::Validation("album name must not be empty".to_string()));
    }
    Ok(name.to_string())
}

impl AlbumRegistry {
    pub fn new(metadata: Arc<dyn MetadataStorage>) -> Self {
        Self { metadata }
    }

    /// Create the catch-all album if it is missing. Idempotent.
    pub fn ensure_default_album(&self) -> Result<Album> {
        let candidate = Album::new(DEFAULT_ALBUM_NAME, Some("Photos without an album".to_string()), false);
        let album = self.metadata.ensure_album_named(&candidate)?;
        if album.id == candidate.id {
            info!("Created default album {}", album.id);
        }
        Ok(album)
    }

    pub fn default_album(&self) -> Result<Album> {
        match self.metadata.find_album_by_name(DEFAULT_ALBUM_NAME)? {
            Some(album) => Ok(album),
            None => self.ensure_default_album(),
        }
    }

    pub fn create(&self, name: &str, description: Option<String>, is_private: bool) -> Result<Album> {
        let name = clean_name(name)?;
        if is_reserved_name(&name) {
            return Err(VaultError::Validation(format!("album name {:?} is reserved", name)));
        }
        let album = Album::new(&name, description, is_private);
        self.metadata.insert_album(&album)?;
        info!("Created album {} ({})", album.id, album.name);
        Ok(album)
    }

    pub fn get(&self, album_id: &str) -> Result<Album> {
        self.metadata
            .get_album(album_id)?
            .ok_or_else(|| VaultError::NotFound(format!("album {}", album_id)))
    }

    pub fn list(&self) -> Result<Vec<AlbumSummary>> {
        self.metadata.list_albums()
    }

    pub fn update(&self, album_id: &str, patch: &AlbumPatch) -> Result<Album> {
        let mut patch = patch.clone();
        if let Some(name) = patch.name.as_deref() {
            patch.name = Some(clean_name(name)?);
        }

        let current = self.get(album_id)?;
        if let Some(name) = patch.name.as_deref() {
            if current.is_default() && name != current.name {
                return Err(VaultError::Forbidden("the default album cannot be renamed".to_string()));
            }
            if !current.is_default() && is_reserved_name(name) {
                return Err(VaultError::Validation(format!("album name {:?} is reserved", name)));
            }
        }

        debug!("Updating album {} with {:?}", album_id, patch);
        self.metadata
            .update_album(album_id, &patch, now())?
            .ok_or_else(|| VaultError::NotFound(format!("album {}", album_id)))
    }

    /// Delete an album, moving its photos to the default album. Returns the
    /// number of moved photos.
    pub fn delete(&self, album_id: &str) -> Result<u64> {
        let album = self.get(album_id)?;
        if album.is_default() {
            return Err(VaultError::Forbidden("the default album cannot be deleted".to_string()));
        }
        let fallback = self.default_album()?;
        let moved = self
            .metadata
            .delete_album_reassigning(album_id, &fallback.id, now())?
            .ok_or_else(|| VaultError::NotFound(format!("album {}", album_id)))?;
        info!("Deleted album {} ({}), {} photo(s) moved to {}", album.id, album.name, moved, fallback.id);
        Ok(moved)
    }

    /// Set or clear the cover photo
    pub fn set_cover(&self, album_id: &str, photo_id: Option<&str>) -> Result<Album> {
        self.metadata
            .set_album_cover(album_id, photo_id, now())?
            .ok_or_else(|| VaultError::NotFound(format!("album {}", album_id)))
    }
}
