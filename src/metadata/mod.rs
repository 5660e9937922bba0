//! Metadata Storage Layer Abstraction
//!
//! This module provides an abstraction over the relational store that owns
//! album and photo records, allowing the system to use different backends
//! (SQLite, in-memory) without affecting higher-level services.
//!
//! Every method that changes album membership also adjusts the cached
//! `photo_count` of the albums involved inside the same atomic unit, and
//! every photo deletion clears the cover slot of any album pointing at it.

pub mod mock_store;
pub mod sqlite_store;


use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};
use log::info;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use crate::config::{MetadataBackend, MetadataConfig};
use crate::error::Result;
use crate::storage::{BlobFailure, StoredBlob};
use mock_store::MockMetadataStore;
use sqlite_store::SQLiteMetadataStore;

/// Reserved name of the catch-all album
pub const DEFAULT_ALBUM_NAME: &str = "Uncategorized";

/// Current time at the precision the stores persist (microseconds)
pub fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}

/// Fixed-width RFC 3339 so that text order equals time order
pub(crate) fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn new_id() -> String {
    Uuid::new_v4().to_string()
}

/// A named collection of photos
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Album {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    /// Weak reference to a photo in this album
    pub cover_photo_id: Option<String>,
    pub is_private: bool,
    /// Cached number of photos whose album reference is this album
    pub photo_count: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Album {
    pub fn new(name: &str, description: Option<String>, is_private: bool) -> Self {
        let ts = now();
        Self {
            id: new_id(),
            name: name.to_string(),
            description,
            cover_photo_id: None,
            is_private,
            photo_count: 0,
            created_at: ts,
            updated_at: ts,
        }
    }

    pub fn is_default(&self) -> bool {
        self.name == DEFAULT_ALBUM_NAME
    }
}

/// Partial album update; `None` leaves a field untouched
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AlbumPatch {
    pub name: Option<String>,
    pub description: Option<String>,
    pub is_private: Option<bool>,
}

/// Album as listed, with a lightweight cover reference
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AlbumSummary {
    #[serde(flatten)]
    pub album: Album,
    pub cover_thumbnail_url: Option<String>,
}

/// Metadata for one stored photo
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Photo {
    pub id: String,
    /// `None` means unassigned, listed under the default album
    pub album_id: Option<String>,
    /// The blob store's stable identifier
    pub blob_id: String,
    pub url: String,
    pub thumbnail_url: Option<String>,
    pub title: Option<String>,
    pub description: Option<String>,
    pub width: u32,
    pub height: u32,
    pub size_bytes: u64,
    pub format: String,
    pub tags: Vec<String>,
    pub is_favorite: bool,
    pub taken_at: Option<DateTime<Utc>>,
    pub uploaded_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl Photo {
    /// Build the record for a blob that was just written
    pub fn from_blob(blob: &StoredBlob, album_id: &str, title: Option<String>, uploaded_at: DateTime<Utc>) -> Self {
        Self {
            id: new_id(),
            album_id: Some(album_id.to_string()),
            blob_id: blob.blob_id.clone(),
            url: blob.url.clone(),
            thumbnail_url: blob.thumbnail_url.clone(),
            title,
            description: None,
            width: blob.width,
            height: blob.height,
            size_bytes: blob.size_bytes,
            format: blob.format.clone(),
            tags: Vec::new(),
            is_favorite: false,
            taken_at: None,
            uploaded_at,
            created_at: uploaded_at,
        }
    }

    /// Thumbnail if the blob store produced one, otherwise the full image
    pub fn preview_url(&self) -> &str {
        self.thumbnail_url.as_deref().unwrap_or(&self.url)
    }
}

/// Partial photo update; `None` leaves a field untouched
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct PhotoPatch {
    pub title: Option<String>,
    pub description: Option<String>,
    pub tags: Option<Vec<String>>,
    pub taken_at: Option<DateTime<Utc>>,
}

/// Which albums a photo listing covers
#[derive(Debug, Clone, PartialEq)]
pub enum AlbumScope {
    All,
    Album {
        album_id: String,
        /// Also match photos with no album reference (default album only)
        include_unassigned: bool,
    },
}

/// Conjunctive photo filter
#[derive(Debug, Clone, PartialEq)]
pub struct PhotoFilter {
    pub scope: AlbumScope,
    pub favorites_only: bool,
    /// Lowercased, non-empty search needle
    pub search: Option<String>,
}

impl Default for PhotoFilter {
    fn default() -> Self {
        Self {
            scope: AlbumScope::All,
            favorites_only: false,
            search: None,
        }
    }
}

/// A blob whose deletion failed after its metadata was removed
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PendingBlobDeletion {
    pub id: i64,
    pub blob_id: String,
    pub last_error: String,
    pub attempts: u32,
    pub enqueued_at: DateTime<Utc>,
}

/// Trait defining the metadata storage interface
pub trait MetadataStorage: Send + Sync {
    /// Insert `candidate` unless an album with the same name exists; return
    /// whichever album carries that name afterwards
    fn ensure_album_named(&self, candidate: &Album) -> Result<Album>;

    fn insert_album(&self, album: &Album) -> Result<()>;

    fn get_album(&self, album_id: &str) -> Result<Option<Album>>;

    fn find_album_by_name(&self, name: &str) -> Result<Option<Album>>;

    /// All albums, oldest first, with their cover preview
    fn list_albums(&self) -> Result<Vec<AlbumSummary>>;

    /// Apply a patch; `None` if the album does not exist
    fn update_album(&self, album_id: &str, patch: &AlbumPatch, updated_at: DateTime<Utc>) -> Result<Option<Album>>;

    /// Set or clear the cover. Fails with `Validation` if the photo is not a
    /// member of the album; `None` if the album does not exist
    fn set_album_cover(&self, album_id: &str, photo_id: Option<&str>, updated_at: DateTime<Utc>) -> Result<Option<Album>>;

    /// Atomically move every member photo to `fallback_album_id` and delete
    /// the album row. Returns the number of moved photos, `None` if the
    /// album does not exist
    fn delete_album_reassigning(&self, album_id: &str, fallback_album_id: &str, updated_at: DateTime<Utc>) -> Result<Option<u64>>;

    /// Atomically insert a batch of photos
    fn insert_photos(&self, photos: &[Photo]) -> Result<()>;

    fn get_photo(&self, photo_id: &str) -> Result<Option<Photo>>;

    /// Missing ids are omitted
    fn get_photos_by_ids(&self, photo_ids: &[String]) -> Result<Vec<Photo>>;

    /// Photos referencing any of the given blobs; unreferenced blobs are omitted
    fn get_photos_by_blob_ids(&self, blob_ids: &[String]) -> Result<Vec<Photo>>;

    /// Flip the favorite flag; returns the new value, `None` if unknown
    fn toggle_favorite(&self, photo_id: &str) -> Result<Option<bool>>;

    /// Move a photo to another album. Fails with `NotFound` if the target
    /// album does not exist; `None` if the photo does not exist
    fn reassign_photo(&self, photo_id: &str, album_id: &str, updated_at: DateTime<Utc>) -> Result<Option<Photo>>;

    fn update_photo(&self, photo_id: &str, patch: &PhotoPatch) -> Result<Option<Photo>>;

    /// Atomically delete photos, clearing cover references. Returns the
    /// rows that were actually deleted
    fn delete_photos(&self, photo_ids: &[String], updated_at: DateTime<Utc>) -> Result<Vec<Photo>>;

    /// Filtered listing ordered by upload time descending, id descending
    fn query_photos(&self, filter: &PhotoFilter, offset: u64, limit: u64) -> Result<Vec<Photo>>;

    fn count_photos(&self) -> Result<u64>;

    fn count_albums(&self) -> Result<u64>;

    fn count_favorites(&self) -> Result<u64>;

    fn total_photo_bytes(&self) -> Result<u64>;

    /// Record blob deletions to retry later
    fn queue_blob_deletions(&self, failures: &[BlobFailure], enqueued_at: DateTime<Utc>) -> Result<()>;

    /// Oldest queue entries with fewer than `max_attempts` attempts
    fn pending_blob_deletions(&self, limit: usize, max_attempts: u32) -> Result<Vec<PendingBlobDeletion>>;

    fn complete_blob_deletions(&self, entry_ids: &[i64]) -> Result<()>;

    /// Bump attempts and store the latest reason for each `(entry_id, reason)`
    fn record_blob_deletion_failures(&self, failures: &[(i64, String)]) -> Result<()>;
}

/// Create a metadata storage instance based on the configuration
pub fn create_store(config: &MetadataConfig) -> Result<Arc<dyn MetadataStorage>> {
    match config.backend {
        MetadataBackend::SQLite => {
            info!(
                "Using SQLite metadata backend with db_path: {}, wal_mode: {}",
                config.db_path, config.wal_mode
            );
            Ok(Arc::new(SQLiteMetadataStore::open(config)?))
        }
        MetadataBackend::Mock => {
            info!("Using mock metadata backend");
            Ok(Arc::new(MockMetadataStore::new()))
        }
    }
}

/// Case-insensitive substring match used by the in-memory backend; the
/// SQLite backend expresses the same rule with `LIKE`
pub(crate) fn photo_matches_search(photo: &Photo, needle: &str) -> bool {
    let hit = |text: &str| text.to_lowercase().contains(needle);
    photo.title.as_deref().map_or(false, hit)
        || photo.description.as_deref().map_or(false, hit)
        || photo.tags.iter().any(|tag| hit(tag.as_str()))
}
