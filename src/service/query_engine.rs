//! Read-only listing over the metadata repository

use log::debug;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::config::UploadConfig;
use crate::error::{Result, VaultError};
use crate::metadata::{AlbumScope, AlbumSummary, MetadataStorage, Photo, PhotoFilter};

/// Album selector meaning "no album filter"
pub const ALL_ALBUMS: &str = "all";

/// Photo listing parameters, as taken from the query string
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct PhotoListQuery {
    /// `"all"` or an album id; absent means all
    pub album: Option<String>,
    #[serde(default)]
    pub favorites: bool,
    pub search: Option<String>,
    /// 1-based
    pub page: Option<u32>,
    pub page_size: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PhotoPage {
    pub photos: Vec<Photo>,
    pub page: u32,
    pub page_size: u32,
    pub has_more: bool,
}

pub struct QueryEngine {
    metadata: Arc<dyn MetadataStorage>,
    default_page_size: u32,
    max_page_size: u32,
}

impl QueryEngine {
    pub fn new(metadata: Arc<dyn MetadataStorage>, config: &UploadConfig) -> Self {
        Self {
            metadata,
            default_page_size: config.default_page_size,
            max_page_size: config.max_page_size,
        }
    }

    fn scope(&self, album: Option<&str>) -> Result<AlbumScope> {
        match album.map(str::trim) {
            None | Some("") => Ok(AlbumScope::All),
            Some(selector) if selector.eq_ignore_ascii_case(ALL_ALBUMS) => Ok(AlbumScope::All),
            Some(album_id) => {
                let album = self
                    .metadata
                    .get_album(album_id)?
                    .ok_or_else(|| VaultError::NotFound(format!("album {}", album_id)))?;
                Ok(AlbumScope::Album {
                    include_unassigned: album.is_default(),
                    album_id: album.id,
                })
            }
        }
    }

    /// Filtered page of photos, newest first
    pub fn list_photos(&self, query: &PhotoListQuery) -> Result<PhotoPage> {
        let page = query.page.unwrap_or(1);
        if page == 0 {
            return Err(VaultError::Validation("page starts at 1".to_string()));
        }
        let page_size = query.page_size.unwrap_or(self.default_page_size);
        if page_size == 0 {
            return Err(VaultError::Validation("page_size must be positive".to_string()));
        }
        let page_size = page_size.min(self.max_page_size);

        let filter = PhotoFilter {
            scope: self.scope(query.album.as_deref())?,
            favorites_only: query.favorites,
            search: query
                .search
                .as_deref()
                .map(str::trim)
                .filter(|needle| !needle.is_empty())
                .map(str::to_lowercase),
        };
        debug!("Listing photos page {} (size {}) with {:?}", page, page_size, filter);

        let offset = u64::from(page - 1) * u64::from(page_size);
        // One extra row tells whether another page exists
        let mut photos = self.metadata.query_photos(&filter, offset, u64::from(page_size) + 1)?;
        let has_more = photos.len() > page_size as usize;
        photos.truncate(page_size as usize);

        Ok(PhotoPage {
            photos,
            page,
            page_size,
            has_more,
        })
    }

    /// All albums with live counts and cover previews
    pub fn list_albums(&self) -> Result<Vec<AlbumSummary>> {
        self.metadata.list_albums()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::mock_store::MockMetadataStore;
    use crate::metadata::{now, Album, DEFAULT_ALBUM_NAME};
    use crate::storage::StoredBlob;
    use chrono::Duration;
    use std::collections::HashSet;

    fn engine(metadata: &Arc<dyn MetadataStorage>) -> QueryEngine {
        let config = UploadConfig {
            default_page_size: 10,
            max_page_size: 25,
            ..UploadConfig::default()
        };
        QueryEngine::new(Arc::clone(metadata), &config)
    }

    fn seed(metadata: &Arc<dyn MetadataStorage>, album: &Album, count: usize) -> Vec<Photo> {
        let base = now();
        let photos: Vec<Photo> = (0..count)
            .map(|i| {
                let blob = StoredBlob {
                    blob_id: format!("{}/{}", album.id, i),
                    url: format!("mock://{}/{}", album.id, i),
                    thumbnail_url: None,
                    width: 1,
                    height: 1,
                    size_bytes: 1,
                    format: "png".to_string(),
                };
                Photo::from_blob(&blob, &album.id, Some(format!("shot {}", i)), base + Duration::seconds(i as i64))
            })
            .collect();
        metadata.insert_photos(&photos).unwrap();
        photos
    }

    fn query(album: Option<&str>, page: u32, page_size: u32) -> PhotoListQuery {
        PhotoListQuery {
            album: album.map(str::to_string),
            page: Some(page),
            page_size: Some(page_size),
            ..PhotoListQuery::default()
        }
    }

    #[test]
    fn test_pagination_has_no_overlap() {
        let metadata: Arc<dyn MetadataStorage> = Arc::new(MockMetadataStore::new());
        let album = Album::new("Trip", None, false);
        metadata.insert_album(&album).unwrap();
        seed(&metadata, &album, 15);
        let engine = engine(&metadata);

        let first = engine.list_photos(&query(Some("all"), 1, 10)).unwrap();
        let second = engine.list_photos(&query(Some("all"), 2, 10)).unwrap();
        assert_eq!(first.photos.len(), 10);
        assert!(first.has_more);
        assert_eq!(second.photos.len(), 5);
        assert!(!second.has_more);

        let first_ids: HashSet<&str> = first.photos.iter().map(|p| p.id.as_str()).collect();
        assert!(second.photos.iter().all(|p| !first_ids.contains(p.id.as_str())));
    }

    #[test]
    fn test_has_more_is_false_on_exact_fit() {
        let metadata: Arc<dyn MetadataStorage> = Arc::new(MockMetadataStore::new());
        let album = Album::new("Trip", None, false);
        metadata.insert_album(&album).unwrap();
        seed(&metadata, &album, 10);
        let page = engine(&metadata).list_photos(&query(None, 1, 10)).unwrap();
        assert_eq!(page.photos.len(), 10);
        assert!(!page.has_more);
    }

    #[test]
    fn test_album_scope_and_ordering() {
        let metadata: Arc<dyn MetadataStorage> = Arc::new(MockMetadataStore::new());
        let trip = Album::new("Trip", None, false);
        let home = Album::new("Home", None, false);
        metadata.insert_album(&trip).unwrap();
        metadata.insert_album(&home).unwrap();
        let trip_photos = seed(&metadata, &trip, 3);
        seed(&metadata, &home, 2);

        let page = engine(&metadata).list_photos(&query(Some(&trip.id), 1, 10)).unwrap();
        let ids: Vec<&str> = page.photos.iter().map(|p| p.id.as_str()).collect();
        let expected: Vec<&str> = trip_photos.iter().rev().map(|p| p.id.as_str()).collect();
        assert_eq!(ids, expected);

        let err = engine(&metadata).list_photos(&query(Some("missing"), 1, 10)).unwrap_err();
        assert_eq!(err.kind(), "not_found");
    }

    #[test]
    fn test_default_album_lists_unassigned_photos() {
        let metadata: Arc<dyn MetadataStorage> = Arc::new(MockMetadataStore::new());
        let default = metadata.ensure_album_named(&Album::new(DEFAULT_ALBUM_NAME, None, false)).unwrap();
        let blob = StoredBlob {
            blob_id: "loose".to_string(),
            url: "mock://loose".to_string(),
            thumbnail_url: None,
            width: 1,
            height: 1,
            size_bytes: 1,
            format: "png".to_string(),
        };
        let mut photo = Photo::from_blob(&blob, &default.id, None, now());
        photo.album_id = None;
        metadata.insert_photos(&[photo]).unwrap();

        let page = engine(&metadata).list_photos(&query(Some(&default.id), 1, 10)).unwrap();
        assert_eq!(page.photos.len(), 1);
    }

    #[test]
    fn test_favorites_and_search_filters() {
        let metadata: Arc<dyn MetadataStorage> = Arc::new(MockMetadataStore::new());
        let album = Album::new("Trip", None, false);
        metadata.insert_album(&album).unwrap();
        let photos = seed(&metadata, &album, 4);
        metadata.toggle_favorite(&photos[1].id).unwrap();
        metadata.toggle_favorite(&photos[3].id).unwrap();
        let engine = engine(&metadata);

        let favorites = PhotoListQuery {
            favorites: true,
            ..PhotoListQuery::default()
        };
        let page = engine.list_photos(&favorites).unwrap();
        assert_eq!(page.photos.len(), 2);
        assert!(page.photos.iter().all(|p| p.is_favorite));

        let search = PhotoListQuery {
            search: Some("  SHOT 2 ".to_string()),
            ..PhotoListQuery::default()
        };
        let page = engine.list_photos(&search).unwrap();
        assert_eq!(page.photos.len(), 1);
        assert_eq!(page.photos[0].id, photos[2].id);

        let both = PhotoListQuery {
            favorites: true,
            search: Some("shot 2".to_string()),
            ..PhotoListQuery::default()
        };
        assert!(engine.list_photos(&both).unwrap().photos.is_empty());
    }

    #[test]
    fn test_page_validation_and_clamp() {
        let metadata: Arc<dyn MetadataStorage> = Arc::new(MockMetadataStore::new());
        let engine = engine(&metadata);
        assert_eq!(engine.list_photos(&query(None, 0, 10)).unwrap_err().kind(), "validation");
        assert_eq!(engine.list_photos(&query(None, 1, 0)).unwrap_err().kind(), "validation");

        let page = engine.list_photos(&query(None, 1, 1000)).unwrap();
        assert_eq!(page.page_size, 25);
        let page = engine.list_photos(&PhotoListQuery::default()).unwrap();
        assert_eq!((page.page, page.page_size), (1, 10));
    }
}
