//! Application State Management
//!
//! This module provides the application state that contains all services
//! and their dependencies, following the dependency injection pattern.

use log::info;
use std::sync::Arc;
use std::time::Duration;

use crate::config::AppConfig;
use crate::error::Result;
use crate::metadata::{self, MetadataStorage};
use crate::service::{
    AlbumRegistry, BlobDeletionWorker, DeletionCoordinator, PhotoRegistry, QueryEngine, StatsAggregator,
    UploadCoordinator,
};
use crate::storage::{self, BlobStore};

/// Application state containing all services and their dependencies
#[derive(Clone)]
pub struct AppState {
    pub albums: Arc<AlbumRegistry>,
    pub photos: Arc<PhotoRegistry>,
    pub uploads: Arc<UploadCoordinator>,
    pub deletions: Arc<DeletionCoordinator>,
    pub queries: Arc<QueryEngine>,
    pub stats: Arc<StatsAggregator>,
    metadata: Arc<dyn MetadataStorage>,
    storage: Arc<dyn BlobStore>,
    pub config: AppConfig,
}

impl AppState {
    /// Create application state from configuration
    pub fn from_config(config: AppConfig) -> Result<Self> {
        info!("Initializing application state with configuration");
        let metadata = metadata::create_store(&config.metadata)?;
        let storage = storage::create_store(&config.storage)?;
        Self::with_backends(metadata, storage, config)
    }

    /// Wire services over the given backends and make sure the default
    /// album exists
    pub fn with_backends(
        metadata: Arc<dyn MetadataStorage>,
        storage: Arc<dyn BlobStore>,
        config: AppConfig,
    ) -> Result<Self> {
        let blob_timeout = Duration::from_secs(config.storage.request_timeout_secs);

        let albums = Arc::new(AlbumRegistry::new(Arc::clone(&metadata)));
        let default = albums.ensure_default_album()?;
        info!("Default album is {}", default.id);

        let photos = Arc::new(PhotoRegistry::new(Arc::clone(&metadata), Arc::clone(&albums)));
        let uploads = Arc::new(UploadCoordinator::new(
            Arc::clone(&metadata),
            Arc::clone(&storage),
            Arc::clone(&albums),
            &config.storage.folder,
            config.upload.max_files,
            blob_timeout,
        ));
        let deletions = Arc::new(DeletionCoordinator::new(
            Arc::clone(&metadata),
            Arc::clone(&storage),
            blob_timeout,
        ));
        let queries = Arc::new(QueryEngine::new(Arc::clone(&metadata), &config.upload));
        let stats = Arc::new(StatsAggregator::new(Arc::clone(&metadata)));

        info!("Application state initialized successfully");
        Ok(Self {
            albums,
            photos,
            uploads,
            deletions,
            queries,
            stats,
            metadata,
            storage,
            config,
        })
    }

    /// Create application state for testing with mock backends
    pub fn new_for_testing() -> Result<Self> {
        Self::from_config(AppConfig::for_testing())
    }

    /// Retry worker for blob deletions queued by the deletion coordinator
    pub fn deletion_worker(&self) -> BlobDeletionWorker {
        BlobDeletionWorker::new(
            Arc::clone(&self.metadata),
            Arc::clone(&self.storage),
            &self.config.deletion,
            Duration::from_secs(self.config.storage.request_timeout_secs),
        )
    }
}
