//! Local filesystem blob store implementation

use crate::config::StorageConfig;
use crate::error::{Result, VaultError};
use crate::storage::{BlobStore, StoredBlob};
use image::ImageReader;
use log::{info, warn};
use std::fs;
use std::io::{self, Cursor};
use std::path::{Component, Path, PathBuf};
use uuid::Uuid;

/// Blob store writing each payload to its own file under `base_path`.
///
/// Blob ids are paths relative to `base_path` (`<folder>/<uuid>.<ext>`), and
/// URLs are the same path appended to `public_base_url`.
pub struct LocalBlobStore {
    base_path: PathBuf,
    public_base_url: String,
}

impl LocalBlobStore {
    pub fn new(config: &StorageConfig) -> Result<Self> {
        let base_path = PathBuf::from(&config.base_path);
        if !base_path.exists() {
            fs::create_dir_all(&base_path).map_err(|e| {
                VaultError::BlobStore(format!(
                    "failed to create storage directory {}: {}",
                    base_path.display(),
                    e
                ))
            })?;
        }
        info!("Using storage directory: {}", base_path.display());

        Ok(Self {
            base_path,
            public_base_url: config.public_base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Resolve a blob id to a file path, refusing anything that would escape
    /// the storage directory.
    fn blob_path(&self, blob_id: &str) -> Result<PathBuf> {
        let relative = Path::new(blob_id);
        let is_plain = !blob_id.is_empty()
            && relative
                .components()
                .all(|component| matches!(component, Component::Normal(_)));
        if !is_plain {
            return Err(VaultError::BlobStore(format!("invalid blob id: {}", blob_id)));
        }
        Ok(self.base_path.join(relative))
    }

    /// File extension and pixel dimensions of an image payload
    fn probe(data: &[u8]) -> Result<(&'static str, u32, u32)> {
        let reader = ImageReader::new(Cursor::new(data))
            .with_guessed_format()
            .map_err(|e| VaultError::BlobStore(format!("unreadable payload: {}", e)))?;
        let format = reader
            .format()
            .ok_or_else(|| VaultError::BlobStore("unsupported image format".to_string()))?;
        let extension = format.extensions_str().first().copied().unwrap_or("bin");
        let (width, height) = reader
            .into_dimensions()
            .map_err(|e| VaultError::BlobStore(format!("cannot decode image header: {}", e)))?;
        Ok((extension, width, height))
    }

    fn stored_blob(&self, blob_id: String, (extension, width, height): (&str, u32, u32), size_bytes: u64) -> StoredBlob {
        StoredBlob {
            url: format!("{}/{}", self.public_base_url, blob_id),
            thumbnail_url: None,
            blob_id,
            width,
            height,
            size_bytes,
            format: extension.to_string(),
        }
    }

    fn sanitize_folder(folder: &str) -> String {
        folder
            .split('/')
            .filter(|part| !part.is_empty() && *part != "." && *part != "..")
            .collect::<Vec<_>>()
            .join("/")
    }
}

impl BlobStore for LocalBlobStore {
    fn upload(&self, data: &[u8], folder: &str) -> Result<StoredBlob> {
        if data.is_empty() {
            return Err(VaultError::BlobStore("empty payload".to_string()));
        }

        let (extension, width, height) = Self::probe(data)?;

        let folder = Self::sanitize_folder(folder);
        let file_name = format!("{}.{}", Uuid::new_v4(), extension);
        let blob_id = if folder.is_empty() {
            file_name
        } else {
            format!("{}/{}", folder, file_name)
        };

        let path = self.blob_path(&blob_id)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| VaultError::BlobStore(format!("failed to create {}: {}", parent.display(), e)))?;
        }
        fs::write(&path, data)
            .map_err(|e| VaultError::BlobStore(format!("failed to write {}: {}", path.display(), e)))?;

        info!("Stored blob {} ({} bytes, {}x{})", blob_id, data.len(), width, height);

        Ok(self.stored_blob(blob_id, (extension, width, height), data.len() as u64))
    }

    fn stat(&self, blob_id: &str) -> Result<Option<StoredBlob>> {
        let path = self.blob_path(blob_id)?;
        match fs::read(&path) {
            Ok(data) => {
                let probed = Self::probe(&data)?;
                Ok(Some(self.stored_blob(blob_id.to_string(), probed, data.len() as u64)))
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(VaultError::BlobStore(format!("failed to read {}: {}", blob_id, e))),
        }
    }

    fn delete(&self, blob_id: &str) -> Result<()> {
        let path = self.blob_path(blob_id)?;
        match fs::remove_file(&path) {
            Ok(()) => {
                info!("Deleted blob {}", blob_id);
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                // Already gone is as good as deleted.
                warn!("Blob {} was already absent", blob_id);
                Ok(())
            }
            Err(e) => Err(VaultError::BlobStore(format!("failed to delete {}: {}", blob_id, e))),
        }
    }
}
