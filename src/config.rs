//! Application Configuration
//!
//! This module provides configuration management for the application,
//! supporting YAML configuration files with sensible defaults.

use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::Path;
use thiserror::Error;

/// Errors raised while loading configuration
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: String,
        source: serde_yaml::Error,
    },
}

/// Blob store backend types
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub enum StorageBackend {
    #[default]
    Local,
    Mock,
}

impl std::str::FromStr for StorageBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "local" => Ok(StorageBackend::Local),
            "mock" => Ok(StorageBackend::Mock),
            _ => Err(format!("Unknown storage backend: {}", s)),
        }
    }
}

/// Metadata backend types
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub enum MetadataBackend {
    #[default]
    SQLite,
    Mock,
}

impl std::str::FromStr for MetadataBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "sqlite" => Ok(MetadataBackend::SQLite),
            "mock" => Ok(MetadataBackend::Mock),
            _ => Err(format!("Unknown metadata backend: {}", s)),
        }
    }
}

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    /// Server configuration
    pub server: ServerConfig,
    /// Blob store configuration
    pub storage: StorageConfig,
    /// Metadata configuration
    pub metadata: MetadataConfig,
    /// Upload and listing limits
    pub upload: UploadConfig,
    /// Blob deletion retry worker configuration
    pub deletion: DeletionConfig,
    /// Logging configuration
    pub logging: LoggingConfig,
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Number of worker threads
    pub workers: usize,
    /// Maximum payload size in bytes
    pub max_payload_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 9710,
            workers: 4,
            max_payload_size: 200 * 1024 * 1024,
        }
    }
}

/// Blob store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    /// Directory the local backend writes blobs into
    pub base_path: String,
    /// URL prefix under which `base_path` is served
    pub public_base_url: String,
    /// Folder hint passed with every upload
    pub folder: String,
    /// Per-item deadline for a single blob store call
    pub request_timeout_secs: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::Local,
            base_path: "./data/blobs".to_string(),
            public_base_url: "http://127.0.0.1:9710/blobs".to_string(),
            folder: "photo-vault".to_string(),
            request_timeout_secs: 30,
        }
    }
}

/// Metadata backend configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetadataConfig {
    pub backend: MetadataBackend,
    /// Database file path
    pub db_path: String,
    /// Enable WAL mode
    pub wal_mode: bool,
}

impl Default for MetadataConfig {
    fn default() -> Self {
        Self {
            backend: MetadataBackend::SQLite,
            db_path: "./data/metadata.db".to_string(),
            wal_mode: true,
        }
    }
}

/// Upload and listing limits
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UploadConfig {
    /// Maximum number of files in one upload request
    pub max_files: usize,
    pub default_page_size: u32,
    pub max_page_size: u32,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            max_files: 20,
            default_page_size: 20,
            max_page_size: 100,
        }
    }
}

/// Blob deletion retry worker configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeletionConfig {
    /// Enable the retry worker
    pub enabled: bool,
    /// Seconds between passes over the queue
    pub retry_interval_secs: u64,
    /// Queue entries handled per pass
    pub batch_size: usize,
    /// Entries are abandoned after this many failed attempts
    pub max_attempts: u32,
}

impl Default for DeletionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            retry_interval_secs: 300, // 5 minutes
            batch_size: 100,
            max_attempts: 5,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Path to log4rs configuration file
    pub config_file: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            config_file: "server_log.yaml".to_string(),
        }
    }
}

impl AppConfig {
    /// Load configuration from `PHOTO_VAULT_CONFIG` (or `config.yaml`), use
    /// defaults if not found. Backend choices can be overridden from the
    /// environment.
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = env::var("PHOTO_VAULT_CONFIG").unwrap_or_else(|_| "config.yaml".to_string());
        let mut config = Self::from_file(&config_path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Read a YAML file; a missing file yields the defaults
    pub fn from_file(config_path: &str) -> Result<Self, ConfigError> {
        if !Path::new(config_path).exists() {
            warn!("Config file {} not found, using defaults", config_path);
            return Ok(Self::default());
        }
        let content = fs::read_to_string(config_path).map_err(|source| ConfigError::Io {
            path: config_path.to_string(),
            source,
        })?;
        let config: AppConfig = serde_yaml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: config_path.to_string(),
            source,
        })?;
        info!("Loaded configuration from {}", config_path);
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(value) = env::var("STORAGE_BACKEND") {
            match value.parse::<StorageBackend>() {
                Ok(backend) => {
                    info!("Using storage backend from environment: {:?}", backend);
                    self.storage.backend = backend;
                }
                Err(e) => warn!("Invalid storage backend in environment: {}", e),
            }
        }
        if let Ok(value) = env::var("METADATA_BACKEND") {
            match value.parse::<MetadataBackend>() {
                Ok(backend) => {
                    info!("Using metadata backend from environment: {:?}", backend);
                    self.metadata.backend = backend;
                }
                Err(e) => warn!("Invalid metadata backend in environment: {}", e),
            }
        }
    }

    /// Configuration with in-memory backends and short intervals
    pub fn for_testing() -> Self {
        let mut config = Self::default();
        config.storage.backend = StorageBackend::Mock;
        config.storage.request_timeout_secs = 5;
        config.metadata.backend = MetadataBackend::Mock;
        config.deletion.enabled = false;
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::io::Write;

    #[test]
    fn test_backend_from_str() {
        assert_eq!("sqlite".parse::<MetadataBackend>().unwrap(), MetadataBackend::SQLite);
        assert_eq!("SQLite".parse::<MetadataBackend>().unwrap(), MetadataBackend::SQLite);
        assert_eq!("MOCK".parse::<MetadataBackend>().unwrap(), MetadataBackend::Mock);
        assert_eq!("Local".parse::<StorageBackend>().unwrap(), StorageBackend::Local);
        assert_eq!("mock".parse::<StorageBackend>().unwrap(), StorageBackend::Mock);

        assert!("invalid".parse::<MetadataBackend>().is_err());
        assert!("s3".parse::<StorageBackend>().is_err());
    }

    #[test]
    fn test_defaults() {
        let config = AppConfig::default();
        assert_eq!(config.server.port, 9710);
        assert_eq!(config.upload.max_files, 20);
        assert_eq!(config.metadata.backend, MetadataBackend::SQLite);
        assert_eq!(config.storage.backend, StorageBackend::Local);
        assert!(config.deletion.enabled);
    }

    #[test]
    fn test_partial_yaml_keeps_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "server:\n  port: 8088\nupload:\n  max_files: 5").unwrap();

        let config = AppConfig::from_file(file.path().to_str().unwrap()).unwrap();
        assert_eq!(config.server.port, 8088);
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.upload.max_files, 5);
        assert_eq!(config.upload.max_page_size, 100);
    }

    #[test]
    fn test_invalid_yaml_is_reported() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "server: [not, a, map").unwrap();

        let result = AppConfig::from_file(file.path().to_str().unwrap());
        assert!(matches!(result, Err(ConfigError::Parse { .. })));
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let config = AppConfig::from_file("/definitely/not/here.yaml").unwrap();
        assert_eq!(config.server.port, 9710);
    }

    #[test]
    #[serial]
    fn test_env_overrides() {
        env::set_var("PHOTO_VAULT_CONFIG", "/definitely/not/here.yaml");
        env::set_var("METADATA_BACKEND", "mock");
        env::set_var("STORAGE_BACKEND", "invalid");
        let config = AppConfig::load().unwrap();
        assert_eq!(config.metadata.backend, MetadataBackend::Mock);
        assert_eq!(config.storage.backend, StorageBackend::Local);

        env::remove_var("PHOTO_VAULT_CONFIG");
        env::remove_var("METADATA_BACKEND");
        env::remove_var("STORAGE_BACKEND");
    }
}
