//! Error taxonomy shared by the registries, coordinators and HTTP handlers.

use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};
use serde_json::json;
use thiserror::Error;

use crate::storage::UploadedBlob;

#[derive(Error, Debug)]
pub enum VaultError {
    /// Malformed input, e.g. an empty album name.
    #[error("validation failed: {0}")]
    Validation(String),

    /// A referenced album or photo does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// The operation is never allowed, e.g. deleting the default album.
    #[error("forbidden: {0}")]
    Forbidden(String),

    /// The write collides with existing state, e.g. a blob that already
    /// has a photo row.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Per-item failure reported by the blob store.
    #[error("blob store error: {0}")]
    BlobStore(String),

    /// Metadata store unavailable or a constraint was violated.
    #[error("repository error: {0}")]
    Repository(String),

    /// Blobs were written but the metadata insert failed. The blobs are
    /// orphaned until `commit_uploaded` is retried with them.
    #[error("metadata commit failed for {} uploaded blob(s): {reason}", .uploaded.len())]
    MetadataCommit {
        album_id: String,
        uploaded: Vec<UploadedBlob>,
        reason: String,
    },
}

pub type Result<T> = std::result::Result<T, VaultError>;

impl From<rusqlite::Error> for VaultError {
    fn from(e: rusqlite::Error) -> Self {
        VaultError::Repository(e.to_string())
    }
}

impl From<serde_json::Error> for VaultError {
    fn from(e: serde_json::Error) -> Self {
        VaultError::Repository(format!("corrupt row: {}", e))
    }
}

impl VaultError {
    /// Short machine-readable name for the error kind.
    pub fn kind(&self) -> &'static str {
        match self {
            VaultError::Validation(_) => "validation",
            VaultError::NotFound(_) => "not_found",
            VaultError::Forbidden(_) => "forbidden",
            VaultError::Conflict(_) => "conflict",
            VaultError::BlobStore(_) => "blob_store",
            VaultError::Repository(_) => "repository",
            VaultError::MetadataCommit { .. } => "metadata_commit",
        }
    }
}

impl ResponseError for VaultError {
    fn status_code(&self) -> StatusCode {
        match self {
            VaultError::Validation(_) => StatusCode::BAD_REQUEST,
            VaultError::NotFound(_) => StatusCode::NOT_FOUND,
            VaultError::Forbidden(_) => StatusCode::FORBIDDEN,
            VaultError::Conflict(_) => StatusCode::CONFLICT,
            VaultError::BlobStore(_) => StatusCode::BAD_GATEWAY,
            VaultError::Repository(_) => StatusCode::INTERNAL_SERVER_ERROR,
            VaultError::MetadataCommit { .. } => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let body = match self {
            VaultError::MetadataCommit { album_id, uploaded, .. } => json!({
                "error": self.kind(),
                "message": self.to_string(),
                "album_id": album_id,
                "uploaded": uploaded,
            }),
            _ => json!({
                "error": self.kind(),
                "message": self.to_string(),
            }),
        };
        HttpResponse::build(self.status_code()).json(body)
    }
}
