//! Service layer
//!
//! The registries wrap single-store operations on the metadata repository.
//! The coordinators are the only components that write to both the metadata
//! repository and the blob store for one logical operation.

pub mod album_registry;
pub mod deletion_coordinator;
pub mod deletion_worker;
pub mod photo_registry;
pub mod query_engine;
pub mod request_context;
pub mod stats_aggregator;
pub mod upload_coordinator;

use std::time::Duration;
use tokio::{task, time};

use crate::error::{Result, VaultError};

pub use album_registry::AlbumRegistry;
pub use deletion_coordinator::{BulkDeleteResult, DeletionCoordinator};
pub use deletion_worker::BlobDeletionWorker;
pub use photo_registry::PhotoRegistry;
pub use query_engine::{PhotoListQuery, PhotoPage, QueryEngine};
pub use request_context::{request_id_scope, RequestContext};
pub use stats_aggregator::{StatsAggregator, VaultStats};
pub use upload_coordinator::{UploadCoordinator, UploadFailure, UploadItem, UploadResult};

/// Run a synchronous blob store call off the async executor. A call that
/// outlives `limit` fails for its own item only; the blocking thread is left
/// to finish in the background.
pub(crate) async fn blob_call<T, F>(limit: Duration, call: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    match time::timeout(limit, task::spawn_blocking(call)).await {
        Ok(Ok(result)) => result,
        Ok(Err(join_error)) => Err(VaultError::BlobStore(format!("blob task failed: {}", join_error))),
        Err(_) => Err(VaultError::BlobStore(format!(
            "blob store call timed out after {}ms",
            limit.as_millis()
        ))),
    }
}
