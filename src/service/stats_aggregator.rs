//! Library-wide counters

use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::error::Result;
use crate::metadata::MetadataStorage;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VaultStats {
    pub total_photos: u64,
    pub total_albums: u64,
    pub favorite_count: u64,
    /// Sum of photo sizes as recorded at upload
    pub total_bytes: u64,
}

pub struct StatsAggregator {
    metadata: Arc<dyn MetadataStorage>,
}

impl StatsAggregator {
    pub fn new(metadata: Arc<dyn MetadataStorage>) -> Self {
        Self { metadata }
    }

    /// Four independent aggregate reads, not one snapshot
    pub fn compute_stats(&self) -> Result<VaultStats> {
        Ok(VaultStats {
            total_photos: self.metadata.count_photos()?,
            total_albums: self.metadata.count_albums()?,
            favorite_count: self.metadata.count_favorites()?,
            total_bytes: self.metadata.total_photo_bytes()?,
        })
    }
}
