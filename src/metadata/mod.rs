//! Read-only access to the metadata system
//!
//! The metadata system owns the instance inventory. Callers page through it
//! by cluster type and shard so that no single request lists every instance.

mod inventory;

pub use inventory::StaticMetadata;

use async_trait::async_trait;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use thiserror::Error;

use crate::model::Instance;

#[derive(Debug, Error)]
pub enum MetadataError {
    #[error("Metadata system unavailable: {0}")]
    Unavailable(String),

    #[error("Invalid shard {index} of {count}")]
    InvalidShard { index: usize, count: usize },
}

#[async_trait]
pub trait MetadataSource: Send + Sync {
    /// Instances of `cluster_type` that fall into shard `shard_index` of `shard_count`
    async fn instances_by_cluster_type(
        &self,
        cluster_type: &str,
        shard_index: usize,
        shard_count: usize,
    ) -> Result<Vec<Instance>, MetadataError>;
}

/// Shard an instance belongs to when the inventory is split `count` ways
///
/// Instances of one cluster always land in the same shard.
pub fn shard_of(instance: &Instance, count: usize) -> usize {
    if count <= 1 {
        return 0;
    }
    let mut hasher = DefaultHasher::new();
    instance.shard_key().hash(&mut hasher);
    (hasher.finish() % count as u64) as usize
}
