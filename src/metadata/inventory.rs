use async_trait::async_trait;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};

use super::{shard_of, MetadataError, MetadataSource};
use crate::model::Instance;

/// Inventory held in memory, loaded from configuration
///
/// The instance list can be swapped at runtime, which stands in for the
/// metadata system changing between sweeps.
#[derive(Default)]
pub struct StaticMetadata {
    instances: RwLock<Vec<Instance>>,
    unavailable: AtomicBool,
}

impl StaticMetadata {
    pub fn new(instances: Vec<Instance>) -> Self {
        Self {
            instances: RwLock::new(instances),
            unavailable: AtomicBool::new(false),
        }
    }

    pub fn replace(&self, instances: Vec<Instance>) {
        *self.instances.write() = instances;
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub fn len(&self) -> usize {
        self.instances.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.read().is_empty()
    }
}

#[async_trait]
impl MetadataSource for StaticMetadata {
    async fn instances_by_cluster_type(
        &self,
        cluster_type: &str,
        shard_index: usize,
        shard_count: usize,
    ) -> Result<Vec<Instance>, MetadataError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(MetadataError::Unavailable("static inventory switched off".into()));
        }
        if shard_count == 0 || shard_index >= shard_count {
            return Err(MetadataError::InvalidShard {
                index: shard_index,
                count: shard_count,
            });
        }
        Ok(self
            .instances
            .read()
            .iter()
            .filter(|i| i.cluster_type == cluster_type)
            .filter(|i| shard_of(i, shard_count) == shard_index)
            .cloned()
            .collect())
    }
}
