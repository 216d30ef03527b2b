//! Shared status store: heartbeats and detection reports
//!
//! The store is the only synchronization point between agents, GMs and
//! monitors. Reports are idempotent snapshots, so concurrent writers are
//! resolved by last-write-wins on the report timestamp.

mod guarded;
mod memory;

pub use guarded::GuardedStore;
pub use memory::MemoryStatusStore;

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

use crate::model::{ComponentHeartbeat, ComponentKind, DetectionReport, Scope};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Status store unavailable: {0}")]
    Unavailable(String),

    #[error("Status store call timed out after {0:?}")]
    Timeout(Duration),

    #[error("Component {0} is not registered")]
    NotRegistered(String),
}

#[async_trait]
pub trait StatusStore: Send + Sync {
    /// Create or refresh the liveness record of a component
    async fn register_component(
        &self,
        component_id: &str,
        kind: ComponentKind,
        scope: &Scope,
    ) -> Result<(), StoreError>;

    /// Record that a registered component is alive now
    async fn heartbeat(
        &self,
        component_id: &str,
        kind: ComponentKind,
        scope: &Scope,
    ) -> Result<(), StoreError>;

    async fn put_detection_report(&self, report: DetectionReport) -> Result<(), StoreError>;

    /// Heartbeats of `kind` refreshed within `since`
    async fn list_components_by_kind(
        &self,
        kind: ComponentKind,
        since: Duration,
    ) -> Result<Vec<ComponentHeartbeat>, StoreError>;

    /// Latest report per instance written within `since`
    async fn list_recent_detections(
        &self,
        since: Duration,
    ) -> Result<Vec<DetectionReport>, StoreError>;
}
