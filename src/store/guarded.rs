use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::warn;

use super::{StatusStore, StoreError};
use crate::circuit::JitterPolicy;
use crate::config::StoreConfig;
use crate::metrics::metrics;
use crate::model::{ComponentHeartbeat, ComponentKind, DetectionReport, Scope};

/// Store wrapper that bounds every call by a deadline
///
/// Writes are retried with a jittered pause; reads fail on the first error
/// so callers can skip the cycle instead of acting on stale data.
pub struct GuardedStore {
    inner: Arc<dyn StatusStore>,
    call_timeout: Duration,
    write_retries: u32,
    backoff: JitterPolicy,
}

impl GuardedStore {
    pub fn new(inner: Arc<dyn StatusStore>, config: &StoreConfig) -> Self {
        Self {
            inner,
            call_timeout: Duration::from_millis(config.timeout_ms),
            write_retries: config.write_retries,
            backoff: JitterPolicy::from_millis(
                config.retry_backoff_min_ms,
                config.retry_backoff_max_ms,
            ),
        }
    }

    async fn bounded<T, F>(&self, op: &'static str, fut: F) -> Result<T, StoreError>
    where
        F: Future<Output = Result<T, StoreError>>,
    {
        let result = match timeout(self.call_timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(StoreError::Timeout(self.call_timeout)),
        };
        if result.is_err() {
            metrics().record_store_error(op);
        }
        result
    }

    async fn write<F, Fut>(&self, op: &'static str, mut call: F) -> Result<(), StoreError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<(), StoreError>>,
    {
        let mut attempt = 0;
        loop {
            match self.bounded(op, call()).await {
                Ok(()) => return Ok(()),
                Err(StoreError::NotRegistered(id)) => return Err(StoreError::NotRegistered(id)),
                Err(e) if attempt < self.write_retries => {
                    attempt += 1;
                    warn!(op, attempt, error = %e, "Store write failed, retrying");
                    self.backoff.sleep().await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[async_trait]
impl StatusStore for GuardedStore {
    async fn register_component(
        &self,
        component_id: &str,
        kind: ComponentKind,
        scope: &Scope,
    ) -> Result<(), StoreError> {
        self.write("register_component", move || {
            self.inner.register_component(component_id, kind, scope)
        })
        .await
    }

    async fn heartbeat(
        &self,
        component_id: &str,
        kind: ComponentKind,
        scope: &Scope,
    ) -> Result<(), StoreError> {
        self.write("heartbeat", move || self.inner.heartbeat(component_id, kind, scope))
            .await
    }

    async fn put_detection_report(&self, report: DetectionReport) -> Result<(), StoreError> {
        self.write("put_detection_report", move || {
            self.inner.put_detection_report(report.clone())
        })
        .await
    }

    async fn list_components_by_kind(
        &self,
        kind: ComponentKind,
        since: Duration,
    ) -> Result<Vec<ComponentHeartbeat>, StoreError> {
        self.bounded(
            "list_components_by_kind",
            self.inner.list_components_by_kind(kind, since),
        )
        .await
    }

    async fn list_recent_detections(
        &self,
        since: Duration,
    ) -> Result<Vec<DetectionReport>, StoreError> {
        self.bounded(
            "list_recent_detections",
            self.inner.list_recent_detections(since),
        )
        .await
    }
}
