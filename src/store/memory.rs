use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::debug;

use super::{StatusStore, StoreError};
use crate::model::{ComponentHeartbeat, ComponentKind, DetectionReport, InstanceKey, Scope};

/// Heartbeats are kept per component and partition
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct HeartbeatKey {
    component_id: String,
    kind: ComponentKind,
    cluster_type: String,
}

impl HeartbeatKey {
    fn new(component_id: &str, kind: ComponentKind, scope: &Scope) -> Self {
        Self {
            component_id: component_id.to_string(),
            kind,
            cluster_type: scope.cluster_type.clone(),
        }
    }
}

/// In-process status store
///
/// Backs single-host deployments and tests. A store can be switched into an
/// unavailable state to exercise the callers' failure paths.
#[derive(Default)]
pub struct MemoryStatusStore {
    heartbeats: DashMap<HeartbeatKey, ComponentHeartbeat>,
    reports: DashMap<InstanceKey, DetectionReport>,
    unavailable: AtomicBool,
}

impl MemoryStatusStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every call fail until switched back
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check_available(&self) -> Result<(), StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("memory store switched off".into()));
        }
        Ok(())
    }

    /// Insert a heartbeat as-is, replacing any record for the same partition
    pub fn put_heartbeat(&self, heartbeat: ComponentHeartbeat) {
        let key = HeartbeatKey::new(&heartbeat.component_id, heartbeat.kind, &heartbeat.scope);
        self.heartbeats.insert(key, heartbeat);
    }

    pub fn detection(&self, key: &InstanceKey) -> Option<DetectionReport> {
        self.reports.get(key).map(|r| r.value().clone())
    }

    pub fn detection_count(&self) -> usize {
        self.reports.len()
    }

    pub fn heartbeat_of(&self, component_id: &str, kind: ComponentKind) -> Vec<ComponentHeartbeat> {
        self.heartbeats
            .iter()
            .filter(|e| e.key().component_id == component_id && e.key().kind == kind)
            .map(|e| e.value().clone())
            .collect()
    }

    fn touch(&self, key: HeartbeatKey, scope: &Scope, now: DateTime<Utc>) {
        self.heartbeats
            .entry(key.clone())
            .and_modify(|hb| {
                hb.report_interval = (now - hb.last_report_time).to_std().unwrap_or_default();
                hb.last_report_time = now;
                hb.scope = scope.clone();
            })
            .or_insert_with(|| ComponentHeartbeat {
                component_id: key.component_id,
                kind: key.kind,
                last_report_time: now,
                report_interval: Duration::ZERO,
                scope: scope.clone(),
            });
    }
}

fn cutoff(since: Duration) -> DateTime<Utc> {
    let since = chrono::Duration::from_std(since).unwrap_or_else(|_| chrono::Duration::days(36500));
    Utc::now()
        .checked_sub_signed(since)
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

#[async_trait]
impl StatusStore for MemoryStatusStore {
    async fn register_component(
        &self,
        component_id: &str,
        kind: ComponentKind,
        scope: &Scope,
    ) -> Result<(), StoreError> {
        self.check_available()?;
        debug!(component = %component_id, kind = %kind, scope = %scope.cluster_type, "Component registered");
        self.touch(HeartbeatKey::new(component_id, kind, scope), scope, Utc::now());
        Ok(())
    }

    async fn heartbeat(
        &self,
        component_id: &str,
        kind: ComponentKind,
        scope: &Scope,
    ) -> Result<(), StoreError> {
        self.check_available()?;
        let key = HeartbeatKey::new(component_id, kind, scope);
        if !self.heartbeats.contains_key(&key) {
            return Err(StoreError::NotRegistered(component_id.to_string()));
        }
        self.touch(key, scope, Utc::now());
        Ok(())
    }

    async fn put_detection_report(&self, report: DetectionReport) -> Result<(), StoreError> {
        self.check_available()?;
        let key = report.key();
        self.reports
            .entry(key)
            .and_modify(|existing| {
                if report.timestamp >= existing.timestamp {
                    *existing = report.clone();
                }
            })
            .or_insert_with(|| report.clone());
        Ok(())
    }

    async fn list_components_by_kind(
        &self,
        kind: ComponentKind,
        since: Duration,
    ) -> Result<Vec<ComponentHeartbeat>, StoreError> {
        self.check_available()?;
        let cutoff = cutoff(since);
        Ok(self
            .heartbeats
            .iter()
            .filter(|e| e.value().kind == kind && e.value().last_report_time >= cutoff)
            .map(|e| e.value().clone())
            .collect())
    }

    async fn list_recent_detections(
        &self,
        since: Duration,
    ) -> Result<Vec<DetectionReport>, StoreError> {
        self.check_available()?;
        let cutoff = cutoff(since);
        Ok(self
            .reports
            .iter()
            .filter(|e| e.value().timestamp >= cutoff)
            .map(|e| e.value().clone())
            .collect())
    }
}
