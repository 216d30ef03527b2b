use chrono::{DateTime, Utc};
use futures::future::try_join_all;
use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

use super::rules::ExclusionRule;
use crate::config::MonitorConfig;
use crate::metadata::{MetadataError, MetadataSource};
use crate::model::{ComponentHeartbeat, ComponentKind, DetectionReport, Instance, InstanceKey};
use crate::store::{StatusStore, StoreError};

#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("Metadata fetch for {cluster_type} shard {shard} failed: {source}")]
    Metadata {
        cluster_type: String,
        shard: usize,
        #[source]
        source: MetadataError,
    },

    #[error("Status store read failed: {0}")]
    Store(#[from] StoreError),
}

impl ReconcileError {
    /// Name of the failed dependency call, for alerting
    pub fn api_name(&self) -> &'static str {
        match self {
            Self::Metadata { .. } => "instances_by_cluster_type",
            Self::Store(_) => "status_store",
        }
    }
}

/// Filters applied to the metadata inventory
#[derive(Debug, Clone)]
pub struct CoveragePolicy {
    pub ignore_cities: BTreeSet<i64>,
    pub exclusions: Vec<ExclusionRule>,
    /// Reports and heartbeats older than this do not count
    pub freshness: Duration,
}

impl CoveragePolicy {
    pub fn from_config(config: &MonitorConfig) -> Self {
        Self {
            ignore_cities: config.ignore_cities.iter().copied().collect(),
            exclusions: config.exclusions.clone(),
            freshness: Duration::from_secs(config.freshness_window_secs),
        }
    }

    pub fn must_detect(&self, instance: &Instance) -> bool {
        !self.ignore_cities.contains(&instance.logical_city_id)
            && !self.exclusions.iter().any(|rule| rule.excludes(instance))
    }
}

/// Raw material for one reconciliation
#[derive(Debug, Clone)]
pub struct CoverageInputs {
    pub instances: Vec<Instance>,
    pub reports: Vec<DetectionReport>,
    pub agents: Vec<ComponentHeartbeat>,
    pub now: DateTime<Utc>,
}

/// Result of one reconciliation, rebuilt from scratch every cycle
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CoverageSet {
    pub need_instances: BTreeSet<InstanceKey>,
    pub detected_instances: BTreeSet<InstanceKey>,
    pub uncovered_instances: BTreeSet<InstanceKey>,
    pub need_cities: BTreeSet<i64>,
    pub detected_cities: BTreeSet<i64>,
    pub uncovered_cities: BTreeSet<i64>,
}

impl CoverageSet {
    pub fn is_fully_covered(&self) -> bool {
        self.uncovered_instances.is_empty() && self.uncovered_cities.is_empty()
    }
}

/// Set difference of what must be detected and what is detected
///
/// A report counts only when it is fresh and the agent that wrote it still
/// heartbeats inside the freshness window, so a dead agent's instances show
/// up as uncovered even before their last reports age out.
pub fn reconcile(policy: &CoveragePolicy, inputs: &CoverageInputs) -> CoverageSet {
    let fresh = |at: DateTime<Utc>| (inputs.now - at).to_std().unwrap_or_default() <= policy.freshness;

    let need: Vec<&Instance> = inputs
        .instances
        .iter()
        .filter(|i| policy.must_detect(i))
        .collect();
    let need_instances: BTreeSet<InstanceKey> = need.iter().map(|i| i.key()).collect();
    let need_cities: BTreeSet<i64> = need.iter().map(|i| i.logical_city_id).collect();

    let live_agents: Vec<&ComponentHeartbeat> = inputs
        .agents
        .iter()
        .filter(|hb| hb.kind == ComponentKind::Agent && fresh(hb.last_report_time))
        .collect();
    let live_ids: HashSet<&str> = live_agents.iter().map(|hb| hb.component_id.as_str()).collect();

    let detected_instances: BTreeSet<InstanceKey> = inputs
        .reports
        .iter()
        .filter(|r| fresh(r.timestamp) && live_ids.contains(r.detector_id.as_str()))
        .map(DetectionReport::key)
        .collect();
    let detected_cities: BTreeSet<i64> = live_agents
        .iter()
        .filter_map(|hb| hb.scope.logical_city_id)
        .collect();

    CoverageSet {
        uncovered_instances: need_instances.difference(&detected_instances).cloned().collect(),
        uncovered_cities: need_cities.difference(&detected_cities).copied().collect(),
        need_instances,
        detected_instances,
        need_cities,
        detected_cities,
    }
}

/// Fetches reconciliation inputs and runs `reconcile`
pub struct InventoryReconciler {
    metadata: Arc<dyn MetadataSource>,
    store: Arc<dyn StatusStore>,
    policy: CoveragePolicy,
    cluster_types: Vec<String>,
    hash_mod: usize,
}

impl InventoryReconciler {
    pub fn new(
        metadata: Arc<dyn MetadataSource>,
        store: Arc<dyn StatusStore>,
        config: &MonitorConfig,
    ) -> Self {
        Self {
            metadata,
            store,
            policy: CoveragePolicy::from_config(config),
            cluster_types: config.active_cluster_types.clone(),
            hash_mod: config.hash_mod.max(1),
        }
    }

    pub fn policy(&self) -> &CoveragePolicy {
        &self.policy
    }

    /// Every metadata shard in parallel, failing as a whole on any error
    async fn fetch_instances(&self) -> Result<Vec<Instance>, ReconcileError> {
        let fetches = self.cluster_types.iter().flat_map(|cluster_type| {
            (0..self.hash_mod).map(move |shard| async move {
                self.metadata
                    .instances_by_cluster_type(cluster_type, shard, self.hash_mod)
                    .await
                    .map_err(|source| ReconcileError::Metadata {
                        cluster_type: cluster_type.clone(),
                        shard,
                        source,
                    })
            })
        });
        let shards = try_join_all(fetches).await?;
        Ok(shards.into_iter().flatten().collect())
    }

    pub async fn fetch(&self) -> Result<CoverageInputs, ReconcileError> {
        let instances = self.fetch_instances().await?;
        let reports = self
            .store
            .list_recent_detections(self.policy.freshness)
            .await?;
        let agents = self
            .store
            .list_components_by_kind(ComponentKind::Agent, self.policy.freshness)
            .await?;
        debug!(
            instances = instances.len(),
            reports = reports.len(),
            agents = agents.len(),
            "Reconciliation inputs fetched"
        );
        Ok(CoverageInputs {
            instances,
            reports,
            agents,
            now: Utc::now(),
        })
    }

    pub async fn reconcile(&self) -> Result<CoverageSet, ReconcileError> {
        let inputs = self.fetch().await?;
        Ok(reconcile(&self.policy, &inputs))
    }
}
