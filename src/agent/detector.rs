use chrono::Utc;
use futures::stream::{self, StreamExt};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::reporter::ReportPolicy;
use super::state::{DetectionState, Transition};
use crate::alert::{emit, names, AlertEvent, AlertSink};
use crate::arbiter::SwitchCandidate;
use crate::circuit::{JitterPolicy, LimitError, ProbeLimiter};
use crate::config::AgentConfig;
use crate::metadata::MetadataSource;
use crate::metrics::metrics;
use crate::model::{ComponentKind, DetectionReport, Instance, InstanceKey, Scope};
use crate::probe::{ProbeResult, Prober};
use crate::store::{StatusStore, StoreError};

/// Counters for one sweep
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepSummary {
    pub instances: usize,
    pub probed: usize,
    pub skipped: usize,
    pub reported: usize,
    pub suppressed: usize,
    pub escalated: usize,
}

/// Detection loop for one cluster type partition
///
/// The instance set and per-instance state are rebuilt from the metadata
/// source on every sweep; nothing is shared with other partitions except
/// the status store.
pub struct DetectionAgent {
    component_id: String,
    cluster_type: String,
    scope: Scope,
    config: AgentConfig,
    metadata: Arc<dyn MetadataSource>,
    store: Arc<dyn StatusStore>,
    prober: Arc<Prober>,
    limiter: Arc<ProbeLimiter>,
    alerts: Arc<dyn AlertSink>,
    candidates: Option<mpsc::Sender<SwitchCandidate>>,
    policy: ReportPolicy,
    jitter: JitterPolicy,
    instances: Vec<Instance>,
    states: HashMap<InstanceKey, DetectionState>,
    registered: bool,
}

impl DetectionAgent {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        component_id: impl Into<String>,
        cluster_type: impl Into<String>,
        logical_city_id: Option<i64>,
        config: AgentConfig,
        metadata: Arc<dyn MetadataSource>,
        store: Arc<dyn StatusStore>,
        prober: Arc<Prober>,
        limiter: Arc<ProbeLimiter>,
        alerts: Arc<dyn AlertSink>,
    ) -> Self {
        let cluster_type = cluster_type.into();
        let policy = ReportPolicy::from_config(&config);
        let jitter = JitterPolicy::up_to(policy.max_jitter);
        Self {
            component_id: component_id.into(),
            scope: Scope::new(cluster_type.clone(), logical_city_id),
            cluster_type,
            config,
            metadata,
            store,
            prober,
            limiter,
            alerts,
            candidates: None,
            policy,
            jitter,
            instances: Vec::new(),
            states: HashMap::new(),
            registered: false,
        }
    }

    /// Hand escalations straight to an in-process arbiter
    pub fn with_candidates(mut self, candidates: mpsc::Sender<SwitchCandidate>) -> Self {
        self.candidates = Some(candidates);
        self
    }

    pub fn cluster_type(&self) -> &str {
        &self.cluster_type
    }

    pub fn state(&self, key: &InstanceKey) -> Option<&DetectionState> {
        self.states.get(key)
    }

    pub async fn run(mut self, cancel: CancellationToken) {
        let period = self.config.sweep_interval(&self.cluster_type);
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!(
            cluster_type = %self.cluster_type,
            interval_ms = period.as_millis() as u64,
            "Detection agent started"
        );

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!(cluster_type = %self.cluster_type, "Detection agent stopped");
                    return;
                }
                _ = ticker.tick() => {
                    let summary = self.sweep().await;
                    debug!(cluster_type = %self.cluster_type, ?summary, "Sweep finished");
                }
            }
        }
    }

    /// One pass over the partition
    pub async fn sweep(&mut self) -> SweepSummary {
        self.keep_alive().await;
        self.refresh_partition().await;

        let mut summary = SweepSummary {
            instances: self.instances.len(),
            ..Default::default()
        };

        let fanout = self.config.probe_fanout.max(1);
        let prober = self.prober.clone();
        let limiter = self.limiter.clone();
        let resource = self.cluster_type.clone();
        let results: Vec<(Instance, Option<ProbeResult>)> =
            stream::iter(self.instances.clone())
                .map(|instance| {
                    let prober = prober.clone();
                    let limiter = limiter.clone();
                    let resource = resource.clone();
                    async move {
                        let _permit = match limiter.acquire(&resource).await {
                            Ok(permit) => Some(permit),
                            Err(LimitError::Disabled) => None,
                            Err(e) => {
                                debug!(instance = %instance, error = %e, "Probe skipped");
                                return (instance, None);
                            }
                        };
                        let result = prober.probe(&instance).await;
                        (instance, Some(result))
                    }
                })
                .buffer_unordered(fanout)
                .collect()
                .await;

        for (instance, result) in results {
            match result {
                Some(result) => {
                    summary.probed += 1;
                    self.apply(instance, result, &mut summary).await;
                }
                None => summary.skipped += 1,
            }
        }
        summary
    }

    async fn apply(&mut self, mut instance: Instance, result: ProbeResult, summary: &mut SweepSummary) {
        let key = instance.key();
        let threshold = self.config.escalation_threshold;
        let state = self.states.entry(key.clone()).or_default();
        let transition = state.observe(result.outcome, threshold);
        let last_reported = state.last_reported();
        let report_jitter = state.report_jitter();
        let failures = state.consecutive_failures();

        instance.status = result.outcome.as_status();
        let report = DetectionReport::new(
            instance,
            result.outcome,
            result.detail,
            self.component_id.clone(),
        )
        .with_failures(failures);

        let now = Utc::now();
        if self
            .policy
            .should_report(report.outcome, last_reported, now, report_jitter)
        {
            match self.store.put_detection_report(report.clone()).await {
                Ok(()) => {
                    summary.reported += 1;
                    metrics().record_report_written(report.outcome.as_str());
                    let jitter = self.jitter.sample();
                    if let Some(state) = self.states.get_mut(&key) {
                        state.mark_reported(report.timestamp, report.outcome, jitter);
                    }
                }
                Err(e) => warn!(instance = %key, error = %e, "Failed to write detection report"),
            }
        } else {
            summary.suppressed += 1;
            metrics().record_report_suppressed();
        }

        match transition {
            Transition::Escalate(n) => {
                summary.escalated += 1;
                self.escalate(report, n).await;
            }
            Transition::Recovered => {
                info!(instance = %key, "Instance recovered");
            }
            Transition::Failing(n) => {
                debug!(instance = %key, failures = n, outcome = report.outcome.as_str(), "Instance failing");
            }
            Transition::Unchanged => {}
        }
    }

    async fn escalate(&self, report: DetectionReport, failures: u32) {
        warn!(
            instance = %report.key(),
            failures,
            detail = %report.detail,
            "Instance escalated to switch candidate"
        );
        metrics().record_escalation(&self.cluster_type);
        emit(
            self.alerts.as_ref(),
            AlertEvent::detect(
                names::DETECT_ESCALATED,
                &report.instance,
                format!(
                    "{} failed {} consecutive probes: {}",
                    report.instance, failures, report.detail
                ),
            ),
        )
        .await;

        if let Some(tx) = &self.candidates {
            if let Err(e) = tx.try_send(SwitchCandidate::new(report)) {
                warn!(error = %e, "Failed to hand switch candidate to arbiter");
            }
        }
    }

    async fn keep_alive(&mut self) {
        if self.registered {
            match self
                .store
                .heartbeat(&self.component_id, ComponentKind::Agent, &self.scope)
                .await
            {
                Ok(()) => return,
                Err(StoreError::NotRegistered(_)) => self.registered = false,
                Err(e) => {
                    warn!(error = %e, "Agent heartbeat failed");
                    return;
                }
            }
        }
        match self
            .store
            .register_component(&self.component_id, ComponentKind::Agent, &self.scope)
            .await
        {
            Ok(()) => {
                self.registered = true;
                info!(component = %self.component_id, cluster_type = %self.cluster_type, "Agent registered");
            }
            Err(e) => warn!(error = %e, "Agent registration failed"),
        }
    }

    async fn refresh_partition(&mut self) {
        match self
            .metadata
            .instances_by_cluster_type(
                &self.cluster_type,
                self.config.shard_index,
                self.config.shard_count,
            )
            .await
        {
            Ok(instances) => {
                let keep: std::collections::HashSet<InstanceKey> =
                    instances.iter().map(Instance::key).collect();
                self.states.retain(|k, _| keep.contains(k));
                self.instances = instances;
            }
            Err(e) => {
                warn!(
                    cluster_type = %self.cluster_type,
                    error = %e,
                    "Metadata refresh failed, probing previous partition"
                );
            }
        }
    }
}
