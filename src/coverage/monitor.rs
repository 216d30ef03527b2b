use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use super::reconciler::{CoverageSet, InventoryReconciler};
use crate::alert::{emit, names, AlertEvent, AlertSink};
use crate::config::MonitorConfig;
use crate::metrics::metrics;
use crate::model::{ComponentKind, Scope};
use crate::store::{StatusStore, StoreError};

/// What one monitor cycle found
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleSummary {
    /// Reconciliation ran; false when the cycle was skipped
    pub reconciled: bool,
    pub uncovered_instances: usize,
    pub uncovered_cities: usize,
    pub slow_components: usize,
    pub alerts: usize,
}

/// Periodic coverage and liveness checks
///
/// Slow components and coverage gaps are alerted on every cycle for as long
/// as they persist.
pub struct CoverageMonitor {
    component_id: String,
    config: MonitorConfig,
    reconciler: InventoryReconciler,
    store: Arc<dyn StatusStore>,
    alerts: Arc<dyn AlertSink>,
    last: Option<CoverageSet>,
    registered: bool,
}

impl CoverageMonitor {
    pub fn new(
        component_id: impl Into<String>,
        config: MonitorConfig,
        reconciler: InventoryReconciler,
        store: Arc<dyn StatusStore>,
        alerts: Arc<dyn AlertSink>,
    ) -> Self {
        Self {
            component_id: component_id.into(),
            config,
            reconciler,
            store,
            alerts,
            last: None,
            registered: false,
        }
    }

    /// Coverage from the last cycle that reconciled successfully
    pub fn last_coverage(&self) -> Option<&CoverageSet> {
        self.last.as_ref()
    }

    pub async fn run(mut self, cancel: CancellationToken) {
        let mut ticker = interval(Duration::from_secs(self.config.interval_secs.max(1)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!(component = %self.component_id, "Coverage monitor started");

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("Coverage monitor stopped");
                    return;
                }
                _ = ticker.tick() => {
                    let summary = self.cycle().await;
                    if summary.alerts > 0 {
                        info!(?summary, "Monitor cycle raised alerts");
                    }
                }
            }
        }
    }

    pub async fn cycle(&mut self) -> CycleSummary {
        self.keep_alive().await;
        let mut summary = CycleSummary::default();

        match self.reconciler.reconcile().await {
            Ok(coverage) => {
                summary.reconciled = true;
                summary.uncovered_instances = coverage.uncovered_instances.len();
                summary.uncovered_cities = coverage.uncovered_cities.len();
                metrics().set_coverage(&coverage);
                summary.alerts += self.alert_coverage(&coverage).await;
                self.last = Some(coverage);
            }
            Err(e) => {
                warn!(error = %e, "Reconciliation failed, cycle skipped");
                self.api_alert(e.api_name(), e.to_string()).await;
                summary.alerts += 1;
            }
        }

        match self.slow_components().await {
            Ok(slow) => {
                summary.slow_components = slow;
                summary.alerts += slow;
            }
            Err(e) => {
                warn!(error = %e, "Component listing failed");
                self.api_alert("list_components_by_kind", e.to_string()).await;
                summary.alerts += 1;
            }
        }
        summary
    }

    async fn alert_coverage(&self, coverage: &CoverageSet) -> usize {
        let mut sent = 0;
        if !coverage.uncovered_instances.is_empty() {
            let members = coverage
                .uncovered_instances
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(",");
            error!(
                count = coverage.uncovered_instances.len(),
                instances = %members,
                "Instances not covered by any live agent"
            );
            let event = AlertEvent::global(
                names::GLOBAL_MONITOR,
                &self.component_id,
                format!(
                    "{} of {} instances are not detected",
                    coverage.uncovered_instances.len(),
                    coverage.need_instances.len()
                ),
            )
            .with("uncovered_ins_num", coverage.uncovered_instances.len())
            .with("need_detect_num", coverage.need_instances.len())
            .with("ha_detect_num", coverage.detected_instances.len());
            emit(self.alerts.as_ref(), event).await;
            sent += 1;
        }

        if !coverage.uncovered_cities.is_empty() {
            let cities = coverage
                .uncovered_cities
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(",");
            warn!(cities = %cities, "Localities without a live agent");
            let event = AlertEvent::global(
                names::GLOBAL_MONITOR,
                &self.component_id,
                format!(
                    "{} localities have no live agent: {}",
                    coverage.uncovered_cities.len(),
                    cities
                ),
            )
            .with("uncovered_city_num", coverage.uncovered_cities.len())
            .with("uncovered_city_ids", cities);
            emit(self.alerts.as_ref(), event).await;
            sent += 1;
        }
        sent
    }

    async fn slow_components(&self) -> Result<usize, StoreError> {
        let lookback = Duration::from_secs(self.config.component_lookback_secs);
        let now = Utc::now();
        let mut slow = 0;
        for (kind, ceiling_secs) in [
            (ComponentKind::Agent, self.config.agent_report_ceiling_secs),
            (ComponentKind::Gm, self.config.gm_report_ceiling_secs),
        ] {
            let ceiling = Duration::from_secs(ceiling_secs);
            for hb in self.store.list_components_by_kind(kind, lookback).await? {
                let observed = hb.observed_interval(now);
                if observed <= ceiling {
                    continue;
                }
                slow += 1;
                metrics().record_slow_component(kind.as_str());
                warn!(
                    component = %hb.component_id,
                    kind = %kind,
                    observed_secs = observed.as_secs(),
                    ceiling_secs,
                    "Component reporting too slow"
                );
                let event = AlertEvent::global(
                    names::COMPONENT_SLOW,
                    &hb.component_id,
                    format!(
                        "{} {} reported {}s apart, ceiling {}s",
                        kind,
                        hb.component_id,
                        observed.as_secs(),
                        ceiling_secs
                    ),
                )
                .with("component_kind", kind.as_str())
                .with("cluster_type", hb.scope.cluster_type.as_str())
                .with("report_interval", observed.as_secs());
                emit(self.alerts.as_ref(), event).await;
            }
        }
        Ok(slow)
    }

    async fn api_alert(&self, api_name: &str, message: String) {
        emit(
            self.alerts.as_ref(),
            AlertEvent::api(&self.component_id, api_name, message),
        )
        .await;
    }

    async fn keep_alive(&mut self) {
        let scope = Scope::all();
        if self.registered {
            match self
                .store
                .heartbeat(&self.component_id, ComponentKind::Monitor, &scope)
                .await
            {
                Ok(()) => return,
                Err(StoreError::NotRegistered(_)) => self.registered = false,
                Err(e) => {
                    warn!(error = %e, "Monitor heartbeat failed");
                    return;
                }
            }
        }
        match self
            .store
            .register_component(&self.component_id, ComponentKind::Monitor, &scope)
            .await
        {
            Ok(()) => self.registered = true,
            Err(e) => warn!(error = %e, "Monitor registration failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alert::MemoryAlertSink;
    use crate::metadata::StaticMetadata;
    use crate::model::{ComponentHeartbeat, DetectionReport, Instance, Outcome};
    use crate::store::MemoryStatusStore;
    use chrono::Duration as ChronoDuration;

    struct Fixture {
        monitor: CoverageMonitor,
        store: Arc<MemoryStatusStore>,
        metadata: Arc<StaticMetadata>,
        alerts: Arc<MemoryAlertSink>,
    }

    fn fixture(instances: Vec<Instance>) -> Fixture {
        let store = Arc::new(MemoryStatusStore::new());
        let metadata = Arc::new(StaticMetadata::new(instances));
        let alerts = Arc::new(MemoryAlertSink::new());
        let config = MonitorConfig {
            active_cluster_types: vec!["tendbha".into()],
            hash_mod: 2,
            ..Default::default()
        };
        let reconciler = InventoryReconciler::new(metadata.clone(), store.clone(), &config);
        let monitor = CoverageMonitor::new("10.9.9.9", config, reconciler, store.clone(), alerts.clone());
        Fixture {
            monitor,
            store,
            metadata,
            alerts,
        }
    }

    fn heartbeat(id: &str, kind: ComponentKind, age_secs: i64) -> ComponentHeartbeat {
        ComponentHeartbeat {
            component_id: id.into(),
            kind,
            last_report_time: Utc::now() - ChronoDuration::seconds(age_secs),
            report_interval: Duration::from_secs(5),
            scope: Scope::new("tendbha", Some(1)),
        }
    }

    fn instances(count: u8) -> Vec<Instance> {
        (0..count)
            .map(|n| {
                let mut ins = Instance::new(format!("10.0.0.{}", n), 3306, "tendbha");
                ins.cluster_id = n as u64;
                ins.logical_city_id = 1;
                ins
            })
            .collect()
    }

    #[tokio::test]
    async fn test_covered_inventory_raises_nothing() {
        let list = instances(4);
        let mut f = fixture(list.clone());
        f.store.put_heartbeat(heartbeat("agent-1", ComponentKind::Agent, 1));
        for ins in &list {
            f.store
                .put_detection_report(DetectionReport::new(ins.clone(), Outcome::Healthy, "", "agent-1"))
                .await
                .unwrap();
        }

        let summary = f.monitor.cycle().await;
        assert!(summary.reconciled);
        assert_eq!(summary.alerts, 0);
        assert!(f.alerts.events().is_empty());
        assert!(f.monitor.last_coverage().unwrap().is_fully_covered());
        assert_eq!(f.store.heartbeat_of("10.9.9.9", ComponentKind::Monitor).len(), 1);
    }

    #[tokio::test]
    async fn test_one_alert_per_uncovered_set() {
        let mut f = fixture(instances(5));
        let summary = f.monitor.cycle().await;

        assert_eq!(summary.uncovered_instances, 5);
        assert_eq!(summary.uncovered_cities, 1);
        let global = f.alerts.named(names::GLOBAL_MONITOR);
        assert_eq!(global.len(), 2);
        assert!(global
            .iter()
            .any(|e| e.dimension("uncovered_ins_num").map(|d| d.to_string()) == Some("5".into())));
        assert!(global
            .iter()
            .any(|e| e.dimension("uncovered_city_ids").map(|d| d.to_string()) == Some("1".into())));
    }

    #[tokio::test]
    async fn test_metadata_outage_skips_cycle() {
        let mut f = fixture(instances(5));
        f.store.put_heartbeat(heartbeat("agent-1", ComponentKind::Agent, 1));
        f.monitor.cycle().await;
        let previous = f.monitor.last_coverage().cloned();
        f.alerts.clear();

        f.metadata.set_unavailable(true);
        let summary = f.monitor.cycle().await;
        assert!(!summary.reconciled);
        assert!(f.alerts.named(names::GLOBAL_MONITOR).is_empty());
        assert_eq!(f.alerts.named(names::API_FAILED).len(), 1);
        assert_eq!(f.monitor.last_coverage().cloned(), previous);
    }

    #[tokio::test]
    async fn test_slow_gm_alerts_each_cycle() {
        let mut f = fixture(Vec::new());
        f.store.put_heartbeat(heartbeat("gm-1", ComponentKind::Gm, 310));
        f.store.put_heartbeat(heartbeat("gm-2", ComponentKind::Gm, 30));
        f.store.put_heartbeat(heartbeat("agent-1", ComponentKind::Agent, 2));

        let summary = f.monitor.cycle().await;
        assert_eq!(summary.slow_components, 1);
        let slow = f.alerts.named(names::COMPONENT_SLOW);
        assert_eq!(slow.len(), 1);
        assert_eq!(slow[0].dimension("server_ip").map(|d| d.to_string()), Some("gm-1".into()));

        f.monitor.cycle().await;
        assert_eq!(f.alerts.named(names::COMPONENT_SLOW).len(), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_spawned_monitor_reports_outage_and_stops() {
        let f = fixture(instances(3));
        f.metadata.set_unavailable(true);
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(f.monitor.run(cancel.clone()));

        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while f.alerts.named(names::API_FAILED).is_empty() && tokio::time::Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(f.alerts.named(names::API_FAILED).len(), 1);
        assert!(f.alerts.named(names::GLOBAL_MONITOR).is_empty());

        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
