//! Inventory reconciliation and component liveness scenarios

use chrono::{Duration as ChronoDuration, Utc};
use std::sync::Arc;
use std::time::Duration;

use dbha::alert::{names, MemoryAlertSink};
use dbha::config::MonitorConfig;
use dbha::coverage::{CoverageMonitor, InventoryReconciler};
use dbha::metadata::StaticMetadata;
use dbha::model::{ComponentHeartbeat, ComponentKind, DetectionReport, Instance, Outcome, Scope};
use dbha::store::{MemoryStatusStore, StatusStore};

const CLUSTER_TYPES: [&str; 3] = ["tendbha", "tendbcluster", "TwemproxyRedisInstance"];

struct MonitorFixture {
    monitor: CoverageMonitor,
    reconciler: InventoryReconciler,
    store: Arc<MemoryStatusStore>,
    metadata: Arc<StaticMetadata>,
    alerts: Arc<MemoryAlertSink>,
}

fn monitor_fixture(instances: Vec<Instance>) -> MonitorFixture {
    let store = Arc::new(MemoryStatusStore::new());
    let metadata = Arc::new(StaticMetadata::new(instances));
    let alerts = Arc::new(MemoryAlertSink::new());
    let config = MonitorConfig {
        active_cluster_types: CLUSTER_TYPES.iter().map(|s| s.to_string()).collect(),
        hash_mod: 4,
        ..Default::default()
    };
    let monitor = CoverageMonitor::new(
        "10.3.3.3",
        config.clone(),
        InventoryReconciler::new(metadata.clone(), store.clone(), &config),
        store.clone(),
        alerts.clone(),
    );
    MonitorFixture {
        monitor,
        reconciler: InventoryReconciler::new(metadata.clone(), store.clone(), &config),
        store,
        metadata,
        alerts,
    }
}

/// 100 instances spread over three cluster types in one locality
fn inventory() -> Vec<Instance> {
    (0..100u16)
        .map(|n| {
            let cluster_type = CLUSTER_TYPES[(n % 3) as usize];
            let mut ins = Instance::new(format!("10.10.{}.{}", n / 50, n % 50), 3306 + n, cluster_type);
            ins.cluster_id = u64::from(n / 2);
            ins.logical_city_id = 1;
            ins
        })
        .collect()
}

fn heartbeat(id: &str, kind: ComponentKind, age_secs: i64) -> ComponentHeartbeat {
    ComponentHeartbeat {
        component_id: id.to_string(),
        kind,
        last_report_time: Utc::now() - ChronoDuration::seconds(age_secs),
        report_interval: Duration::from_secs(5),
        scope: Scope::new("tendbha", Some(1)),
    }
}

async fn detect(store: &MemoryStatusStore, instances: &[Instance], detector: &str) {
    for ins in instances {
        store
            .put_detection_report(DetectionReport::new(ins.clone(), Outcome::Healthy, "", detector))
            .await
            .unwrap();
    }
}

#[tokio::test]
async fn test_ninety_of_hundred_detected() {
    let instances = inventory();
    let mut f = monitor_fixture(instances.clone());
    f.store.put_heartbeat(heartbeat("agent-1", ComponentKind::Agent, 2));
    detect(&f.store, &instances[..90], "agent-1").await;

    let summary = f.monitor.cycle().await;
    assert!(summary.reconciled);
    assert_eq!(summary.uncovered_instances, 10);
    assert_eq!(summary.uncovered_cities, 0);

    let coverage = f.monitor.last_coverage().unwrap();
    assert_eq!(coverage.need_instances.len(), 100);
    assert_eq!(coverage.detected_instances.len(), 90);
    let expected: Vec<_> = instances[90..].iter().map(Instance::key).collect();
    assert_eq!(coverage.uncovered_instances.len(), 10);
    for key in &expected {
        assert!(coverage.uncovered_instances.contains(key));
    }

    let global = f.alerts.named(names::GLOBAL_MONITOR);
    assert_eq!(global.len(), 1);
    assert_eq!(
        global[0].dimension("uncovered_ins_num").map(|d| d.to_string()),
        Some("10".to_string())
    );
}

#[tokio::test]
async fn test_reports_from_dead_agent_do_not_count() {
    let instances = inventory();
    let f = monitor_fixture(instances.clone());
    f.store.put_heartbeat(heartbeat("agent-1", ComponentKind::Agent, 2));
    detect(&f.store, &instances[..50], "agent-1").await;
    detect(&f.store, &instances[50..], "agent-gone").await;

    let coverage = f.reconciler.reconcile().await.unwrap();
    assert_eq!(coverage.detected_instances.len(), 50);
    assert_eq!(coverage.uncovered_instances.len(), 50);
}

#[tokio::test]
async fn test_reconciliation_is_idempotent() {
    let instances = inventory();
    let f = monitor_fixture(instances.clone());
    f.store.put_heartbeat(heartbeat("agent-1", ComponentKind::Agent, 2));
    detect(&f.store, &instances[..70], "agent-1").await;

    let first = f.reconciler.reconcile().await.unwrap();
    let second = f.reconciler.reconcile().await.unwrap();
    assert_eq!(first, second);
    assert_eq!(first.uncovered_instances.len(), 30);
}

#[tokio::test]
async fn test_stale_gm_alerts_once_per_cycle() {
    let mut f = monitor_fixture(Vec::new());
    f.store.put_heartbeat(heartbeat("10.2.2.2", ComponentKind::Gm, 310));

    for cycle in 1..=3 {
        let summary = f.monitor.cycle().await;
        assert_eq!(summary.slow_components, 1);
        assert_eq!(f.alerts.named(names::COMPONENT_SLOW).len(), cycle);
    }
    let alert = &f.alerts.named(names::COMPONENT_SLOW)[0];
    assert_eq!(
        alert.dimension("component_kind").map(|d| d.to_string()),
        Some("gm".to_string())
    );
}

#[tokio::test]
async fn test_metadata_outage_skips_cycle() {
    let instances = inventory();
    let mut f = monitor_fixture(instances);
    f.metadata.set_unavailable(true);

    let summary = f.monitor.cycle().await;
    assert!(!summary.reconciled);
    assert!(f.monitor.last_coverage().is_none());
    assert!(f.alerts.named(names::GLOBAL_MONITOR).is_empty());
    assert_eq!(f.alerts.named(names::API_FAILED).len(), 1);
}
