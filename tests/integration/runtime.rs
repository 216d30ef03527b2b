//! Agent, arbiter and monitor loops spawned together the way the binary runs them

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use dbha::agent::DetectionAgent;
use dbha::alert::{names, MemoryAlertSink};
use dbha::arbiter::{StoreCandidateFeed, SwitchArbiter};
use dbha::circuit::{LimitConfig, ProbeLimiter};
use dbha::config::{AgentConfig, GmConfig, LimiterConfig, MonitorConfig};
use dbha::coverage::{CoverageMonitor, InventoryReconciler};
use dbha::failover::ChannelExecutor;
use dbha::metadata::StaticMetadata;
use dbha::model::{ComponentKind, InstanceKey};
use dbha::store::MemoryStatusStore;

use crate::{primary, scripted_prober, ScriptedEngine};

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_spawned_roles_confirm_one_failover() {
    let engine = Arc::new(ScriptedEngine::default());
    engine.take_down("10.0.0.5:3306");
    let store = Arc::new(MemoryStatusStore::new());
    let alerts = Arc::new(MemoryAlertSink::new());
    let metadata = Arc::new(StaticMetadata::new(vec![
        primary("10.0.0.5", 3306),
        primary("10.0.0.7", 3306),
    ]));
    let prober = scripted_prober(engine.clone());

    let gm_config = GmConfig {
        candidate_poll_interval_ms: 20,
        ..Default::default()
    };
    let (intake_tx, intake_rx) = mpsc::channel(gm_config.intake_capacity);

    let agent_config = AgentConfig {
        active_cluster_types: vec!["tendbha".into()],
        sweep_interval_ms: 20,
        ..Default::default()
    };
    let agent = DetectionAgent::new(
        "10.1.1.1",
        "tendbha",
        Some(1),
        agent_config,
        metadata.clone(),
        store.clone(),
        prober.clone(),
        Arc::new(ProbeLimiter::new(LimitConfig::from(&LimiterConfig::default()))),
        alerts.clone(),
    )
    .with_candidates(intake_tx);

    let (executor, mut authorizations) = ChannelExecutor::new();
    let arbiter = SwitchArbiter::new(
        "10.2.2.2",
        gm_config.clone(),
        prober,
        store.clone(),
        Arc::new(executor),
        alerts.clone(),
    );

    let monitor_config = MonitorConfig {
        active_cluster_types: vec!["tendbha".into()],
        ..Default::default()
    };
    let monitor = CoverageMonitor::new(
        "10.3.3.3",
        monitor_config.clone(),
        InventoryReconciler::new(metadata, store.clone(), &monitor_config),
        store.clone(),
        alerts.clone(),
    );

    let cancel = CancellationToken::new();
    let mut tasks = JoinSet::new();
    tasks.spawn(agent.run(cancel.clone()));
    tasks.spawn(arbiter.run(
        intake_rx,
        Some(StoreCandidateFeed::new(store.clone(), &gm_config)),
        cancel.clone(),
    ));
    tasks.spawn(monitor.run(cancel.clone()));

    let auth = tokio::time::timeout(Duration::from_secs(10), authorizations.recv())
        .await
        .expect("authorization in time")
        .expect("executor open");
    assert_eq!(auth.instance.key(), InstanceKey::new("10.0.0.5", 3306));

    // later escalations of the same failure land in the switch cooldown
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(authorizations.try_recv().is_err());
    assert_eq!(alerts.named(names::DOUBLE_CHECK_CONFIRMED).len(), 1);
    assert_eq!(store.heartbeat_of("10.1.1.1", ComponentKind::Agent).len(), 1);
    assert_eq!(store.heartbeat_of("10.3.3.3", ComponentKind::Monitor).len(), 1);

    cancel.cancel();
    let joined = tokio::time::timeout(Duration::from_secs(5), async {
        while let Some(result) = tasks.join_next().await {
            result.expect("loop exits cleanly");
        }
    })
    .await;
    assert!(joined.is_ok());
}
