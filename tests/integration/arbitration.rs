//! Agent escalation flowing into the double-check arbiter

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use dbha::alert::{names, MemoryAlertSink};
use dbha::arbiter::{StoreCandidateFeed, SwitchArbiter};
use dbha::config::GmConfig;
use dbha::failover::ChannelExecutor;
use dbha::model::{Decision, InstanceKey};
use dbha::store::MemoryStatusStore;

use crate::detection::{agent_fixture, AgentFixture};
use crate::{scripted_prober, wait_until, ScriptedEngine};

fn fast_poll() -> GmConfig {
    GmConfig {
        candidate_poll_interval_ms: 20,
        ..Default::default()
    }
}

#[tokio::test]
async fn test_persistent_failure_confirms_single_authorization() {
    let mut f = agent_fixture(3);
    f.engine.take_down("10.0.0.5:3306");
    for _ in 0..3 {
        f.agent.sweep().await;
    }
    let candidate = f.candidates.try_recv().expect("escalated candidate");

    let (executor, mut authorizations) = ChannelExecutor::new();
    let alerts = Arc::new(MemoryAlertSink::new());
    let mut arbiter = SwitchArbiter::new(
        "10.2.2.2",
        GmConfig::default(),
        scripted_prober(f.engine.clone()),
        Arc::new(MemoryStatusStore::new()),
        Arc::new(executor),
        alerts.clone(),
    );

    let decisions = arbiter.arbitrate(candidate.clone()).await;
    assert_eq!(decisions, vec![Decision::Confirmed]);

    let auth = authorizations.try_recv().expect("one authorization");
    assert_eq!(auth.instance.key(), InstanceKey::new("10.0.0.5", 3306));
    let hint = auth.replication_hint.expect("standby coordinates");
    assert_eq!(hint.host, "10.0.0.6");
    assert_eq!(hint.binlog_file, "binlog.000031");
    assert_eq!(hint.binlog_position, 1024);
    assert!(authorizations.try_recv().is_err());

    let confirmed = alerts.named(names::DOUBLE_CHECK_CONFIRMED);
    assert_eq!(confirmed.len(), 1);
    assert_eq!(
        confirmed[0].dimension("new_master_binlog_pos").map(|d| d.to_string()),
        Some("1024".to_string())
    );

    // Same candidate again lands in the switch cooldown
    assert!(arbiter.arbitrate(candidate).await.is_empty());
    assert!(authorizations.try_recv().is_err());
}

#[tokio::test]
async fn test_healthy_recheck_rejects_without_authorization() {
    let mut f = agent_fixture(3);
    f.engine.take_down("10.0.0.5:3306");
    for _ in 0..3 {
        f.agent.sweep().await;
    }
    let candidate = f.candidates.try_recv().expect("escalated candidate");
    f.engine.bring_up("10.0.0.5:3306");

    let (executor, mut authorizations) = ChannelExecutor::new();
    let alerts = Arc::new(MemoryAlertSink::new());
    let mut arbiter = SwitchArbiter::new(
        "10.2.2.2",
        GmConfig::default(),
        scripted_prober(f.engine.clone()),
        Arc::new(MemoryStatusStore::new()),
        Arc::new(executor),
        alerts.clone(),
    );

    assert_eq!(arbiter.arbitrate(candidate).await, vec![Decision::Rejected]);
    assert!(authorizations.try_recv().is_err());
    assert_eq!(alerts.named(names::DOUBLE_CHECK_REJECTED).len(), 1);
    assert!(alerts.named(names::DOUBLE_CHECK_CONFIRMED).is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_channel_and_store_intake_arbitrate_each_escalation_once() {
    let AgentFixture {
        mut agent,
        engine,
        store,
        candidates,
        ..
    } = agent_fixture(3);
    engine.take_down("10.0.0.5:3306");
    for _ in 0..3 {
        agent.sweep().await;
    }

    // the GM still reaches the instance, so every episode rejects
    let config = fast_poll();
    let alerts = Arc::new(MemoryAlertSink::new());
    let (executor, mut authorizations) = ChannelExecutor::new();
    let arbiter = SwitchArbiter::new(
        "10.2.2.2",
        config.clone(),
        scripted_prober(Arc::new(ScriptedEngine::default())),
        store.clone(),
        Arc::new(executor),
        alerts.clone(),
    );
    let cancel = CancellationToken::new();
    let feed = StoreCandidateFeed::new(store.clone(), &config);
    let handle = tokio::spawn(arbiter.run(candidates, Some(feed), cancel.clone()));

    let rejected = || alerts.named(names::DOUBLE_CHECK_REJECTED).len();
    wait_until(|| rejected() >= 1).await;
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(rejected(), 1);

    // fourth and fifth failures belong to the escalation already arbitrated
    agent.sweep().await;
    agent.sweep().await;
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(rejected(), 1);

    agent.sweep().await;
    wait_until(|| rejected() >= 2).await;
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(rejected(), 2);
    assert!(authorizations.try_recv().is_err());

    cancel.cancel();
    handle.await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_store_fed_arbiter_takes_escalation_first_seen_past_threshold() {
    let mut f = agent_fixture(3);
    f.engine.take_down("10.0.0.5:3306");
    for _ in 0..4 {
        f.agent.sweep().await;
    }
    let key = InstanceKey::new("10.0.0.5", 3306);
    assert_eq!(f.store.detection(&key).unwrap().consecutive_failures, 4);

    let config = fast_poll();
    let alerts = Arc::new(MemoryAlertSink::new());
    let (executor, mut authorizations) = ChannelExecutor::new();
    let arbiter = SwitchArbiter::new(
        "10.2.2.2",
        config.clone(),
        scripted_prober(f.engine.clone()),
        f.store.clone(),
        Arc::new(executor),
        alerts.clone(),
    );
    let (_intake_tx, intake_rx) = mpsc::channel(1);
    let cancel = CancellationToken::new();
    let feed = StoreCandidateFeed::new(f.store.clone(), &config);
    let handle = tokio::spawn(arbiter.run(intake_rx, Some(feed), cancel.clone()));

    let auth = tokio::time::timeout(Duration::from_secs(5), authorizations.recv())
        .await
        .expect("authorization in time")
        .expect("executor open");
    assert_eq!(auth.instance.key(), key);
    assert_eq!(alerts.named(names::DOUBLE_CHECK_CONFIRMED).len(), 1);

    cancel.cancel();
    handle.await.unwrap();
}
