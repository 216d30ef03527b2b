//! Agent sweep scenarios against an in-memory store and inventory

use std::sync::Arc;
use tokio::sync::mpsc;

use dbha::agent::DetectionAgent;
use dbha::alert::{names, MemoryAlertSink};
use dbha::arbiter::SwitchCandidate;
use dbha::circuit::{LimitConfig, ProbeLimiter};
use dbha::config::{AgentConfig, LimiterConfig};
use dbha::metadata::StaticMetadata;
use dbha::model::{InstanceKey, Outcome};
use dbha::store::MemoryStatusStore;

use crate::{primary, scripted_prober, ScriptedEngine};

pub struct AgentFixture {
    pub agent: DetectionAgent,
    pub engine: Arc<ScriptedEngine>,
    pub store: Arc<MemoryStatusStore>,
    pub alerts: Arc<MemoryAlertSink>,
    pub candidates: mpsc::Receiver<SwitchCandidate>,
}

pub fn agent_fixture(threshold: u32) -> AgentFixture {
    let engine = Arc::new(ScriptedEngine::default());
    let store = Arc::new(MemoryStatusStore::new());
    let alerts = Arc::new(MemoryAlertSink::new());
    let metadata = Arc::new(StaticMetadata::new(vec![
        primary("10.0.0.5", 3306),
        primary("10.0.0.7", 3306),
    ]));
    let (tx, candidates) = mpsc::channel(16);
    let config = AgentConfig {
        active_cluster_types: vec!["tendbha".into()],
        escalation_threshold: threshold,
        ..Default::default()
    };
    let agent = DetectionAgent::new(
        "10.1.1.1",
        "tendbha",
        Some(1),
        config,
        metadata,
        store.clone(),
        scripted_prober(engine.clone()),
        Arc::new(ProbeLimiter::new(LimitConfig::from(&LimiterConfig::default()))),
        alerts.clone(),
    )
    .with_candidates(tx);
    AgentFixture {
        agent,
        engine,
        store,
        alerts,
        candidates,
    }
}

#[tokio::test]
async fn test_three_failures_escalate_once() {
    let mut f = agent_fixture(3);
    f.engine.take_down("10.0.0.5:3306");

    for _ in 0..3 {
        f.agent.sweep().await;
    }

    let candidate = f.candidates.try_recv().expect("one candidate after three failures");
    assert_eq!(candidate.report.key(), InstanceKey::new("10.0.0.5", 3306));
    assert_eq!(candidate.report.consecutive_failures, 3);
    assert_eq!(candidate.report.outcome, Outcome::Unreachable);
    assert!(f.candidates.try_recv().is_err());
    assert_eq!(f.alerts.named(names::DETECT_ESCALATED).len(), 1);

    let stored = f.store.detection(&InstanceKey::new("10.0.0.5", 3306)).unwrap();
    assert_eq!(stored.outcome, Outcome::Unreachable);
    assert_eq!(stored.detector_id, "10.1.1.1");
}

#[tokio::test]
async fn test_no_escalation_below_threshold() {
    let mut f = agent_fixture(3);
    f.engine.take_down("10.0.0.5:3306");

    for _ in 0..2 {
        f.agent.sweep().await;
    }
    f.engine.bring_up("10.0.0.5:3306");
    let summary = f.agent.sweep().await;

    assert_eq!(summary.escalated, 0);
    assert!(f.candidates.try_recv().is_err());
    assert!(f.alerts.named(names::DETECT_ESCALATED).is_empty());
    let state = f.agent.state(&InstanceKey::new("10.0.0.5", 3306)).unwrap();
    assert_eq!(state.consecutive_failures(), 0);
}

#[tokio::test]
async fn test_sweep_reports_every_instance_first_time() {
    let mut f = agent_fixture(3);
    let summary = f.agent.sweep().await;

    assert_eq!(summary.instances, 2);
    assert_eq!(summary.probed, 2);
    assert_eq!(summary.reported, 2);
    assert_eq!(f.store.detection_count(), 2);

    // Healthy and unchanged within the interval: nothing new to write
    let summary = f.agent.sweep().await;
    assert_eq!(summary.reported, 0);
    assert_eq!(summary.suppressed, 2);
}
