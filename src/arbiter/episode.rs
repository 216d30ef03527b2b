use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::debug;

use super::SwitchCandidate;
use crate::config::GmConfig;
use crate::model::{DetectionReport, Instance, SwitchCheck};
use crate::probe::Prober;

/// A finished episode
#[derive(Debug, Clone)]
pub struct EpisodeResult {
    pub check: SwitchCheck,
    pub candidate: SwitchCandidate,
    /// First report was already too old to arbitrate
    pub stale: bool,
}

/// Runs one double-check episode to a terminal decision
#[derive(Clone)]
pub struct EpisodeRunner {
    gm_id: String,
    prober: Arc<Prober>,
    validity: Duration,
    max_age: Duration,
    recheck_delay: Duration,
}

impl EpisodeRunner {
    pub fn new(gm_id: impl Into<String>, prober: Arc<Prober>, config: &GmConfig) -> Self {
        Self {
            gm_id: gm_id.into(),
            prober,
            validity: Duration::from_secs(config.expiry_window_secs),
            max_age: Duration::from_secs(config.candidate_max_age_secs),
            recheck_delay: Duration::from_millis(config.recheck_delay_ms),
        }
    }

    pub fn validity(&self) -> Duration {
        self.validity
    }

    /// Fresh probe bounded by `deadline`, `None` when it did not finish
    async fn observe(&self, instance: &Instance, deadline: Duration) -> Option<DetectionReport> {
        let result = timeout(deadline, self.prober.probe(instance)).await.ok()?;
        let mut snapshot = instance.clone();
        snapshot.status = result.outcome.as_status();
        Some(DetectionReport::new(
            snapshot,
            result.outcome,
            result.detail,
            self.gm_id.clone(),
        ))
    }

    /// Second probe, bounded by what is left of the validity window
    async fn recheck(&self, check: &mut SwitchCheck) {
        let remaining = self
            .validity
            .saturating_sub(check.first_report.age(Utc::now()));
        if remaining.is_zero() {
            check.expire();
            return;
        }
        let instance = check.instance().clone();
        match self.observe(&instance, remaining).await {
            Some(second) => {
                check.settle(second, self.validity);
            }
            None => {
                check.expire();
            }
        }
    }

    pub async fn run(&self, candidate: SwitchCandidate) -> EpisodeResult {
        if candidate.attempt == 0 {
            let mut check = SwitchCheck::open(candidate.report.clone(), 0);
            let stale = candidate.report.age(Utc::now()) > self.max_age;
            if stale {
                check.expire();
            } else {
                self.recheck(&mut check).await;
            }
            return EpisodeResult {
                check,
                candidate,
                stale,
            };
        }

        // a re-queued episode needs a fresh first observation
        let instance = candidate.report.instance.clone();
        let check = match self.observe(&instance, self.validity).await {
            Some(first) if first.outcome.is_failure() => {
                let mut check = SwitchCheck::open(first, candidate.attempt);
                tokio::time::sleep(self.recheck_delay).await;
                self.recheck(&mut check).await;
                check
            }
            Some(other) => {
                let mut check = SwitchCheck::open(candidate.report.clone(), candidate.attempt);
                check.settle(other, self.validity);
                check
            }
            None => {
                let mut check = SwitchCheck::open(candidate.report.clone(), candidate.attempt);
                check.expire();
                check
            }
        };
        debug!(
            check_id = %check.check_id,
            instance = %instance,
            attempt = candidate.attempt,
            decision = check.decision.as_str(),
            "Re-queued episode finished"
        );
        EpisodeResult {
            check,
            candidate,
            stale: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Decision, Outcome};
    use crate::probe::{DetectionEngine, EngineRegistry, ProbeError};
    use async_trait::async_trait;
    use chrono::Duration as ChronoDuration;
    use parking_lot::Mutex;
    use std::collections::VecDeque;

    /// Plays back a fixed sequence of probe results
    struct Script(Mutex<VecDeque<Result<String, ProbeError>>>);

    impl Script {
        fn new(results: Vec<Result<String, ProbeError>>) -> Arc<Self> {
            Arc::new(Self(Mutex::new(results.into())))
        }
    }

    #[async_trait]
    impl DetectionEngine for Script {
        fn name(&self) -> &'static str {
            "script"
        }

        async fn probe(&self, _: &Instance) -> Result<String, ProbeError> {
            let next = self.0.lock().pop_front();
            match next {
                Some(result) => result,
                None => std::future::pending().await,
            }
        }
    }

    fn runner(script: Arc<Script>) -> EpisodeRunner {
        let prober = Arc::new(Prober::new(Arc::new(EngineRegistry::new(script))));
        let config = GmConfig {
            expiry_window_secs: 2,
            recheck_delay_ms: 10,
            ..Default::default()
        };
        EpisodeRunner::new("gm-1", prober, &config)
    }

    fn candidate(age_secs: i64, attempt: u32) -> SwitchCandidate {
        let report = DetectionReport::new(
            Instance::new("10.0.0.5", 3306, "tendbha"),
            Outcome::Unreachable,
            "refused",
            "agent-1",
        )
        .at(Utc::now() - ChronoDuration::seconds(age_secs))
        .with_failures(3);
        SwitchCandidate { report, attempt }
    }

    fn refused() -> Result<String, ProbeError> {
        Err(ProbeError::Refused("10.0.0.5:3306".into()))
    }

    #[tokio::test]
    async fn test_confirm_on_second_failure() {
        let r = runner(Script::new(vec![refused()]));
        let result = r.run(candidate(0, 0)).await;
        assert_eq!(result.check.decision, Decision::Confirmed);
        let second = result.check.second_report.unwrap();
        assert_eq!(second.detector_id, "gm-1");
        assert!(second.timestamp >= result.check.first_report.timestamp);
    }

    #[tokio::test]
    async fn test_reject_on_healthy() {
        let r = runner(Script::new(vec![Ok("ok".into())]));
        let result = r.run(candidate(0, 0)).await;
        assert_eq!(result.check.decision, Decision::Rejected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_hanging_recheck_expires() {
        let r = runner(Script::new(vec![]));
        let result = r.run(candidate(0, 0)).await;
        assert_eq!(result.check.decision, Decision::Expired);
        assert!(!result.stale);
    }

    #[tokio::test]
    async fn test_window_already_spent_expires_without_probe() {
        let r = runner(Script::new(vec![refused()]));
        let result = r.run(candidate(5, 0)).await;
        assert_eq!(result.check.decision, Decision::Expired);
        assert!(result.check.second_report.is_none());
    }

    #[tokio::test]
    async fn test_stale_candidate() {
        let r = runner(Script::new(vec![refused()]));
        let result = r.run(candidate(120, 0)).await;
        assert_eq!(result.check.decision, Decision::Expired);
        assert!(result.stale);
    }

    #[tokio::test]
    async fn test_requeued_episode_takes_fresh_observations() {
        let r = runner(Script::new(vec![refused(), refused()]));
        let result = r.run(candidate(30, 1)).await;
        assert_eq!(result.check.decision, Decision::Confirmed);
        assert_eq!(result.check.attempt, 1);
        assert_eq!(result.check.first_report.detector_id, "gm-1");
    }

    #[tokio::test]
    async fn test_requeued_episode_rejects_on_recovery() {
        let r = runner(Script::new(vec![Ok("ok".into())]));
        let result = r.run(candidate(30, 2)).await;
        assert_eq!(result.check.decision, Decision::Rejected);
    }
}
