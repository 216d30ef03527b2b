use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use futures::stream::{FuturesUnordered, StreamExt};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::episode::{EpisodeResult, EpisodeRunner};
use super::feed::StoreCandidateFeed;
use super::{EscalationMark, SwitchCandidate};
use crate::alert::{emit, names, AlertEvent, AlertSink};
use crate::config::GmConfig;
use crate::failover::{FailoverAuthorization, FailoverExecutor};
use crate::metrics::metrics;
use crate::model::{ComponentKind, Decision, InstanceKey, Scope};
use crate::probe::Prober;
use crate::store::{StatusStore, StoreError};

type Episode = BoxFuture<'static, EpisodeResult>;

/// GM side of the double-check protocol
///
/// Holds at most one open episode per instance and arbitrates each
/// escalation once, whichever intake delivered it. Confirmed instances are
/// left alone for the switch cooldown so one failure yields one failover.
pub struct SwitchArbiter {
    component_id: String,
    scope: Scope,
    config: GmConfig,
    runner: EpisodeRunner,
    prober: Arc<Prober>,
    store: Arc<dyn StatusStore>,
    executor: Arc<dyn FailoverExecutor>,
    alerts: Arc<dyn AlertSink>,
    in_flight: HashSet<InstanceKey>,
    confirmed_at: HashMap<InstanceKey, DateTime<Utc>>,
    escalations: HashMap<InstanceKey, EscalationMark>,
    registered: bool,
}

impl SwitchArbiter {
    pub fn new(
        component_id: impl Into<String>,
        config: GmConfig,
        prober: Arc<Prober>,
        store: Arc<dyn StatusStore>,
        executor: Arc<dyn FailoverExecutor>,
        alerts: Arc<dyn AlertSink>,
    ) -> Self {
        let component_id = component_id.into();
        let runner = EpisodeRunner::new(component_id.clone(), prober.clone(), &config);
        Self {
            component_id,
            scope: Scope::all(),
            config,
            runner,
            prober,
            store,
            executor,
            alerts,
            in_flight: HashSet::new(),
            confirmed_at: HashMap::new(),
            escalations: HashMap::new(),
            registered: false,
        }
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    fn cooling_down(&self, key: &InstanceKey, now: DateTime<Utc>) -> bool {
        let cooldown = Duration::from_secs(self.config.switch_cooldown_secs);
        self.confirmed_at
            .get(key)
            .map(|at| (now - *at).to_std().unwrap_or_default() < cooldown)
            .unwrap_or(false)
    }

    /// Accept a candidate, returning its episode unless it is a duplicate
    ///
    /// Re-queued candidates carry an escalation that was already admitted and
    /// skip the escalation check.
    fn admit(&mut self, candidate: SwitchCandidate) -> Option<Episode> {
        let key = candidate.report.key();
        if self.in_flight.contains(&key) {
            debug!(instance = %key, "Episode already open, candidate dropped");
            return None;
        }
        if self.cooling_down(&key, Utc::now()) {
            debug!(instance = %key, "Instance switched recently, candidate dropped");
            return None;
        }
        if candidate.attempt == 0 {
            let threshold = self.config.escalation_threshold;
            if let Some(mark) = self.escalations.get_mut(&key) {
                if !mark.is_superseded_by(&candidate.report, threshold) {
                    mark.follow(&candidate.report);
                    debug!(instance = %key, "Escalation already arbitrated, candidate dropped");
                    return None;
                }
            }
            self.escalations
                .insert(key.clone(), EscalationMark::new(&candidate.report, threshold));
        }
        self.in_flight.insert(key);
        let runner = self.runner.clone();
        Some(Box::pin(async move { runner.run(candidate).await }))
    }

    /// Close an episode: audit it, act on it, maybe re-queue it
    async fn conclude(&mut self, result: EpisodeResult) -> Option<SwitchCandidate> {
        let EpisodeResult {
            check,
            candidate,
            stale,
        } = result;
        let key = candidate.report.key();
        self.in_flight.remove(&key);
        metrics().record_switch_decision(check.decision.as_str());

        let instance = check.instance().clone();
        let second = check
            .second_report
            .as_ref()
            .map(|r| format!("{} at {}", r.outcome.as_str(), r.timestamp))
            .unwrap_or_else(|| "none".to_string());

        match check.decision {
            Decision::Confirmed => {
                let confirmed_at = check
                    .second_report
                    .as_ref()
                    .map(|r| r.timestamp)
                    .unwrap_or_else(Utc::now);
                self.confirmed_at.insert(key.clone(), confirmed_at);
                let hint = self.prober.replication_hint(&instance);
                warn!(
                    check_id = %check.check_id,
                    instance = %key,
                    second = %second,
                    "Double check confirmed failure"
                );
                emit(
                    self.alerts.as_ref(),
                    AlertEvent::switch(
                        names::DOUBLE_CHECK_CONFIRMED,
                        &instance,
                        check.check_id,
                        hint.as_ref(),
                        format!(
                            "{} failed twice: first {} at {}, second {}",
                            instance,
                            check.first_report.outcome.as_str(),
                            check.first_report.timestamp,
                            second
                        ),
                    ),
                )
                .await;
                let authorization = FailoverAuthorization {
                    check_id: check.check_id,
                    instance,
                    first_detected_at: check.first_report.timestamp,
                    confirmed_at,
                    replication_hint: hint,
                };
                if let Err(e) = self.executor.execute(authorization).await {
                    error!(check_id = %check.check_id, error = %e, "Failed to hand over failover authorization");
                }
                None
            }
            Decision::Rejected => {
                info!(check_id = %check.check_id, instance = %key, "Double check rejected failure");
                emit(
                    self.alerts.as_ref(),
                    AlertEvent::switch(
                        names::DOUBLE_CHECK_REJECTED,
                        &instance,
                        check.check_id,
                        None,
                        format!("{} answered the re-probe: {}", instance, second),
                    ),
                )
                .await;
                None
            }
            Decision::Expired | Decision::Pending => {
                let reason = if stale {
                    "candidate too old to arbitrate"
                } else {
                    "no usable re-probe inside the validity window"
                };
                info!(check_id = %check.check_id, instance = %key, attempt = candidate.attempt, reason, "Double check expired");
                emit(
                    self.alerts.as_ref(),
                    AlertEvent::switch(
                        names::DOUBLE_CHECK_EXPIRED,
                        &instance,
                        check.check_id,
                        None,
                        format!("{}: {}, attempt {}", instance, reason, candidate.attempt),
                    )
                    .with("attempt", candidate.attempt as u64),
                )
                .await;

                if stale {
                    None
                } else if candidate.attempt < self.config.max_requeue {
                    Some(candidate.requeued())
                } else {
                    warn!(instance = %key, attempts = candidate.attempt + 1, "Double check keeps expiring");
                    emit(
                        self.alerts.as_ref(),
                        AlertEvent::switch(
                            names::DOUBLE_CHECK_EXPIRY_RECURRING,
                            &instance,
                            check.check_id,
                            None,
                            format!(
                                "{} expired {} episodes in a row",
                                instance,
                                candidate.attempt + 1
                            ),
                        ),
                    )
                    .await;
                    None
                }
            }
        }
    }

    /// Run one candidate and its re-queues to completion
    ///
    /// Returns the decision of every episode, in order. A duplicate or
    /// cooling-down candidate yields no episodes.
    pub async fn arbitrate(&mut self, candidate: SwitchCandidate) -> Vec<Decision> {
        let mut decisions = Vec::new();
        let mut next = Some(candidate);
        while let Some(candidate) = next.take() {
            let Some(episode) = self.admit(candidate) else {
                break;
            };
            let result = episode.await;
            decisions.push(result.check.decision);
            next = self.conclude(result).await;
        }
        decisions
    }

    fn forget_old_escalations(&mut self, now: DateTime<Utc>) {
        let retention = self
            .config
            .switch_cooldown_secs
            .max(self.config.candidate_max_age_secs);
        let horizon = now - chrono::Duration::seconds(retention as i64);
        self.escalations.retain(|_, mark| mark.seen_at() >= horizon);
    }

    async fn keep_alive(&mut self) {
        if self.registered {
            match self
                .store
                .heartbeat(&self.component_id, ComponentKind::Gm, &self.scope)
                .await
            {
                Ok(()) => return,
                Err(StoreError::NotRegistered(_)) => self.registered = false,
                Err(e) => {
                    warn!(error = %e, "GM heartbeat failed");
                    return;
                }
            }
        }
        match self
            .store
            .register_component(&self.component_id, ComponentKind::Gm, &self.scope)
            .await
        {
            Ok(()) => {
                self.registered = true;
                info!(component = %self.component_id, "GM registered");
            }
            Err(e) => warn!(error = %e, "GM registration failed"),
        }
    }

    /// Intake loop over the in-process channel and, optionally, the store
    pub async fn run(
        mut self,
        mut intake: mpsc::Receiver<SwitchCandidate>,
        mut feed: Option<StoreCandidateFeed>,
        cancel: CancellationToken,
    ) {
        let mut episodes: FuturesUnordered<Episode> = FuturesUnordered::new();
        let mut requeued: VecDeque<SwitchCandidate> = VecDeque::new();
        let mut ticker = interval(Duration::from_millis(
            self.config.candidate_poll_interval_ms.max(1),
        ));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!(component = %self.component_id, "Switch arbiter started");

        loop {
            while let Some(candidate) = requeued.pop_front() {
                if let Some(episode) = self.admit(candidate) {
                    episodes.push(episode);
                }
            }

            tokio::select! {
                _ = cancel.cancelled() => {
                    info!(open_episodes = episodes.len(), "Switch arbiter stopped");
                    return;
                }
                Some(candidate) = intake.recv() => {
                    if let Some(episode) = self.admit(candidate) {
                        episodes.push(episode);
                    }
                }
                Some(result) = episodes.next(), if !episodes.is_empty() => {
                    if let Some(candidate) = self.conclude(result).await {
                        requeued.push_back(candidate);
                    }
                }
                _ = ticker.tick() => {
                    self.keep_alive().await;
                    self.forget_old_escalations(Utc::now());
                    if let Some(feed) = feed.as_mut() {
                        match feed.poll().await {
                            Ok(candidates) => {
                                for candidate in candidates {
                                    if let Some(episode) = self.admit(candidate) {
                                        episodes.push(episode);
                                    }
                                }
                            }
                            Err(e) => warn!(error = %e, "Candidate poll failed"),
                        }
                    }
                }
            }
        }
    }
}
