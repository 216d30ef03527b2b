use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use super::{EscalationMark, SwitchCandidate};
use crate::config::GmConfig;
use crate::model::InstanceKey;
use crate::store::{StatusStore, StoreError};

/// Picks escalated failure reports out of the status store
///
/// Used when agents run in other processes. The store keeps only the latest
/// report per instance, so an escalation may be seen first at any count past
/// the threshold. Each escalation is offered once; the same instance is
/// offered again after its streak restarts or crosses the next multiple of
/// the threshold.
pub struct StoreCandidateFeed {
    store: Arc<dyn StatusStore>,
    threshold: u32,
    window: Duration,
    offered: HashMap<InstanceKey, EscalationMark>,
}

impl StoreCandidateFeed {
    pub fn new(store: Arc<dyn StatusStore>, config: &GmConfig) -> Self {
        Self {
            store,
            threshold: config.escalation_threshold.max(1),
            window: Duration::from_secs(config.candidate_max_age_secs),
            offered: HashMap::new(),
        }
    }

    pub async fn poll(&mut self) -> Result<Vec<SwitchCandidate>, StoreError> {
        let reports = self.store.list_recent_detections(self.window).await?;
        let mut candidates = Vec::new();
        for report in reports {
            let key = report.key();
            let below = report.consecutive_failures < self.threshold;
            if !report.outcome.is_failure() || below {
                // an indeterminate report leaves the streak running
                let ended = below || report.outcome.is_healthy();
                if ended
                    && matches!(self.offered.get(&key), Some(mark) if mark.seen_at() < report.timestamp)
                {
                    self.offered.remove(&key);
                }
                continue;
            }
            if let Some(mark) = self.offered.get_mut(&key) {
                if !mark.is_superseded_by(&report, self.threshold) {
                    mark.follow(&report);
                    continue;
                }
            }
            self.offered
                .insert(key, EscalationMark::new(&report, self.threshold));
            candidates.push(SwitchCandidate::new(report));
        }

        let horizon: DateTime<Utc> =
            Utc::now() - chrono::Duration::from_std(self.window).unwrap_or_default();
        self.offered.retain(|_, mark| mark.seen_at() >= horizon);
        Ok(candidates)
    }
}
