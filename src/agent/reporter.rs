use chrono::{DateTime, Utc};
use std::time::Duration;

use crate::config::AgentConfig;
use crate::model::Outcome;

/// Decides whether a probe result is written to the status store
///
/// Failures, indeterminate results and outcome changes are always written.
/// A steady healthy instance is written once per report interval plus a
/// random spread, and unconditionally once the ceiling has passed.
#[derive(Debug, Clone)]
pub struct ReportPolicy {
    pub interval: Duration,
    pub max_jitter: Duration,
    pub ceiling: Duration,
}

impl ReportPolicy {
    pub fn from_config(config: &AgentConfig) -> Self {
        Self {
            interval: Duration::from_secs(config.report_interval_secs),
            max_jitter: Duration::from_secs(config.report_jitter_secs),
            ceiling: Duration::from_secs(config.report_ceiling_secs),
        }
    }

    /// `jitter` is drawn by the caller from `[0, max_jitter]`
    pub fn should_report(
        &self,
        outcome: Outcome,
        last: Option<(DateTime<Utc>, Outcome)>,
        now: DateTime<Utc>,
        jitter: Duration,
    ) -> bool {
        if !outcome.is_healthy() {
            return true;
        }
        let (at, last_outcome) = match last {
            Some(last) => last,
            None => return true,
        };
        if last_outcome != outcome {
            return true;
        }
        let elapsed = (now - at).to_std().unwrap_or_default();
        if elapsed > self.ceiling {
            return true;
        }
        elapsed > self.interval + jitter.min(self.max_jitter)
    }
}
