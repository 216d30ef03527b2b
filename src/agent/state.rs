use chrono::{DateTime, Utc};
use std::time::Duration;

use crate::model::Outcome;

/// What one observation did to an instance's detection state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Healthy after a failure streak
    Recovered,
    /// Failure streak grew but is below the threshold, or already escalated
    Failing(u32),
    /// Streak reached a multiple of the threshold
    Escalate(u32),
    Unchanged,
}

/// Per-instance detection bookkeeping kept by one agent partition
#[derive(Debug, Clone, Default)]
pub struct DetectionState {
    consecutive_failures: u32,
    last_outcome: Option<Outcome>,
    last_reported: Option<(DateTime<Utc>, Outcome)>,
    report_jitter: Duration,
}

impl DetectionState {
    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    pub fn last_outcome(&self) -> Option<Outcome> {
        self.last_outcome
    }

    /// Time and outcome of the last report that reached the store
    pub fn last_reported(&self) -> Option<(DateTime<Utc>, Outcome)> {
        self.last_reported
    }

    /// Spread drawn when the last report was written
    ///
    /// Stays fixed until the next write, so the next healthy report is due
    /// at one point in time instead of at the earliest of many draws.
    pub fn report_jitter(&self) -> Duration {
        self.report_jitter
    }

    /// Fold one probe outcome into the state
    ///
    /// Indeterminate outcomes neither extend nor reset the streak. A streak
    /// escalates at the threshold and again at every further multiple of it,
    /// so an instance that keeps failing is offered for arbitration again.
    pub fn observe(&mut self, outcome: Outcome, threshold: u32) -> Transition {
        let threshold = threshold.max(1);
        self.last_outcome = Some(outcome);
        match outcome {
            Outcome::Healthy => {
                let had_streak = self.consecutive_failures > 0;
                self.consecutive_failures = 0;
                if had_streak {
                    Transition::Recovered
                } else {
                    Transition::Unchanged
                }
            }
            Outcome::Unhealthy | Outcome::Unreachable => {
                self.consecutive_failures = self.consecutive_failures.saturating_add(1);
                let n = self.consecutive_failures;
                if n >= threshold && n % threshold == 0 {
                    Transition::Escalate(n)
                } else {
                    Transition::Failing(n)
                }
            }
            Outcome::Indeterminate => Transition::Unchanged,
        }
    }

    pub fn mark_reported(&mut self, at: DateTime<Utc>, outcome: Outcome, jitter: Duration) {
        self.last_reported = Some((at, outcome));
        self.report_jitter = jitter;
    }
}
