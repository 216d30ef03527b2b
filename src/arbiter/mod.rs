//! Double-check arbitration of switch candidates
//!
//! A candidate is a first-hand failure report from an agent. The arbiter
//! re-probes the instance on its own and only a second failure inside the
//! validity window authorizes a failover.

mod episode;
mod feed;
mod switch;

pub use episode::{EpisodeResult, EpisodeRunner};
pub use feed::StoreCandidateFeed;
pub use switch::SwitchArbiter;

use chrono::{DateTime, Utc};

use crate::model::DetectionReport;

/// Escalated report waiting for arbitration
#[derive(Debug, Clone)]
pub struct SwitchCandidate {
    pub report: DetectionReport,
    /// Expired episodes that preceded this one for the same failure
    pub attempt: u32,
}

impl SwitchCandidate {
    pub fn new(report: DetectionReport) -> Self {
        Self { report, attempt: 0 }
    }

    pub fn requeued(&self) -> Self {
        Self {
            report: self.report.clone(),
            attempt: self.attempt + 1,
        }
    }
}

/// Last escalation seen for one instance
///
/// Two reports belong to the same escalation when the later one continues
/// the streak without crossing another multiple of the threshold. A count
/// that did not grow means the streak was reset in between.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct EscalationMark {
    seen_at: DateTime<Utc>,
    failures: u32,
    step: u32,
}

impl EscalationMark {
    pub(crate) fn new(report: &DetectionReport, threshold: u32) -> Self {
        Self {
            seen_at: report.timestamp,
            failures: report.consecutive_failures,
            step: escalation_step(report.consecutive_failures, threshold),
        }
    }

    pub(crate) fn seen_at(&self) -> DateTime<Utc> {
        self.seen_at
    }

    /// Whether `report` is an escalation this mark has not covered yet
    pub(crate) fn is_superseded_by(&self, report: &DetectionReport, threshold: u32) -> bool {
        report.timestamp > self.seen_at
            && (report.consecutive_failures <= self.failures
                || escalation_step(report.consecutive_failures, threshold) > self.step)
    }

    /// Follow a later report of the same escalation
    pub(crate) fn follow(&mut self, report: &DetectionReport) {
        if report.timestamp > self.seen_at {
            self.seen_at = report.timestamp;
            self.failures = report.consecutive_failures;
        }
    }
}

fn escalation_step(failures: u32, threshold: u32) -> u32 {
    failures / threshold.max(1)
}
