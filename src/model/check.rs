use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::instance::Instance;
use super::report::{DetectionReport, Outcome};

/// Correlation id of one double-check episode
///
/// Appears on every audit record and on the failover authorization so an
/// operator can trace why an instance was switched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CheckId(Uuid);

impl CheckId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for CheckId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for CheckId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Decision state of a switch check
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Pending,
    Confirmed,
    Rejected,
    Expired,
}

impl Decision {
    pub fn is_terminal(&self) -> bool {
        *self != Self::Pending
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Confirmed => "confirmed",
            Self::Rejected => "rejected",
            Self::Expired => "expired",
        }
    }
}

/// One double-check episode: a first-hand failure and its re-confirmation
#[derive(Debug, Clone)]
pub struct SwitchCheck {
    pub check_id: CheckId,
    pub first_report: DetectionReport,
    pub second_report: Option<DetectionReport>,
    pub decision: Decision,
    pub created_at: DateTime<Utc>,
    /// Number of earlier episodes for the same candidate that expired
    pub attempt: u32,
}

impl SwitchCheck {
    /// Open a Pending episode for an escalated report
    pub fn open(first_report: DetectionReport, attempt: u32) -> Self {
        Self {
            check_id: CheckId::new(),
            first_report,
            second_report: None,
            decision: Decision::Pending,
            created_at: Utc::now(),
            attempt,
        }
    }

    pub fn instance(&self) -> &Instance {
        &self.first_report.instance
    }

    /// Apply the re-probe result and settle the episode
    ///
    /// A failing re-probe confirms only while it is within `validity` of the
    /// first report; a later one expires the episode. A healthy re-probe
    /// rejects at any time. An indeterminate
    /// re-probe is no usable observation and expires the episode.
    pub fn settle(&mut self, second: DetectionReport, validity: Duration) -> Decision {
        if self.decision.is_terminal() {
            return self.decision;
        }

        let gap = (second.timestamp - self.first_report.timestamp)
            .to_std()
            .unwrap_or_default();

        self.decision = match second.outcome {
            Outcome::Healthy => Decision::Rejected,
            o if o.is_failure() && gap <= validity => Decision::Confirmed,
            _ => Decision::Expired,
        };
        self.second_report = Some(second);
        self.decision
    }

    /// Expire a Pending episode with no usable re-probe
    pub fn expire(&mut self) -> Decision {
        if !self.decision.is_terminal() {
            self.decision = Decision::Expired;
        }
        self.decision
    }
}
