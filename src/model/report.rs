use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::instance::{Instance, InstanceKey, InstanceStatus};

/// Tri-state probe outcome, with unreachability split out from unhealthiness
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    /// Protocol-level check succeeded
    Healthy,
    /// Host answers but the service is down
    Unhealthy,
    /// Timeout or connection refused
    Unreachable,
    /// Partial success, auth failure or suppressed by the uptime heuristic
    Indeterminate,
}

impl Outcome {
    /// Outcomes that count towards escalation and confirm a switch
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Unhealthy | Self::Unreachable)
    }

    pub fn is_healthy(&self) -> bool {
        *self == Self::Healthy
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Healthy => "healthy",
            Self::Unhealthy => "unhealthy",
            Self::Unreachable => "unreachable",
            Self::Indeterminate => "indeterminate",
        }
    }

    /// Status to record against the instance
    pub fn as_status(&self) -> InstanceStatus {
        match self {
            Self::Healthy => InstanceStatus::Healthy,
            Self::Unhealthy => InstanceStatus::Unhealthy,
            Self::Unreachable => InstanceStatus::Unreachable,
            Self::Indeterminate => InstanceStatus::Unknown,
        }
    }
}

/// One probe outcome as written to the status store
///
/// Reports are snapshots: a newer report for the same instance supersedes
/// the older one, nothing is merged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionReport {
    pub instance: Instance,
    pub outcome: Outcome,
    /// Human-readable probe detail (error text, uptime note)
    pub detail: String,
    pub timestamp: DateTime<Utc>,
    pub detector_id: String,
    /// Consecutive failures observed by the detector when the report was made
    #[serde(default)]
    pub consecutive_failures: u32,
}

impl DetectionReport {
    pub fn new(
        instance: Instance,
        outcome: Outcome,
        detail: impl Into<String>,
        detector_id: impl Into<String>,
    ) -> Self {
        Self {
            instance,
            outcome,
            detail: detail.into(),
            timestamp: Utc::now(),
            detector_id: detector_id.into(),
            consecutive_failures: 0,
        }
    }

    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn with_failures(mut self, consecutive_failures: u32) -> Self {
        self.consecutive_failures = consecutive_failures;
        self
    }

    pub fn key(&self) -> InstanceKey {
        self.instance.key()
    }

    /// Age of the report relative to `now`, zero for reports from the future
    pub fn age(&self, now: DateTime<Utc>) -> std::time::Duration {
        (now - self.timestamp).to_std().unwrap_or_default()
    }
}
