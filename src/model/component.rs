use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Kind of control-plane component writing heartbeats
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComponentKind {
    Agent,
    Gm,
    Monitor,
}

impl ComponentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Agent => "agent",
            Self::Gm => "gm",
            Self::Monitor => "monitor",
        }
    }
}

impl fmt::Display for ComponentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a component is responsible for
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Scope {
    /// Cluster type partition, or "ALL"
    pub cluster_type: String,
    /// Locality the component covers, when it covers one
    #[serde(default)]
    pub logical_city_id: Option<i64>,
}

impl Scope {
    pub fn new(cluster_type: impl Into<String>, logical_city_id: Option<i64>) -> Self {
        Self {
            cluster_type: cluster_type.into(),
            logical_city_id,
        }
    }

    pub fn all() -> Self {
        Self::new("ALL", None)
    }
}

/// Liveness record of an agent, GM or monitor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentHeartbeat {
    pub component_id: String,
    pub kind: ComponentKind,
    pub last_report_time: DateTime<Utc>,
    /// Interval between the two most recent heartbeats
    pub report_interval: Duration,
    pub scope: Scope,
}

impl ComponentHeartbeat {
    /// Largest of the reported interval and the silence since the last report
    pub fn observed_interval(&self, now: DateTime<Utc>) -> Duration {
        let silence = (now - self.last_report_time).to_std().unwrap_or_default();
        silence.max(self.report_interval)
    }
}
