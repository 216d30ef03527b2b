use serde::Deserialize;

use crate::model::Instance;

/// Machine types of a cluster type that are not failover-managed
///
/// Proxy-only failover clusters list their storage machine types here so the
/// storage layer is left out of coverage.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ExclusionRule {
    pub cluster_type: String,
    #[serde(default)]
    pub machine_types: Vec<String>,
}

impl ExclusionRule {
    pub fn new<I, S>(cluster_type: impl Into<String>, machine_types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            cluster_type: cluster_type.into(),
            machine_types: machine_types.into_iter().map(Into::into).collect(),
        }
    }

    pub fn excludes(&self, instance: &Instance) -> bool {
        instance.cluster_type == self.cluster_type
            && self.machine_types.iter().any(|m| *m == instance.machine_type)
    }
}
