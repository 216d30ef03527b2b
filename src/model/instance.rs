use std::fmt;

use serde::{Deserialize, Serialize};

/// Identity of a managed instance inside the coverage and detection sets
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct InstanceKey {
    pub ip: String,
    pub port: u16,
}

impl InstanceKey {
    pub fn new(ip: impl Into<String>, port: u16) -> Self {
        Self {
            ip: ip.into(),
            port,
        }
    }
}

impl fmt::Display for InstanceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.ip, self.port)
    }
}

/// Last-known status recorded by the metadata system
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstanceStatus {
    #[default]
    Unknown,
    Healthy,
    Unhealthy,
    Unreachable,
}

impl InstanceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unknown => "unknown",
            Self::Healthy => "healthy",
            Self::Unhealthy => "unhealthy",
            Self::Unreachable => "unreachable",
        }
    }
}

/// Role of an instance inside its cluster
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstanceRole {
    StoragePrimary,
    StorageReplica,
    Proxy,
    #[default]
    Other,
}

impl InstanceRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::StoragePrimary => "storage_primary",
            Self::StorageReplica => "storage_replica",
            Self::Proxy => "proxy",
            Self::Other => "other",
        }
    }
}

/// Replica attached to a storage primary, as listed by the metadata system
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplicaInfo {
    pub ip: String,
    pub port: u16,
    /// Standby replica chosen for promotion
    #[serde(default)]
    pub is_standby: bool,
    #[serde(default)]
    pub binlog_file: String,
    #[serde(default)]
    pub binlog_position: u64,
}

/// Replication position used to seed a promoted replacement
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplicationHint {
    pub host: String,
    pub port: u16,
    pub binlog_file: String,
    pub binlog_position: u64,
}

/// A managed database or proxy instance
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instance {
    pub ip: String,
    pub port: u16,
    pub cluster_type: String,
    #[serde(default)]
    pub cluster_id: u64,
    /// Cluster domain name
    #[serde(default)]
    pub cluster: String,
    #[serde(default)]
    pub role: InstanceRole,
    /// Business id owning the cluster
    #[serde(default)]
    pub app: String,
    #[serde(default)]
    pub logical_city_id: i64,
    #[serde(default)]
    pub machine_type: String,
    #[serde(default)]
    pub status: InstanceStatus,
    /// Admin port probed instead of `port` when present (proxies)
    #[serde(default)]
    pub admin_port: Option<u16>,
    #[serde(default)]
    pub receivers: Vec<ReplicaInfo>,
}

impl Instance {
    pub fn new(ip: impl Into<String>, port: u16, cluster_type: impl Into<String>) -> Self {
        Self {
            ip: ip.into(),
            port,
            cluster_type: cluster_type.into(),
            cluster_id: 0,
            cluster: String::new(),
            role: InstanceRole::Other,
            app: String::new(),
            logical_city_id: 0,
            machine_type: String::new(),
            status: InstanceStatus::Unknown,
            admin_port: None,
            receivers: Vec::new(),
        }
    }

    pub fn key(&self) -> InstanceKey {
        InstanceKey::new(self.ip.clone(), self.port)
    }

    /// Address string (ip:port)
    pub fn addr(&self) -> String {
        format!("{}:{}", self.ip, self.port)
    }

    /// Address the protocol probe should dial
    pub fn probe_addr(&self) -> String {
        format!("{}:{}", self.ip, self.admin_port.unwrap_or(self.port))
    }

    pub fn is_storage_primary(&self) -> bool {
        self.role == InstanceRole::StoragePrimary
    }

    /// Standby receiver for this instance, if the metadata lists one
    pub fn standby(&self) -> Option<&ReplicaInfo> {
        self.receivers.iter().find(|r| r.is_standby)
    }

    /// Stable key used to assign the instance to a metadata shard
    pub fn shard_key(&self) -> String {
        format!("{}/{}", self.cluster_type, self.cluster_id)
    }
}

impl fmt::Display for Instance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}({})", self.ip, self.port, self.cluster_type)
    }
}
