use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;

use crate::model::{Instance, ReplicationHint};

/// Event names understood by the alerting backend
pub mod names {
    pub const DOUBLE_CHECK_CONFIRMED: &str = "DBHA_DOUBLE_CHECK_CONFIRMED";
    pub const DOUBLE_CHECK_REJECTED: &str = "DBHA_DOUBLE_CHECK_REJECTED";
    pub const DOUBLE_CHECK_EXPIRED: &str = "DBHA_DOUBLE_CHECK_EXPIRED";
    pub const DOUBLE_CHECK_EXPIRY_RECURRING: &str = "DBHA_DOUBLE_CHECK_EXPIRY_RECURRING";
    pub const DETECT_ESCALATED: &str = "DBHA_DETECT_ESCALATED";
    pub const GLOBAL_MONITOR: &str = "DBHA_GLOBAL_MONITOR";
    pub const COMPONENT_SLOW: &str = "DBHA_COMPONENT_SLOW";
    pub const API_FAILED: &str = "DBHA_API_FAILED";
}

/// Scalar dimension value
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Dimension {
    Str(String),
    Int(i64),
    UInt(u64),
}

impl fmt::Display for Dimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Str(v) => f.write_str(v),
            Self::Int(v) => write!(f, "{}", v),
            Self::UInt(v) => write!(f, "{}", v),
        }
    }
}

impl From<&str> for Dimension {
    fn from(v: &str) -> Self {
        Self::Str(v.to_string())
    }
}

impl From<String> for Dimension {
    fn from(v: String) -> Self {
        Self::Str(v)
    }
}

impl From<i64> for Dimension {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<u64> for Dimension {
    fn from(v: u64) -> Self {
        Self::UInt(v)
    }
}

impl From<u16> for Dimension {
    fn from(v: u16) -> Self {
        Self::UInt(v as u64)
    }
}

impl From<usize> for Dimension {
    fn from(v: usize) -> Self {
        Self::UInt(v as u64)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AlertEvent {
    pub name: String,
    pub content: String,
    pub dimensions: BTreeMap<String, Dimension>,
}

impl AlertEvent {
    pub fn new(name: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            content: content.into(),
            dimensions: BTreeMap::new(),
        }
    }

    pub fn with(mut self, key: &str, value: impl Into<Dimension>) -> Self {
        self.dimensions.insert(key.to_string(), value.into());
        self
    }

    pub fn dimension(&self, key: &str) -> Option<&Dimension> {
        self.dimensions.get(key)
    }

    /// Detection-level event about one instance
    pub fn detect(name: &str, instance: &Instance, content: impl Into<String>) -> Self {
        Self::new(name, content)
            .with("server_ip", instance.ip.as_str())
            .with("server_port", instance.port)
            .with("appid", instance.app.as_str())
            .with("cluster_domain", instance.cluster.as_str())
            .with("cluster_type", instance.cluster_type.as_str())
            .with("machine_type", instance.machine_type.as_str())
            .with("status", instance.status.as_str())
    }

    /// Audit event for one double-check episode
    pub fn switch(
        name: &str,
        instance: &Instance,
        check_id: impl fmt::Display,
        hint: Option<&ReplicationHint>,
        content: impl Into<String>,
    ) -> Self {
        let mut event = Self::detect(name, instance, content)
            .with("instance_role", instance.role.as_str())
            .with("idc", instance.logical_city_id)
            .with("double_check_id", check_id.to_string());
        if let Some(hint) = hint {
            event = event
                .with("new_master_host", hint.host.as_str())
                .with("new_master_port", hint.port)
                .with("new_master_binlog_file", hint.binlog_file.as_str())
                .with("new_master_binlog_pos", hint.binlog_position);
        }
        event
    }

    /// Monitor-level event not tied to one instance
    pub fn global(name: &str, server_ip: &str, content: impl Into<String>) -> Self {
        Self::new(name, content).with("server_ip", server_ip)
    }

    /// Failure of an outbound dependency call
    pub fn api(server_ip: &str, api_name: &str, message: impl fmt::Display) -> Self {
        let message = message.to_string();
        Self::new(
            names::API_FAILED,
            format!("call {} failed: {}", api_name, message),
        )
        .with("server_ip", server_ip)
        .with("api_name", api_name)
        .with("api_message", message)
    }
}
