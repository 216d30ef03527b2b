use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use super::mysql::MysqlEngine;
use super::tcp::TcpEngine;
use super::ProbeError;
use crate::config::ConfigError;
use crate::model::{Instance, Outcome, ReplicationHint};

/// Per-engine capability set used by the detection and switch loops
///
/// The loops never branch on engine identity; they only call these three
/// operations on whatever the registry hands back.
#[async_trait]
pub trait DetectionEngine: Send + Sync {
    fn name(&self) -> &'static str;

    /// Protocol-level check, returning a short detail on success
    async fn probe(&self, instance: &Instance) -> Result<String, ProbeError>;

    /// Map a probe result onto the tri-state outcome
    fn classify(&self, result: &Result<String, ProbeError>) -> Outcome {
        match result {
            Ok(_) => Outcome::Healthy,
            Err(e) if e.is_unreachable() => Outcome::Unreachable,
            Err(_) => Outcome::Indeterminate,
        }
    }

    /// Where a replacement for `instance` should resume replication
    fn replication_hint(&self, instance: &Instance) -> Option<ReplicationHint> {
        if !instance.is_storage_primary() {
            return None;
        }
        instance.standby().map(|r| ReplicationHint {
            host: r.ip.clone(),
            port: r.port,
            binlog_file: r.binlog_file.clone(),
            binlog_position: r.binlog_position,
        })
    }
}

/// Cluster type -> engine dispatch table
pub struct EngineRegistry {
    engines: HashMap<String, Arc<dyn DetectionEngine>>,
    fallback: Arc<dyn DetectionEngine>,
}

impl EngineRegistry {
    pub fn new(fallback: Arc<dyn DetectionEngine>) -> Self {
        Self {
            engines: HashMap::new(),
            fallback,
        }
    }

    pub fn register(&mut self, cluster_type: impl Into<String>, engine: Arc<dyn DetectionEngine>) {
        self.engines.insert(cluster_type.into(), engine);
    }

    /// Build the table from `[engines]`, cluster types not listed fall back to TCP
    pub fn from_config(
        engines: &HashMap<String, String>,
        connect_timeout: Duration,
    ) -> Result<Self, ConfigError> {
        let mysql: Arc<dyn DetectionEngine> = Arc::new(MysqlEngine::new(connect_timeout));
        let tcp: Arc<dyn DetectionEngine> = Arc::new(TcpEngine::new(connect_timeout));

        let mut registry = Self::new(tcp.clone());
        for (cluster_type, name) in engines {
            let engine = match name.as_str() {
                "mysql" => mysql.clone(),
                "tcp" => tcp.clone(),
                other => {
                    return Err(ConfigError::Invalid(format!(
                        "unknown detection engine '{}' for cluster type {}",
                        other, cluster_type
                    )))
                }
            };
            registry.register(cluster_type.clone(), engine);
        }
        Ok(registry)
    }

    pub fn resolve(&self, cluster_type: &str) -> Arc<dyn DetectionEngine> {
        self.engines
            .get(cluster_type)
            .cloned()
            .unwrap_or_else(|| self.fallback.clone())
    }
}
