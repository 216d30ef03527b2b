//! Hand-off point to the component that performs the actual promotion

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::warn;

use crate::model::{CheckId, Instance, ReplicationHint};

/// Permission to fail over one instance, issued once per confirmed episode
#[derive(Debug, Clone, PartialEq)]
pub struct FailoverAuthorization {
    pub check_id: CheckId,
    pub instance: Instance,
    /// Timestamp of the first failing report
    pub first_detected_at: DateTime<Utc>,
    /// Timestamp of the confirming re-probe
    pub confirmed_at: DateTime<Utc>,
    pub replication_hint: Option<ReplicationHint>,
}

#[derive(Debug, Error)]
pub enum FailoverError {
    #[error("Failover executor unavailable: {0}")]
    Unavailable(String),
}

#[async_trait]
pub trait FailoverExecutor: Send + Sync {
    async fn execute(&self, authorization: FailoverAuthorization) -> Result<(), FailoverError>;
}

/// Logs authorizations without acting on them
pub struct LoggingExecutor;

#[async_trait]
impl FailoverExecutor for LoggingExecutor {
    async fn execute(&self, auth: FailoverAuthorization) -> Result<(), FailoverError> {
        warn!(
            check_id = %auth.check_id,
            instance = %auth.instance,
            first_detected_at = %auth.first_detected_at,
            confirmed_at = %auth.confirmed_at,
            new_master = ?auth.replication_hint.as_ref().map(|h| format!("{}:{}", h.host, h.port)),
            "Failover authorized"
        );
        Ok(())
    }
}

/// Forwards authorizations to a consumer task
pub struct ChannelExecutor {
    tx: mpsc::UnboundedSender<FailoverAuthorization>,
}

impl ChannelExecutor {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<FailoverAuthorization>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

#[async_trait]
impl FailoverExecutor for ChannelExecutor {
    async fn execute(&self, auth: FailoverAuthorization) -> Result<(), FailoverError> {
        self.tx
            .send(auth)
            .map_err(|_| FailoverError::Unavailable("authorization consumer gone".into()))
    }
}
