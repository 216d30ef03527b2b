//! Single-instance health probing
//!
//! A probe first asks the instance's detection engine. When the engine
//! cannot reach the service, an optional remote shell check decides whether
//! the host itself is gone or only the service is down.

mod deadline;
mod engine;
pub mod mysql;
mod shell;
mod tcp;

pub use deadline::with_deadline;
pub use engine::{DetectionEngine, EngineRegistry};
pub use shell::{parse_uptime, RemoteShell, ShellVerdict, SshCommandShell};
pub use tcp::TcpEngine;

use std::io;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::time::timeout;
use tracing::debug;

use crate::metrics::metrics;
use crate::model::{Instance, Outcome, ReplicationHint};

#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("Connection refused by {0}")]
    Refused(String),

    #[error("Probe timed out after {0:?}")]
    Timeout(Duration),

    #[error("Server rejected connection: {code} {message}")]
    Rejected { code: u16, message: String },

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

impl ProbeError {
    pub fn from_connect(addr: &str, e: io::Error) -> Self {
        match e.kind() {
            io::ErrorKind::ConnectionRefused => Self::Refused(addr.to_string()),
            io::ErrorKind::TimedOut => Self::Timeout(Duration::ZERO),
            _ => Self::Io(e),
        }
    }

    /// Timeout or refusal, as opposed to a partial answer
    pub fn is_unreachable(&self) -> bool {
        matches!(self, Self::Refused(_) | Self::Timeout(_))
    }
}

/// Result of one probe
#[derive(Debug, Clone)]
pub struct ProbeResult {
    pub outcome: Outcome,
    pub detail: String,
    pub elapsed: Duration,
}

const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(10);

/// Runs the probe sequence for one instance at a time
///
/// The whole sequence runs under one deadline, so an engine or shell that
/// never answers costs one timeout and yields Unreachable.
pub struct Prober {
    engines: Arc<EngineRegistry>,
    shell: Option<Arc<dyn RemoteShell>>,
    timeout: Duration,
}

impl Prober {
    pub fn new(engines: Arc<EngineRegistry>) -> Self {
        Self {
            engines,
            shell: None,
            timeout: DEFAULT_PROBE_TIMEOUT,
        }
    }

    pub fn with_shell(mut self, shell: Arc<dyn RemoteShell>) -> Self {
        self.shell = Some(shell);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub async fn probe(&self, instance: &Instance) -> ProbeResult {
        let started = Instant::now();
        let engine = self.engines.resolve(&instance.cluster_type);
        let (outcome, detail) =
            match timeout(self.timeout, self.sequence(engine.as_ref(), instance)).await {
                Ok(verdict) => verdict,
                Err(_) => (
                    Outcome::Unreachable,
                    ProbeError::Timeout(self.timeout).to_string(),
                ),
            };

        let elapsed = started.elapsed();
        metrics().record_probe(&instance.cluster_type, outcome.as_str(), elapsed.as_secs_f64());
        debug!(
            instance = %instance,
            engine = engine.name(),
            outcome = outcome.as_str(),
            elapsed_ms = elapsed.as_millis() as u64,
            "Probe finished"
        );
        ProbeResult {
            outcome,
            detail,
            elapsed,
        }
    }

    /// Engine check, then the shell check for unreachable services
    async fn sequence(
        &self,
        engine: &dyn DetectionEngine,
        instance: &Instance,
    ) -> (Outcome, String) {
        let result = engine.probe(instance).await;
        let outcome = engine.classify(&result);

        match (outcome, &self.shell) {
            (Outcome::Unreachable, Some(shell)) => {
                let engine_detail = describe(&result);
                match shell.check(instance).await {
                    ShellVerdict::Alive { .. } => (
                        Outcome::Unhealthy,
                        format!("{}; host alive", engine_detail),
                    ),
                    ShellVerdict::Recovering { uptime } => (
                        Outcome::Indeterminate,
                        format!(
                            "{}; host recovering, uptime {}s",
                            engine_detail,
                            uptime.as_secs()
                        ),
                    ),
                    ShellVerdict::AuthFailed(e) => (
                        Outcome::Indeterminate,
                        format!("{}; shell auth failed: {}", engine_detail, e),
                    ),
                    ShellVerdict::Unreachable(e) => (
                        Outcome::Unreachable,
                        format!("{}; shell unreachable: {}", engine_detail, e),
                    ),
                }
            }
            (outcome, _) => (outcome, describe(&result)),
        }
    }

    pub fn replication_hint(&self, instance: &Instance) -> Option<ReplicationHint> {
        self.engines
            .resolve(&instance.cluster_type)
            .replication_hint(instance)
    }
}

fn describe(result: &Result<String, ProbeError>) -> String {
    match result {
        Ok(detail) => detail.clone(),
        Err(e) => e.to_string(),
    }
}
