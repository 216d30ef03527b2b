use async_trait::async_trait;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, warn};

use super::deadline::with_deadline;
use super::ProbeError;
use crate::config::{ShellConfig, ShellFlavor};
use crate::model::Instance;

/// ssh reserves this exit code for its own failures
const SSH_ERROR_EXIT: i32 = 255;

const LEGACY_CIPHERS: &str = "aes128-ctr,aes192-ctr,aes256-ctr";

/// What the remote shell learned about the host
#[derive(Debug, Clone, PartialEq)]
pub enum ShellVerdict {
    /// Session opened and the command ran
    Alive { uptime: Option<Duration> },
    /// Host rebooted less than the configured minimum uptime ago
    Recovering { uptime: Duration },
    AuthFailed(String),
    /// No session could be opened
    Unreachable(String),
}

#[async_trait]
pub trait RemoteShell: Send + Sync {
    async fn check(&self, instance: &Instance) -> ShellVerdict;
}

/// Remote shell probe driven through the system ssh client
pub struct SshCommandShell {
    config: ShellConfig,
}

impl SshCommandShell {
    pub fn new(config: ShellConfig) -> Self {
        Self { config }
    }

    /// Command line for one probe, without the program name
    pub fn args(&self, host: &str) -> Vec<String> {
        let connect_secs = self.config.timeout().as_secs().max(1);
        let mut args = vec![
            "-o".to_string(),
            "BatchMode=yes".to_string(),
            "-o".to_string(),
            "StrictHostKeyChecking=no".to_string(),
            "-o".to_string(),
            format!("ConnectTimeout={}", connect_secs),
            "-p".to_string(),
            self.config.port.to_string(),
        ];
        if self.config.flavor == ShellFlavor::LegacyCipher {
            args.push("-c".to_string());
            args.push(LEGACY_CIPHERS.to_string());
        }
        args.push(format!("{}@{}", self.config.user, host));
        args.push(self.script());
        args
    }

    fn script(&self) -> String {
        if self.config.min_uptime().is_some() {
            format!("cat /proc/uptime; {}", self.config.command)
        } else {
            self.config.command.clone()
        }
    }

    async fn run(&self, host: &str) -> Result<std::process::Output, ProbeError> {
        let mut cmd = Command::new(&self.config.program);
        cmd.args(self.args(host))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        with_deadline(self.config.timeout(), async {
            cmd.output().await.map_err(ProbeError::Io)
        })
        .await
    }

    fn judge(&self, output: &std::process::Output) -> ShellVerdict {
        let stderr = String::from_utf8_lossy(&output.stderr);
        if output.status.code() == Some(SSH_ERROR_EXIT) {
            let detail = stderr.trim().to_string();
            return if detail.contains("Permission denied") {
                ShellVerdict::AuthFailed(detail)
            } else {
                ShellVerdict::Unreachable(detail)
            };
        }

        let uptime = self
            .config
            .min_uptime()
            .and_then(|_| parse_uptime(&String::from_utf8_lossy(&output.stdout)));
        if let (Some(min), Some(up)) = (self.config.min_uptime(), uptime) {
            if up < min {
                return ShellVerdict::Recovering { uptime: up };
            }
        }
        if !output.status.success() {
            debug!(status = ?output.status.code(), stderr = %stderr.trim(), "Shell command failed on a reachable host");
        }
        ShellVerdict::Alive { uptime }
    }
}

#[async_trait]
impl RemoteShell for SshCommandShell {
    async fn check(&self, instance: &Instance) -> ShellVerdict {
        match self.run(&instance.ip).await {
            Ok(output) => self.judge(&output),
            Err(e) => {
                warn!(instance = %instance, error = %e, "Remote shell probe failed");
                ShellVerdict::Unreachable(e.to_string())
            }
        }
    }
}

/// First field of /proc/uptime, in seconds
pub fn parse_uptime(stdout: &str) -> Option<Duration> {
    let secs: f64 = stdout.lines().next()?.split_whitespace().next()?.parse().ok()?;
    (secs.is_finite() && secs >= 0.0).then(|| Duration::from_secs_f64(secs))
}
