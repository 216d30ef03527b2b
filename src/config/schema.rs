use std::collections::HashMap;
use std::time::Duration;

use serde::Deserialize;

use crate::coverage::ExclusionRule;
use crate::model::Instance;

use super::ConfigError;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub runtime: RuntimeConfig,
    #[serde(default)]
    pub agent: AgentConfig,
    #[serde(default)]
    pub probe: ProbeConfig,
    /// Local probe concurrency limiter
    #[serde(default)]
    pub limiter: LimiterConfig,
    #[serde(default)]
    pub gm: GmConfig,
    #[serde(default)]
    pub monitor: MonitorConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    /// Cluster type -> detection engine name ("mysql", "tcp")
    #[serde(default)]
    pub engines: HashMap<String, String>,
    /// Static metadata inventory
    #[serde(default)]
    pub inventory: Vec<Instance>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            runtime: RuntimeConfig::default(),
            agent: AgentConfig::default(),
            probe: ProbeConfig::default(),
            limiter: LimiterConfig::default(),
            gm: GmConfig::default(),
            monitor: MonitorConfig::default(),
            store: StoreConfig::default(),
            metrics: MetricsConfig::default(),
            engines: HashMap::new(),
            inventory: Vec::new(),
        }
    }
}

impl Config {
    /// Reject configurations the loops cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.agent.escalation_threshold == 0 || self.gm.escalation_threshold == 0 {
            return Err(ConfigError::Invalid(
                "escalation_threshold must be at least 1".into(),
            ));
        }
        if self.agent.shard_count == 0 || self.agent.shard_index >= self.agent.shard_count {
            return Err(ConfigError::Invalid(format!(
                "agent shard_index {} out of range for shard_count {}",
                self.agent.shard_index, self.agent.shard_count
            )));
        }
        if self.probe.probe_timeout_ms == 0 {
            return Err(ConfigError::Invalid("probe.probe_timeout_ms must be positive".into()));
        }
        if self.monitor.hash_mod == 0 {
            return Err(ConfigError::Invalid("monitor.hash_mod must be at least 1".into()));
        }
        if self.limiter.max_concurrent == 0 {
            return Err(ConfigError::Invalid(
                "limiter.max_concurrent must be at least 1".into(),
            ));
        }
        if self.limiter.backoff_min_ms > self.limiter.backoff_max_ms {
            return Err(ConfigError::Invalid(
                "limiter.backoff_min_ms exceeds backoff_max_ms".into(),
            ));
        }
        if self.store.retry_backoff_min_ms > self.store.retry_backoff_max_ms {
            return Err(ConfigError::Invalid(
                "store.retry_backoff_min_ms exceeds retry_backoff_max_ms".into(),
            ));
        }
        Ok(())
    }
}

// ============================================================================
// Runtime
// ============================================================================

/// Which loops this process runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Agent,
    Gm,
    Monitor,
    #[default]
    All,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RuntimeConfig {
    #[serde(default)]
    pub role: Role,
    /// Identity written to heartbeats and reports (usually the host ip)
    #[serde(default = "default_component_id")]
    pub component_id: String,
    /// Locality this process runs in
    #[serde(default)]
    pub logical_city_id: Option<i64>,
}

fn default_component_id() -> String {
    "127.0.0.1".to_string()
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            role: Role::default(),
            component_id: default_component_id(),
            logical_city_id: None,
        }
    }
}

// ============================================================================
// Detection Agent
// ============================================================================

#[derive(Debug, Clone, Deserialize)]
pub struct AgentConfig {
    /// Cluster types this agent detects, one partition each
    #[serde(default)]
    pub active_cluster_types: Vec<String>,
    /// Default sweep interval (milliseconds)
    #[serde(default = "default_sweep_interval_ms")]
    pub sweep_interval_ms: u64,
    /// Per cluster type sweep interval overrides
    #[serde(default)]
    pub sweep_overrides: Vec<SweepOverride>,
    /// Consecutive failures before an instance becomes a switch candidate
    #[serde(default = "default_escalation_threshold")]
    pub escalation_threshold: u32,
    /// Steady-state report interval for healthy instances (seconds)
    #[serde(default = "default_report_interval_secs")]
    pub report_interval_secs: u64,
    /// Upper bound of the random delay added to the report interval (seconds)
    #[serde(default = "default_report_jitter_secs")]
    pub report_jitter_secs: u64,
    /// Report unconditionally once this long has passed (seconds)
    #[serde(default = "default_report_ceiling_secs")]
    pub report_ceiling_secs: u64,
    /// Probes in flight per sweep
    #[serde(default = "default_probe_fanout")]
    pub probe_fanout: usize,
    /// Metadata shard this agent owns
    #[serde(default)]
    pub shard_index: usize,
    #[serde(default = "default_shard_count")]
    pub shard_count: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SweepOverride {
    pub cluster_type: String,
    pub sweep_interval_ms: u64,
}

fn default_sweep_interval_ms() -> u64 {
    5000
}

fn default_escalation_threshold() -> u32 {
    3
}

fn default_report_interval_secs() -> u64 {
    30
}

fn default_report_jitter_secs() -> u64 {
    30
}

fn default_report_ceiling_secs() -> u64 {
    60
}

fn default_probe_fanout() -> usize {
    32
}

fn default_shard_count() -> usize {
    1
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            active_cluster_types: Vec::new(),
            sweep_interval_ms: default_sweep_interval_ms(),
            sweep_overrides: Vec::new(),
            escalation_threshold: default_escalation_threshold(),
            report_interval_secs: default_report_interval_secs(),
            report_jitter_secs: default_report_jitter_secs(),
            report_ceiling_secs: default_report_ceiling_secs(),
            probe_fanout: default_probe_fanout(),
            shard_index: 0,
            shard_count: default_shard_count(),
        }
    }
}

impl AgentConfig {
    /// Sweep interval for a cluster type, honoring overrides
    pub fn sweep_interval(&self, cluster_type: &str) -> Duration {
        let ms = self
            .sweep_overrides
            .iter()
            .find(|o| o.cluster_type == cluster_type)
            .map(|o| o.sweep_interval_ms)
            .unwrap_or(self.sweep_interval_ms);
        Duration::from_millis(ms.max(1))
    }
}

// ============================================================================
// Prober
// ============================================================================

#[derive(Debug, Clone, Deserialize)]
pub struct ProbeConfig {
    /// Deadline for the protocol-level probe (milliseconds)
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    /// Deadline for checking one instance, engine and shell together (milliseconds)
    #[serde(default = "default_probe_timeout_ms")]
    pub probe_timeout_ms: u64,
    #[serde(default)]
    pub shell: ShellConfig,
}

fn default_connect_timeout_ms() -> u64 {
    2000
}

fn default_probe_timeout_ms() -> u64 {
    10000
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: default_connect_timeout_ms(),
            probe_timeout_ms: default_probe_timeout_ms(),
            shell: ShellConfig::default(),
        }
    }
}

impl ProbeConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }
}

/// Transport flavor for the remote shell probe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ShellFlavor {
    #[default]
    Standard,
    /// Restricted cipher list for hosts running old sshd builds
    LegacyCipher,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ShellConfig {
    #[serde(default)]
    pub enabled: bool,
    /// Client program used to open the session
    #[serde(default = "default_shell_program")]
    pub program: String,
    #[serde(default = "default_shell_user")]
    pub user: String,
    #[serde(default = "default_shell_port")]
    pub port: u16,
    #[serde(default)]
    pub flavor: ShellFlavor,
    /// Diagnostic command run on the host
    #[serde(default = "default_shell_command")]
    pub command: String,
    /// Deadline for the whole shell probe (milliseconds)
    #[serde(default = "default_shell_timeout_ms")]
    pub timeout_ms: u64,
    /// Hosts up for less than this are treated as recovering (0 disables)
    #[serde(default)]
    pub min_uptime_secs: u64,
}

fn default_shell_program() -> String {
    "ssh".to_string()
}

fn default_shell_user() -> String {
    "mysql".to_string()
}

fn default_shell_port() -> u16 {
    22
}

fn default_shell_command() -> String {
    "echo 1".to_string()
}

fn default_shell_timeout_ms() -> u64 {
    5000
}

impl Default for ShellConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            program: default_shell_program(),
            user: default_shell_user(),
            port: default_shell_port(),
            flavor: ShellFlavor::default(),
            command: default_shell_command(),
            timeout_ms: default_shell_timeout_ms(),
            min_uptime_secs: 0,
        }
    }
}

impl ShellConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn min_uptime(&self) -> Option<Duration> {
        (self.min_uptime_secs > 0).then(|| Duration::from_secs(self.min_uptime_secs))
    }
}

// ============================================================================
// Limiter
// ============================================================================

/// What a caller does when every permit is taken
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ExhaustedPolicy {
    FailFast,
    #[default]
    Backoff,
}

/// Probe concurrency limiter configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LimiterConfig {
    /// Whether probes are gated by the limiter
    #[serde(default = "default_limiter_enabled")]
    pub enabled: bool,
    /// Maximum concurrent probes on this host
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
    /// Timeout in milliseconds for one acquire attempt
    #[serde(default = "default_acquire_timeout_ms")]
    pub acquire_timeout_ms: u64,
    #[serde(default)]
    pub policy: ExhaustedPolicy,
    /// Acquire attempts after the first one under the backoff policy
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_backoff_min_ms")]
    pub backoff_min_ms: u64,
    #[serde(default = "default_backoff_max_ms")]
    pub backoff_max_ms: u64,
}

fn default_limiter_enabled() -> bool {
    true
}

fn default_max_concurrent() -> usize {
    100
}

fn default_acquire_timeout_ms() -> u64 {
    1000
}

fn default_max_retries() -> u32 {
    3
}

fn default_backoff_min_ms() -> u64 {
    500
}

fn default_backoff_max_ms() -> u64 {
    3000
}

impl Default for LimiterConfig {
    fn default() -> Self {
        Self {
            enabled: default_limiter_enabled(),
            max_concurrent: default_max_concurrent(),
            acquire_timeout_ms: default_acquire_timeout_ms(),
            policy: ExhaustedPolicy::default(),
            max_retries: default_max_retries(),
            backoff_min_ms: default_backoff_min_ms(),
            backoff_max_ms: default_backoff_max_ms(),
        }
    }
}

// ============================================================================
// GM / Switch Arbiter
// ============================================================================

#[derive(Debug, Clone, Deserialize)]
pub struct GmConfig {
    /// Validity window of one double-check episode (seconds)
    #[serde(default = "default_expiry_window_secs")]
    pub expiry_window_secs: u64,
    /// Expired episodes re-queued before the recurring-expiry alert
    #[serde(default = "default_max_requeue")]
    pub max_requeue: u32,
    /// Confirmed instances are not re-arbitrated within this window (seconds)
    #[serde(default = "default_switch_cooldown_secs")]
    pub switch_cooldown_secs: u64,
    /// Store poll interval for store-fed candidates (milliseconds)
    #[serde(default = "default_candidate_poll_interval_ms")]
    pub candidate_poll_interval_ms: u64,
    /// First reports older than this are not arbitrated (seconds)
    #[serde(default = "default_candidate_max_age_secs")]
    pub candidate_max_age_secs: u64,
    /// Consecutive failures a stored report needs to become a candidate
    #[serde(default = "default_escalation_threshold")]
    pub escalation_threshold: u32,
    /// Candidate queue capacity
    #[serde(default = "default_intake_capacity")]
    pub intake_capacity: usize,
    /// Spacing between the two probes of a re-queued episode (milliseconds)
    #[serde(default = "default_recheck_delay_ms")]
    pub recheck_delay_ms: u64,
}

fn default_expiry_window_secs() -> u64 {
    30
}

fn default_max_requeue() -> u32 {
    3
}

fn default_switch_cooldown_secs() -> u64 {
    600
}

fn default_candidate_poll_interval_ms() -> u64 {
    2000
}

fn default_candidate_max_age_secs() -> u64 {
    60
}

fn default_intake_capacity() -> usize {
    1024
}

fn default_recheck_delay_ms() -> u64 {
    1000
}

impl Default for GmConfig {
    fn default() -> Self {
        Self {
            expiry_window_secs: default_expiry_window_secs(),
            max_requeue: default_max_requeue(),
            switch_cooldown_secs: default_switch_cooldown_secs(),
            candidate_poll_interval_ms: default_candidate_poll_interval_ms(),
            candidate_max_age_secs: default_candidate_max_age_secs(),
            escalation_threshold: default_escalation_threshold(),
            intake_capacity: default_intake_capacity(),
            recheck_delay_ms: default_recheck_delay_ms(),
        }
    }
}

// ============================================================================
// Coverage Monitor
// ============================================================================

#[derive(Debug, Clone, Deserialize)]
pub struct MonitorConfig {
    /// Pause between monitor cycles (seconds)
    #[serde(default = "default_monitor_interval_secs")]
    pub interval_secs: u64,
    /// Cluster types whose instances must be covered
    #[serde(default)]
    pub active_cluster_types: Vec<String>,
    /// Number of metadata shards fetched per cluster type
    #[serde(default = "default_hash_mod")]
    pub hash_mod: usize,
    /// Maximum age of a detection record still counted as covered (seconds)
    #[serde(default = "default_freshness_window_secs")]
    pub freshness_window_secs: u64,
    #[serde(default = "default_agent_report_ceiling_secs")]
    pub agent_report_ceiling_secs: u64,
    #[serde(default = "default_gm_report_ceiling_secs")]
    pub gm_report_ceiling_secs: u64,
    /// How far back component heartbeats are listed (seconds)
    #[serde(default = "default_component_lookback_secs")]
    pub component_lookback_secs: u64,
    /// Localities excluded from coverage
    #[serde(default)]
    pub ignore_cities: Vec<i64>,
    /// Cluster-type / machine-type pairs that are not failover-managed
    #[serde(default = "default_exclusions")]
    pub exclusions: Vec<ExclusionRule>,
}

fn default_monitor_interval_secs() -> u64 {
    10
}

fn default_hash_mod() -> usize {
    4
}

fn default_freshness_window_secs() -> u64 {
    300
}

fn default_agent_report_ceiling_secs() -> u64 {
    20
}

fn default_gm_report_ceiling_secs() -> u64 {
    300
}

fn default_component_lookback_secs() -> u64 {
    3600
}

/// Proxy-only failover clusters whose storage layer is skipped
pub fn default_exclusions() -> Vec<ExclusionRule> {
    vec![
        ExclusionRule::new("PredixyRedisCluster", ["tendiscache"]),
        ExclusionRule::new("TendisplusCluster", ["tendisplus"]),
        ExclusionRule::new("MongoShardedCluster", ["mongodb", "mongo_config"]),
    ]
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_monitor_interval_secs(),
            active_cluster_types: Vec::new(),
            hash_mod: default_hash_mod(),
            freshness_window_secs: default_freshness_window_secs(),
            agent_report_ceiling_secs: default_agent_report_ceiling_secs(),
            gm_report_ceiling_secs: default_gm_report_ceiling_secs(),
            component_lookback_secs: default_component_lookback_secs(),
            ignore_cities: Vec::new(),
            exclusions: default_exclusions(),
        }
    }
}

// ============================================================================
// Status Store / Metrics
// ============================================================================

#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    /// Deadline for one store call (milliseconds)
    #[serde(default = "default_store_timeout_ms")]
    pub timeout_ms: u64,
    /// Attempts after the first one for writes
    #[serde(default = "default_write_retries")]
    pub write_retries: u32,
    #[serde(default = "default_retry_backoff_min_ms")]
    pub retry_backoff_min_ms: u64,
    #[serde(default = "default_retry_backoff_max_ms")]
    pub retry_backoff_max_ms: u64,
}

fn default_store_timeout_ms() -> u64 {
    3000
}

fn default_write_retries() -> u32 {
    2
}

fn default_retry_backoff_min_ms() -> u64 {
    100
}

fn default_retry_backoff_max_ms() -> u64 {
    500
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_store_timeout_ms(),
            write_retries: default_write_retries(),
            retry_backoff_min_ms: default_retry_backoff_min_ms(),
            retry_backoff_max_ms: default_retry_backoff_max_ms(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_metrics_addr")]
    pub listen_addr: String,
}

fn default_metrics_addr() -> String {
    "127.0.0.1:9108".to_string()
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            listen_addr: default_metrics_addr(),
        }
    }
}
