use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn, Level};
use tracing_subscriber::EnvFilter;

use dbha::agent::DetectionAgent;
use dbha::alert::{AlertSink, LogAlertSink};
use dbha::arbiter::{StoreCandidateFeed, SwitchArbiter, SwitchCandidate};
use dbha::circuit::{LimitConfig, ProbeLimiter};
use dbha::config::{self, Config, Role};
use dbha::coverage::{CoverageMonitor, InventoryReconciler};
use dbha::failover::LoggingExecutor;
use dbha::metadata::{MetadataSource, StaticMetadata};
use dbha::metrics::start_metrics_server;
use dbha::probe::{EngineRegistry, Prober, SshCommandShell};
use dbha::store::{GuardedStore, MemoryStatusStore, StatusStore};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::builder()
                .with_default_directive(Level::INFO.into())
                .from_env_lossy(),
        )
        .init();

    let config = load_or_default_config()?;
    let component_id = config.runtime.component_id.clone();
    let role = config.runtime.role;

    if config.metrics.enabled {
        let addr = config.metrics.listen_addr.clone();
        tokio::spawn(async move {
            if let Err(e) = start_metrics_server(&addr).await {
                error!(error = %e, "Metrics server failed");
            }
        });
    }

    let store: Arc<dyn StatusStore> = Arc::new(GuardedStore::new(
        Arc::new(MemoryStatusStore::new()),
        &config.store,
    ));
    let metadata: Arc<dyn MetadataSource> = Arc::new(StaticMetadata::new(config.inventory.clone()));
    let alerts: Arc<dyn AlertSink> = Arc::new(LogAlertSink);

    let engines = EngineRegistry::from_config(&config.engines, config.probe.connect_timeout())?;
    let mut prober = Prober::new(Arc::new(engines)).with_timeout(config.probe.probe_timeout());
    if config.probe.shell.enabled {
        prober = prober.with_shell(Arc::new(SshCommandShell::new(config.probe.shell.clone())));
    }
    let prober = Arc::new(prober);

    let limiter = Arc::new(ProbeLimiter::new(LimitConfig::from(&config.limiter)));
    info!(
        enabled = config.limiter.enabled,
        max_concurrent = config.limiter.max_concurrent,
        policy = ?config.limiter.policy,
        "Probe limiter configured"
    );

    let cancel = CancellationToken::new();
    let mut tasks = JoinSet::new();

    let runs_agent = matches!(role, Role::Agent | Role::All);
    let runs_gm = matches!(role, Role::Gm | Role::All);
    let runs_monitor = matches!(role, Role::Monitor | Role::All);

    // Agents hand candidates straight to a co-located GM
    let (intake_tx, intake_rx) = mpsc::channel::<SwitchCandidate>(config.gm.intake_capacity.max(1));

    if runs_agent {
        if config.agent.active_cluster_types.is_empty() {
            warn!("Agent role enabled without active cluster types");
        }
        for cluster_type in &config.agent.active_cluster_types {
            let mut agent = DetectionAgent::new(
                component_id.clone(),
                cluster_type.clone(),
                config.runtime.logical_city_id,
                config.agent.clone(),
                metadata.clone(),
                store.clone(),
                prober.clone(),
                limiter.clone(),
                alerts.clone(),
            );
            if runs_gm {
                agent = agent.with_candidates(intake_tx.clone());
            }
            tasks.spawn(agent.run(cancel.clone()));
        }
    }
    drop(intake_tx);

    if runs_gm {
        let arbiter = SwitchArbiter::new(
            component_id.clone(),
            config.gm.clone(),
            prober.clone(),
            store.clone(),
            Arc::new(LoggingExecutor),
            alerts.clone(),
        );
        let feed = StoreCandidateFeed::new(store.clone(), &config.gm);
        tasks.spawn(arbiter.run(intake_rx, Some(feed), cancel.clone()));
    }

    if runs_monitor {
        let reconciler = InventoryReconciler::new(metadata.clone(), store.clone(), &config.monitor);
        let monitor = CoverageMonitor::new(
            component_id.clone(),
            config.monitor.clone(),
            reconciler,
            store.clone(),
            alerts.clone(),
        );
        tasks.spawn(monitor.run(cancel.clone()));
    }

    info!(component = %component_id, role = ?role, tasks = tasks.len(), "dbha started");

    tokio::signal::ctrl_c().await?;
    info!("Shutdown requested");
    cancel.cancel();

    while let Some(joined) = tasks.join_next().await {
        if let Err(e) = joined {
            warn!(error = %e, "Control loop ended abnormally");
        }
    }
    Ok(())
}

fn load_or_default_config() -> anyhow::Result<Config> {
    if let Ok(path) = std::env::var("DBHA_CONFIG") {
        let config = config::load_config(&path)?;
        info!(path = %path, "Loaded configuration");
        return Ok(config);
    }

    let config_paths = ["config/dbha.toml", "dbha.toml"];
    for path in config_paths {
        match config::load_config(path) {
            Ok(config) => {
                info!(path = path, "Loaded configuration");
                return Ok(config);
            }
            Err(e) => {
                warn!(path = path, error = %e, "Failed to load config");
            }
        }
    }

    info!("Using default configuration");
    Ok(Config::default())
}
