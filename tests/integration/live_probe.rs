//! Probes against a real MySQL server

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use dbha::model::{Instance, Outcome};
use dbha::probe::{EngineRegistry, Prober};

use crate::{get_mysql_config, skip_if_not_enabled};

fn mysql_prober() -> Prober {
    let engines: HashMap<String, String> = [("tendbha".to_string(), "mysql".to_string())].into();
    let registry = EngineRegistry::from_config(&engines, Duration::from_secs(2))
        .expect("mysql engine is known");
    Prober::new(Arc::new(registry))
}

#[tokio::test]
async fn test_live_mysql_is_healthy() {
    skip_if_not_enabled!();

    let cfg = get_mysql_config();
    let result = mysql_prober()
        .probe(&Instance::new(cfg.host.clone(), cfg.port, "tendbha"))
        .await;
    assert_eq!(result.outcome, Outcome::Healthy, "detail: {}", result.detail);
}

#[tokio::test]
async fn test_closed_port_is_unreachable() {
    skip_if_not_enabled!();

    let cfg = get_mysql_config();
    let result = mysql_prober()
        .probe(&Instance::new(cfg.host.clone(), 1, "tendbha"))
        .await;
    assert_eq!(result.outcome, Outcome::Unreachable);
}
