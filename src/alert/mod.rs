//! Alert and telemetry sink
//!
//! Every alert is a named event with free text and a flat map of scalar
//! dimensions. Delivery failures are logged and never stop a control loop.

mod event;
mod sink;

pub use event::{names, AlertEvent, Dimension};
pub use sink::{LogAlertSink, MemoryAlertSink};

use async_trait::async_trait;
use thiserror::Error;
use tracing::warn;

use crate::metrics::metrics;

#[derive(Debug, Error)]
pub enum AlertError {
    #[error("Alert delivery failed: {0}")]
    Delivery(String),
}

#[async_trait]
pub trait AlertSink: Send + Sync {
    async fn send(&self, event: AlertEvent) -> Result<(), AlertError>;
}

/// Send an alert, logging delivery failures instead of returning them
pub async fn emit(sink: &dyn AlertSink, event: AlertEvent) {
    let name = event.name.clone();
    metrics().record_alert(&name);
    if let Err(e) = sink.send(event).await {
        warn!(alert = %name, error = %e, "Failed to deliver alert");
    }
}
