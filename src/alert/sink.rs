use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::info;

use super::{AlertError, AlertEvent, AlertSink};

/// Writes alerts to the structured log
pub struct LogAlertSink;

#[async_trait]
impl AlertSink for LogAlertSink {
    async fn send(&self, event: AlertEvent) -> Result<(), AlertError> {
        let dimensions = event
            .dimensions
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join(",");
        info!(
            alert = %event.name,
            dimensions = %dimensions,
            "{}",
            event.content
        );
        Ok(())
    }
}

/// Keeps every alert in memory
#[derive(Default)]
pub struct MemoryAlertSink {
    events: Mutex<Vec<AlertEvent>>,
}

impl MemoryAlertSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<AlertEvent> {
        self.events.lock().clone()
    }

    pub fn named(&self, name: &str) -> Vec<AlertEvent> {
        self.events
            .lock()
            .iter()
            .filter(|e| e.name == name)
            .cloned()
            .collect()
    }

    pub fn clear(&self) {
        self.events.lock().clear();
    }
}

#[async_trait]
impl AlertSink for MemoryAlertSink {
    async fn send(&self, event: AlertEvent) -> Result<(), AlertError> {
        self.events.lock().push(event);
        Ok(())
    }
}
