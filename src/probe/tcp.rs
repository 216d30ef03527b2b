use async_trait::async_trait;
use std::time::Duration;
use tokio::net::TcpStream;

use super::deadline::with_deadline;
use super::{DetectionEngine, ProbeError};
use crate::model::Instance;

/// Connect-only engine for services without a greeting to read
pub struct TcpEngine {
    connect_timeout: Duration,
}

impl TcpEngine {
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }
}

#[async_trait]
impl DetectionEngine for TcpEngine {
    fn name(&self) -> &'static str {
        "tcp"
    }

    async fn probe(&self, instance: &Instance) -> Result<String, ProbeError> {
        let addr = instance.probe_addr();
        with_deadline(self.connect_timeout, async {
            TcpStream::connect(&addr)
                .await
                .map_err(|e| ProbeError::from_connect(&addr, e))?;
            Ok::<_, ProbeError>(format!("connected to {}", addr))
        })
        .await
    }
}
