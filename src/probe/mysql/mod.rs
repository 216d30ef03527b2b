//! MySQL greeting probe
//!
//! Connects and reads the server's initial handshake without logging in, so
//! the probe needs no credentials and leaves no session behind.

mod packet;

pub use packet::{Packet, PacketCodec, ServerGreeting, ER_CON_COUNT_ERROR};

use async_trait::async_trait;
use futures::StreamExt;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_util::codec::FramedRead;

use super::deadline::with_deadline;
use super::{DetectionEngine, ProbeError};
use crate::model::{Instance, Outcome};

pub struct MysqlEngine {
    connect_timeout: Duration,
}

impl MysqlEngine {
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }
}

#[async_trait]
impl DetectionEngine for MysqlEngine {
    fn name(&self) -> &'static str {
        "mysql"
    }

    async fn probe(&self, instance: &Instance) -> Result<String, ProbeError> {
        let addr = instance.probe_addr();
        with_deadline(self.connect_timeout, async {
            let stream = TcpStream::connect(&addr)
                .await
                .map_err(|e| ProbeError::from_connect(&addr, e))?;
            let mut frames = FramedRead::new(stream, PacketCodec);
            let packet = frames
                .next()
                .await
                .ok_or_else(|| ProbeError::Protocol("connection closed before greeting".into()))??;
            let greeting = ServerGreeting::parse(&packet.payload)?;
            Ok::<_, ProbeError>(format!(
                "server {} connection {}",
                greeting.server_version, greeting.connection_id
            ))
        })
        .await
    }

    fn classify(&self, result: &Result<String, ProbeError>) -> Outcome {
        match result {
            Ok(_) => Outcome::Healthy,
            // server is up, just saturated
            Err(ProbeError::Rejected { code, .. }) if *code == ER_CON_COUNT_ERROR => Outcome::Healthy,
            Err(e) if e.is_unreachable() => Outcome::Unreachable,
            Err(_) => Outcome::Indeterminate,
        }
    }
}
