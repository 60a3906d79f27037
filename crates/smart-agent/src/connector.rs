use async_trait::async_trait;
use smart_core::transport::{json_lines, Endpoint};
use smart_core::{Result, SmartError};
use smart_types::{AgentMessage, MasterMessage};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::debug;

/// 建立到 master 的连接
#[async_trait]
pub trait MasterConnector: Send + Sync {
    async fn connect(&self, master: &str) -> Result<Endpoint<AgentMessage, MasterMessage>>;
}

/// TCP 上的 JSON 行连接
pub struct TcpConnector {
    connect_timeout: Duration,
    capacity: usize,
}

impl TcpConnector {
    pub fn new(connect_timeout: Duration) -> Self {
        Self {
            connect_timeout,
            capacity: 256,
        }
    }
}

#[async_trait]
impl MasterConnector for TcpConnector {
    async fn connect(&self, master: &str) -> Result<Endpoint<AgentMessage, MasterMessage>> {
        let stream = timeout(self.connect_timeout, TcpStream::connect(master))
            .await
            .map_err(|_| SmartError::Dispatch(format!("Connecting to master {} timed out", master)))??;
        stream.set_nodelay(true)?;
        debug!(master = %master, "Connected to master");
        Ok(json_lines(stream, self.capacity))
    }
}
