//! master 侧协议处理
//!
//! 每个 agent 连接一个任务：先等待 `RegisterNewAgent`，注册后把后续消息转交调度器，
//! 连接断开时通知调度器。

use crate::handle::SchedulerHandle;
use smart_core::transport::{json_lines, Endpoint};
use smart_core::{Result, SmartError};
use smart_types::{AgentMessage, MasterMessage};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

const CONNECTION_CAPACITY: usize = 256;

pub struct AgentMaster {
    scheduler: SchedulerHandle,
    register_timeout: Duration,
}

impl AgentMaster {
    pub fn new(scheduler: SchedulerHandle, register_timeout: Duration) -> Self {
        Self {
            scheduler,
            register_timeout,
        }
    }

    /// 处理一个 agent 连接直到断开
    pub async fn serve(&self, endpoint: Endpoint<MasterMessage, AgentMessage>) -> Result<()> {
        let (tx, mut rx) = endpoint.split();

        let address = loop {
            match timeout(self.register_timeout, rx.recv()).await {
                Ok(Some(AgentMessage::RegisterNewAgent { address })) => break address,
                Ok(Some(other)) => {
                    warn!(message = ?other, "Ignoring message from unregistered agent");
                }
                Ok(None) => {
                    debug!("Connection closed before registration");
                    return Ok(());
                }
                Err(_) => {
                    return Err(SmartError::Dispatch(
                        "Agent did not register in time".to_string(),
                    ))
                }
            }
        };

        let (agent_id, connection) = self.scheduler.register_agent(address, tx).await?;

        while let Some(message) = rx.recv().await {
            self.scheduler.agent_message(agent_id.clone(), message).await?;
        }

        self.scheduler.agent_disconnected(agent_id, connection).await
    }

    /// 在 TCP 上接受 agent 连接
    pub async fn run_tcp(self: Arc<Self>, listener: TcpListener) -> Result<()> {
        info!(address = ?listener.local_addr().ok(), "Agent master listening");
        loop {
            let (stream, peer) = listener.accept().await?;
            debug!(peer = %peer, "Agent connection accepted");
            let master = self.clone();
            tokio::spawn(async move {
                let endpoint = json_lines::<_, MasterMessage, AgentMessage>(stream, CONNECTION_CAPACITY);
                if let Err(e) = master.serve(endpoint).await {
                    error!(peer = %peer, error = %e, "Agent connection failed");
                }
            });
        }
    }
}
