use crate::scheduler::Command;
use async_trait::async_trait;
use smart_core::cmdlet::CmdletDescriptor;
use smart_core::{Result, SmartError};
use smart_rule::CmdletSubmitter;
use smart_types::{ActionInfo, AgentInfo, AgentMessage, CmdletInfo, MasterMessage};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::timeout;

/// 调度器句柄
///
/// 可随意克隆，所有请求都有超时。
#[derive(Clone)]
pub struct SchedulerHandle {
    tx: mpsc::Sender<Command>,
    request_timeout: Duration,
}

impl SchedulerHandle {
    pub(crate) fn new(tx: mpsc::Sender<Command>, request_timeout: Duration) -> Self {
        Self { tx, request_timeout }
    }

    async fn send(&self, command: Command) -> Result<()> {
        match timeout(self.request_timeout, self.tx.send(command)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(_)) => Err(SmartError::Channel("Cmdlet scheduler stopped".to_string())),
            Err(_) => Err(SmartError::Channel("Cmdlet scheduler is not responding".to_string())),
        }
    }

    async fn request<T>(&self, build: impl FnOnce(oneshot::Sender<T>) -> Command) -> Result<T> {
        let (tx, rx) = oneshot::channel();
        self.send(build(tx)).await?;
        match timeout(self.request_timeout, rx).await {
            Ok(reply) => Ok(reply?),
            Err(_) => Err(SmartError::Channel("Cmdlet scheduler request timed out".to_string())),
        }
    }

    /// 提交临时 cmdlet
    pub async fn submit_cmdlet(&self, cmdlet: &str, owner: &str) -> Result<i64> {
        self.submit(cmdlet, owner, None).await
    }

    /// 提交固定到某个节点的 cmdlet
    pub async fn submit_cmdlet_to_node(&self, cmdlet: &str, owner: &str, node_id: &str) -> Result<i64> {
        self.submit(cmdlet, owner, Some(node_id.to_string())).await
    }

    async fn submit(&self, cmdlet: &str, owner: &str, node_id: Option<String>) -> Result<i64> {
        let descriptor = CmdletDescriptor::parse(cmdlet)?;
        let submitted = self
            .request(|respond| Command::Submit {
                descriptor,
                rule_id: None,
                owner: owner.to_string(),
                node_id,
                respond,
            })
            .await??;
        submitted.ok_or_else(|| SmartError::Internal("Cmdlet was not accepted".to_string()))
    }

    /// 停止 cmdlet
    pub async fn cancel_cmdlet(&self, cmdlet_id: i64) -> Result<()> {
        self.request(|respond| Command::Cancel { cmdlet_id, respond }).await?
    }

    /// 删除 cmdlet，未结束的先停止
    pub async fn delete_cmdlet(&self, cmdlet_id: i64) -> Result<()> {
        self.request(|respond| Command::Delete { cmdlet_id, respond }).await?
    }

    pub async fn get_cmdlet(&self, cmdlet_id: i64) -> Result<CmdletInfo> {
        self.request(|respond| Command::GetCmdlet { cmdlet_id, respond }).await?
    }

    pub async fn get_action(&self, action_id: i64) -> Result<ActionInfo> {
        self.request(|respond| Command::GetAction { action_id, respond }).await?
    }

    pub async fn list_cmdlets(&self) -> Result<Vec<CmdletInfo>> {
        self.request(|respond| Command::ListCmdlets { respond }).await
    }

    /// cmdlet 的 action，按声明顺序
    pub async fn list_actions(&self, cmdlet_id: i64) -> Result<Vec<ActionInfo>> {
        self.request(|respond| Command::ListActions { cmdlet_id, respond }).await?
    }

    pub async fn list_agents(&self) -> Result<Vec<AgentInfo>> {
        self.request(|respond| Command::ListAgents { respond }).await
    }

    /// 注册 agent，返回 agent ID 与连接序号
    pub(crate) async fn register_agent(
        &self,
        address: String,
        sender: mpsc::Sender<MasterMessage>,
    ) -> Result<(String, u64)> {
        self.request(|respond| Command::RegisterAgent {
            address,
            sender,
            respond,
        })
        .await
    }

    pub(crate) async fn agent_message(&self, agent_id: String, message: AgentMessage) -> Result<()> {
        self.send(Command::FromAgent { agent_id, message }).await
    }

    pub(crate) async fn agent_disconnected(&self, agent_id: String, connection: u64) -> Result<()> {
        self.send(Command::AgentDisconnected {
            agent_id,
            connection,
        })
        .await
    }

    /// 触发一次心跳超时检查
    pub async fn check_liveness(&self) -> Result<()> {
        self.send(Command::CheckLiveness).await
    }

    /// 停止调度器
    pub async fn shutdown(&self) -> Result<()> {
        self.request(|respond| Command::Shutdown { respond }).await
    }
}

#[async_trait]
impl CmdletSubmitter for SchedulerHandle {
    async fn submit_rule_cmdlet(&self, descriptor: CmdletDescriptor, owner: String) -> Result<Option<i64>> {
        let rule_id = descriptor.is_rule_cmdlet().then(|| descriptor.rule_id());
        self.request(|respond| Command::Submit {
            descriptor,
            rule_id,
            owner,
            node_id: None,
            respond,
        })
        .await?
    }

    async fn delete_by_rule(&self, rule_id: i64) -> Result<u64> {
        self.request(|respond| Command::DeleteByRule { rule_id, respond }).await?
    }
}
