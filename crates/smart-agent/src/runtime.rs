//! Agent 运行时
//!
//! 状态机：UNREGISTERED -> REGISTERING -> REGISTERED。
//!
//! 注册时按配置顺序逐个尝试 master，一轮都失败则按退避策略等待后重试，
//! 超过注册超时则退出。已注册时与主 master 断开，从下一个 master 开始重新注册，
//! 同一时间只与一个 master 注册。断开期间产生的状态上报先缓存，重新注册后按顺序补发。

use crate::actions::ActionRegistry;
use crate::backoff::Backoff;
use crate::config::AgentConfig;
use crate::connector::MasterConnector;
use crate::executor::CmdletExecutor;
use smart_core::transport::Endpoint;
use smart_core::{Result, SmartError};
use smart_types::{ActionStatusReport, AgentMessage, MasterMessage};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::{interval, timeout, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

const MAX_ATTEMPT_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentRuntimeState {
    Unregistered,
    Registering,
    Registered,
}

/// 对外可见的运行状态
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentStatus {
    pub state: AgentRuntimeState,
    pub agent_id: Option<String>,
    pub master: Option<String>,
}

impl AgentStatus {
    fn unregistered() -> Self {
        Self {
            state: AgentRuntimeState::Unregistered,
            agent_id: None,
            master: None,
        }
    }
}

/// 一次成功的注册
struct Registration {
    endpoint: Endpoint<AgentMessage, MasterMessage>,
    agent_id: String,
    master_index: usize,
}

enum ServeExit {
    Shutdown,
    Disconnected,
}

pub struct AgentRuntime {
    config: AgentConfig,
    connector: Arc<dyn MasterConnector>,
    executor: CmdletExecutor,
    reports: mpsc::UnboundedReceiver<ActionStatusReport>,
    /// 已从上报通道取出、尚未发送的上报
    pending: VecDeque<ActionStatusReport>,
    status: watch::Sender<AgentStatus>,
}

impl AgentRuntime {
    pub fn new(config: AgentConfig, registry: ActionRegistry, connector: Arc<dyn MasterConnector>) -> Self {
        let (reports_tx, reports) = mpsc::unbounded_channel();
        let (status, _) = watch::channel(AgentStatus::unregistered());
        Self {
            config,
            connector,
            executor: CmdletExecutor::new(Arc::new(registry), reports_tx),
            reports,
            pending: VecDeque::new(),
            status,
        }
    }

    pub fn status(&self) -> watch::Receiver<AgentStatus> {
        self.status.subscribe()
    }

    pub fn executor(&self) -> &CmdletExecutor {
        &self.executor
    }

    /// 运行直到收到停止信号或注册超时
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        if self.config.masters.is_empty() {
            return Err(SmartError::InvalidArgument(
                "No master address configured".to_string(),
            ));
        }
        info!(address = %self.config.address, masters = ?self.config.masters, "Agent starting");

        let mut primary: Option<usize> = None;
        let result = loop {
            self.set_status(AgentRuntimeState::Registering, None, None);
            let registration = tokio::select! {
                registration = self.register(primary) => registration,
                _ = shutdown_requested(&mut shutdown) => break Ok(()),
            };
            let registration = match registration {
                Ok(registration) => registration,
                Err(e) => break Err(e),
            };

            let master = self.config.masters[registration.master_index].clone();
            primary = Some(registration.master_index);
            info!(agent_id = %registration.agent_id, master = %master, "Agent registered");
            self.set_status(
                AgentRuntimeState::Registered,
                Some(registration.agent_id.clone()),
                Some(master.clone()),
            );

            match self
                .serve(registration.endpoint, &registration.agent_id, &mut shutdown)
                .await
            {
                ServeExit::Shutdown => break Ok(()),
                ServeExit::Disconnected => {
                    warn!(
                        agent_id = %registration.agent_id,
                        master = %master,
                        buffered = self.pending.len(),
                        "Lost connection to master, re-registering"
                    );
                    self.set_status(AgentRuntimeState::Unregistered, None, None);
                }
            }
        };

        self.executor.stop_all().await;
        self.set_status(AgentRuntimeState::Unregistered, None, None);
        info!("Agent stopped");
        result
    }

    /// 依次尝试 master 直到注册成功
    ///
    /// 首次按配置顺序；之前有主 master 时从它的下一个开始，主 master 排在最后。
    async fn register(&self, primary: Option<usize>) -> Result<Registration> {
        let masters = &self.config.masters;
        let count = masters.len();
        let order: Vec<usize> = match primary {
            Some(p) => (1..=count).map(|i| (p + i) % count).collect(),
            None => (0..count).collect(),
        };

        let deadline = Instant::now() + self.config.register_timeout;
        let mut backoff = Backoff::new(
            self.config.backoff,
            self.config.retry_interval,
            self.config.max_retry_interval,
        );

        loop {
            for &index in &order {
                match self.try_register(&masters[index]).await {
                    Ok((endpoint, agent_id)) => {
                        return Ok(Registration {
                            endpoint,
                            agent_id,
                            master_index: index,
                        })
                    }
                    Err(e) => debug!(master = %masters[index], error = %e, "Registration attempt failed"),
                }
            }

            let delay = backoff.next_delay();
            if Instant::now() + delay > deadline {
                return Err(SmartError::Dispatch(format!(
                    "Failed to register with any master within {:?}",
                    self.config.register_timeout
                )));
            }
            warn!(attempts = backoff.attempts(), delay = ?delay, "No master accepted registration, retrying");
            tokio::time::sleep(delay).await;
        }
    }

    async fn try_register(&self, master: &str) -> Result<(Endpoint<AgentMessage, MasterMessage>, String)> {
        let attempt_timeout = self.config.register_timeout.min(MAX_ATTEMPT_TIMEOUT);
        let mut endpoint = timeout(attempt_timeout, self.connector.connect(master))
            .await
            .map_err(|_| SmartError::Dispatch(format!("Connecting to {} timed out", master)))??;

        endpoint
            .tx
            .send(AgentMessage::RegisterNewAgent {
                address: self.config.address.clone(),
            })
            .await?;

        loop {
            match timeout(attempt_timeout, endpoint.rx.recv()).await {
                Ok(Some(MasterMessage::AgentRegistered { agent_id })) => return Ok((endpoint, agent_id)),
                Ok(Some(other)) => debug!(message = ?other, "Ignoring message before registration"),
                Ok(None) => {
                    return Err(SmartError::Dispatch(format!(
                        "Master {} closed the connection",
                        master
                    )))
                }
                Err(_) => {
                    return Err(SmartError::Dispatch(format!(
                        "Master {} did not answer registration",
                        master
                    )))
                }
            }
        }
    }

    async fn serve(
        &mut self,
        endpoint: Endpoint<AgentMessage, MasterMessage>,
        agent_id: &str,
        shutdown: &mut watch::Receiver<bool>,
    ) -> ServeExit {
        let (tx, mut rx) = endpoint.split();

        let mut heartbeat = interval(self.config.heartbeat_interval);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut flush = interval(self.config.report_interval);
        flush.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                message = rx.recv() => match message {
                    Some(MasterMessage::LaunchCmdlet(launch)) => {
                        let cmdlet_id = launch.cmdlet_id;
                        self.executor.launch(launch).await;
                        if tx.send(AgentMessage::CmdletAck { cmdlet_id }).await.is_err() {
                            return ServeExit::Disconnected;
                        }
                    }
                    Some(MasterMessage::StopCmdlet { cmdlet_id }) => {
                        if !self.executor.stop(cmdlet_id).await {
                            debug!(cmdlet_id, "Stop for cmdlet that is not running");
                        }
                    }
                    Some(MasterMessage::AgentRegistered { .. }) => {
                        debug!(agent_id = %agent_id, "Duplicate registration reply ignored");
                    }
                    None => return ServeExit::Disconnected,
                },
                Some(report) = self.reports.recv() => self.pending.push_back(report),
                _ = flush.tick() => {
                    if !self.flush_reports(&tx).await {
                        return ServeExit::Disconnected;
                    }
                }
                _ = heartbeat.tick() => {
                    let message = AgentMessage::Heartbeat { agent_id: agent_id.to_string() };
                    if tx.send(message).await.is_err() {
                        return ServeExit::Disconnected;
                    }
                }
                _ = shutdown_requested(shutdown) => {
                    while let Ok(report) = self.reports.try_recv() {
                        self.pending.push_back(report);
                    }
                    self.flush_reports(&tx).await;
                    return ServeExit::Shutdown;
                }
            }
        }
    }

    /// 按顺序发送缓存的上报，发送失败的留在缓存中
    async fn flush_reports(&mut self, tx: &mpsc::Sender<AgentMessage>) -> bool {
        while let Some(report) = self.pending.front().cloned() {
            if tx.send(AgentMessage::StatusReport(report)).await.is_err() {
                return false;
            }
            self.pending.pop_front();
        }
        true
    }

    fn set_status(&self, state: AgentRuntimeState, agent_id: Option<String>, master: Option<String>) {
        self.status.send_replace(AgentStatus {
            state,
            agent_id,
            master,
        });
    }
}

/// 等待停止信号；发送端丢弃时永不返回
async fn shutdown_requested(shutdown: &mut watch::Receiver<bool>) {
    loop {
        let requested = *shutdown.borrow();
        if requested {
            return;
        }
        if shutdown.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}
