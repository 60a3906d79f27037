//! Cmdlet 调度器
//!
//! 单一所有者的消息循环：cmdlet、action、待下发队列和 agent 注册表只在这里修改，
//! 外部通过 [`SchedulerHandle`] 发送命令。
//!
//! - 提交：校验至少一个 action，分配 ID，进入 PENDING 队列
//! - 下发：按策略选择 agent，PENDING -> SCHEDULED，收到 CmdletAck 后 -> RUNNING
//! - 回执超时、agent 心跳超时或重新注册时，未结束的 cmdlet 退回 PENDING 重新下发
//! - 所有 action 结束后 cmdlet 转为 DONE（全部成功）或 FAILED

use crate::config::SchedulerConfig;
use crate::handle::SchedulerHandle;
use crate::policy::{select_agent, Selection};
use crate::registry::AgentRegistry;
use crate::tracker::RuleCmdletTracker;
use smart_core::bus::{LifecycleEvent, SharedEventBus};
use smart_core::cmdlet::CmdletDescriptor;
use smart_core::metrics::{
    AGENTS_REGISTERED, CMDLETS_DISPATCHED_TOTAL, CMDLETS_FINISHED_TOTAL, CMDLETS_PENDING,
    CMDLETS_REDELIVERED_TOTAL,
};
use smart_core::{Result, SmartError};
use smart_types::{
    now_millis, ActionDescriptor, ActionInfo, ActionState, ActionStatusReport, AgentInfo,
    AgentMessage, CmdletInfo, CmdletState, DispatchPolicy, LaunchCmdlet, MasterMessage,
    StateTransitionError,
};
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

const COMMAND_CHANNEL_CAPACITY: usize = 1024;

/// 调度器命令
pub(crate) enum Command {
    Submit {
        descriptor: CmdletDescriptor,
        rule_id: Option<i64>,
        owner: String,
        node_id: Option<String>,
        respond: oneshot::Sender<Result<Option<i64>>>,
    },
    Cancel {
        cmdlet_id: i64,
        respond: oneshot::Sender<Result<()>>,
    },
    Delete {
        cmdlet_id: i64,
        respond: oneshot::Sender<Result<()>>,
    },
    DeleteByRule {
        rule_id: i64,
        respond: oneshot::Sender<Result<u64>>,
    },
    GetCmdlet {
        cmdlet_id: i64,
        respond: oneshot::Sender<Result<CmdletInfo>>,
    },
    GetAction {
        action_id: i64,
        respond: oneshot::Sender<Result<ActionInfo>>,
    },
    ListCmdlets {
        respond: oneshot::Sender<Vec<CmdletInfo>>,
    },
    ListActions {
        cmdlet_id: i64,
        respond: oneshot::Sender<Result<Vec<ActionInfo>>>,
    },
    ListAgents {
        respond: oneshot::Sender<Vec<AgentInfo>>,
    },
    RegisterAgent {
        address: String,
        sender: mpsc::Sender<MasterMessage>,
        respond: oneshot::Sender<(String, u64)>,
    },
    FromAgent {
        agent_id: String,
        message: AgentMessage,
    },
    AgentDisconnected {
        agent_id: String,
        connection: u64,
    },
    CheckLiveness,
    Shutdown {
        respond: oneshot::Sender<()>,
    },
}

pub struct CmdletScheduler {
    config: SchedulerConfig,
    bus: Option<SharedEventBus>,
    cmdlets: BTreeMap<i64, CmdletInfo>,
    actions: HashMap<i64, ActionInfo>,
    queue: VecDeque<i64>,
    /// 已下发、等待回执的 cmdlet
    awaiting_ack: HashMap<i64, Instant>,
    /// 已报告过暂停的 cmdlet
    stalled: HashSet<i64>,
    agents: AgentRegistry,
    tracker: RuleCmdletTracker,
    next_cmdlet_id: i64,
    next_action_id: i64,
}

impl CmdletScheduler {
    pub fn new(config: SchedulerConfig) -> Self {
        Self {
            config,
            bus: None,
            cmdlets: BTreeMap::new(),
            actions: HashMap::new(),
            queue: VecDeque::new(),
            awaiting_ack: HashMap::new(),
            stalled: HashSet::new(),
            agents: AgentRegistry::new(),
            tracker: RuleCmdletTracker::new(),
            next_cmdlet_id: 1,
            next_action_id: 1,
        }
    }

    pub fn with_event_bus(mut self, bus: SharedEventBus) -> Self {
        self.bus = Some(bus);
        self
    }

    /// 从指定 ID 开始分配
    pub fn with_id_start(mut self, cmdlet_id: i64, action_id: i64) -> Self {
        self.next_cmdlet_id = cmdlet_id;
        self.next_action_id = action_id;
        self
    }

    /// 启动消息循环
    pub fn spawn(self) -> (SchedulerHandle, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(COMMAND_CHANNEL_CAPACITY);
        let handle = SchedulerHandle::new(tx, self.config.request_timeout);
        let task = tokio::spawn(self.run(rx));
        (handle, task)
    }

    async fn run(mut self, mut rx: mpsc::Receiver<Command>) {
        info!(
            policy = self.config.dispatch_policy.name(),
            max_pending = self.config.max_pending_cmdlets,
            max_per_agent = self.config.max_cmdlets_per_agent,
            "Cmdlet scheduler started"
        );

        let mut schedule_tick = interval(self.config.schedule_interval);
        schedule_tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut purge_tick = interval(self.config.purge_interval);
        purge_tick.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                command = rx.recv() => match command {
                    Some(Command::Shutdown { respond }) => {
                        let _ = respond.send(());
                        break;
                    }
                    Some(command) => self.handle(command),
                    None => break,
                },
                _ = schedule_tick.tick() => {
                    self.check_ack_timeouts();
                    self.schedule();
                }
                _ = purge_tick.tick() => self.purge(),
            }
        }

        info!(
            cmdlets = self.cmdlets.len(),
            pending = self.queue.len(),
            "Cmdlet scheduler stopped"
        );
    }

    fn handle(&mut self, command: Command) {
        match command {
            Command::Submit {
                descriptor,
                rule_id,
                owner,
                node_id,
                respond,
            } => {
                let result = self.submit(descriptor, rule_id, owner, node_id);
                if matches!(result, Ok(Some(_))) {
                    self.schedule();
                }
                let _ = respond.send(result);
            }
            Command::Cancel { cmdlet_id, respond } => {
                let _ = respond.send(self.cancel(cmdlet_id));
            }
            Command::Delete { cmdlet_id, respond } => {
                let _ = respond.send(self.delete(cmdlet_id));
            }
            Command::DeleteByRule { rule_id, respond } => {
                let _ = respond.send(self.delete_by_rule(rule_id));
            }
            Command::GetCmdlet { cmdlet_id, respond } => {
                let result = self
                    .cmdlets
                    .get(&cmdlet_id)
                    .cloned()
                    .ok_or_else(|| SmartError::not_found("Cmdlet", cmdlet_id));
                let _ = respond.send(result);
            }
            Command::GetAction { action_id, respond } => {
                let result = self
                    .actions
                    .get(&action_id)
                    .cloned()
                    .ok_or_else(|| SmartError::not_found("Action", action_id));
                let _ = respond.send(result);
            }
            Command::ListCmdlets { respond } => {
                let _ = respond.send(self.cmdlets.values().cloned().collect());
            }
            Command::ListActions { cmdlet_id, respond } => {
                let result = self
                    .cmdlets
                    .get(&cmdlet_id)
                    .map(|cmdlet| {
                        cmdlet
                            .action_ids
                            .iter()
                            .filter_map(|id| self.actions.get(id).cloned())
                            .collect()
                    })
                    .ok_or_else(|| SmartError::not_found("Cmdlet", cmdlet_id));
                let _ = respond.send(result);
            }
            Command::ListAgents { respond } => {
                let _ = respond.send(self.agents.list());
            }
            Command::RegisterAgent {
                address,
                sender,
                respond,
            } => {
                let registered = self.register_agent(&address, sender);
                let _ = respond.send(registered);
                self.schedule();
            }
            Command::FromAgent { agent_id, message } => self.on_agent_message(&agent_id, message),
            Command::AgentDisconnected {
                agent_id,
                connection,
            } => {
                self.agents.disconnect(&agent_id, connection);
            }
            Command::CheckLiveness => self.check_liveness(),
            Command::Shutdown { respond } => {
                let _ = respond.send(());
            }
        }
    }

    fn submit(
        &mut self,
        descriptor: CmdletDescriptor,
        rule_id: Option<i64>,
        owner: String,
        node_id: Option<String>,
    ) -> Result<Option<i64>> {
        if descriptor.action_size() == 0 {
            return Err(SmartError::InvalidArgument(
                "Cmdlet must contain at least one action".to_string(),
            ));
        }

        let cmdlet_string = descriptor.cmdlet_string();
        if let Some(rule_id) = rule_id {
            if let Some(existing) = self.tracker.find(rule_id, &cmdlet_string) {
                debug!(rule_id, cmdlet_id = existing, "Duplicate rule cmdlet skipped");
                return Ok(None);
            }
        }

        if self.queue.len() >= self.config.max_pending_cmdlets {
            return Err(SmartError::QueueFull(format!(
                "{} cmdlets pending",
                self.queue.len()
            )));
        }

        let dispatch_policy = if node_id.is_some() {
            DispatchPolicy::Node
        } else {
            self.config.dispatch_policy
        };
        if dispatch_policy == DispatchPolicy::Node && node_id.is_none() {
            return Err(SmartError::InvalidArgument(
                "Node dispatch policy requires a node id".to_string(),
            ));
        }

        let cmdlet_id = self.next_cmdlet_id;
        self.next_cmdlet_id += 1;

        let mut cmdlet = CmdletInfo::new(cmdlet_id, rule_id, cmdlet_string.clone(), owner);
        cmdlet.dispatch_policy = dispatch_policy;
        cmdlet.node_id = node_id;

        for index in 0..descriptor.action_size() {
            let Some(name) = descriptor.action_name(index) else {
                continue;
            };
            let action_id = self.next_action_id;
            self.next_action_id += 1;
            let action = ActionInfo::new(action_id, cmdlet_id, name, descriptor.action_args(index));
            cmdlet.action_ids.push(action_id);
            self.actions.insert(action_id, action);
        }

        if let Some(rule_id) = rule_id {
            self.tracker.track(rule_id, cmdlet_string, cmdlet_id);
        }

        info!(
            cmdlet_id,
            rule_id = ?rule_id,
            owner = %cmdlet.owner,
            actions = cmdlet.action_ids.len(),
            "Cmdlet submitted"
        );
        self.publish(LifecycleEvent::CmdletAdded {
            cmdlet_id,
            rule_id,
            owner: cmdlet.owner.clone(),
        });
        self.cmdlets.insert(cmdlet_id, cmdlet);
        self.queue.push_back(cmdlet_id);
        self.update_pending_gauge();
        Ok(Some(cmdlet_id))
    }

    /// 下发队列中的 cmdlet
    fn schedule(&mut self) {
        if self.queue.is_empty() {
            return;
        }

        let mut waiting = VecDeque::with_capacity(self.queue.len());
        while let Some(cmdlet_id) = self.queue.pop_front() {
            let Some(cmdlet) = self.cmdlets.get(&cmdlet_id) else {
                continue;
            };
            if cmdlet.state != CmdletState::Pending {
                continue;
            }

            match select_agent(
                &self.agents,
                cmdlet.dispatch_policy,
                cmdlet.node_id.as_deref(),
                self.config.max_cmdlets_per_agent,
            ) {
                Selection::Agent(agent_id) => {
                    if let Err(e) = self.dispatch(cmdlet_id, &agent_id) {
                        warn!(cmdlet_id, agent_id = %agent_id, error = %e, "Failed to dispatch cmdlet");
                        waiting.push_back(cmdlet_id);
                    }
                }
                Selection::Busy => waiting.push_back(cmdlet_id),
                Selection::Stalled => {
                    if self.stalled.insert(cmdlet_id) {
                        warn!(
                            cmdlet_id,
                            node_id = ?cmdlet.node_id,
                            "Cmdlet stalled, target node is not available"
                        );
                    }
                    waiting.push_back(cmdlet_id);
                }
            }
        }
        self.queue = waiting;
        self.update_pending_gauge();
    }

    fn dispatch(&mut self, cmdlet_id: i64, agent_id: &str) -> Result<()> {
        let cmdlet = self
            .cmdlets
            .get(&cmdlet_id)
            .ok_or_else(|| SmartError::not_found("Cmdlet", cmdlet_id))?;
        let launch = LaunchCmdlet {
            cmdlet_id,
            actions: cmdlet
                .action_ids
                .iter()
                .filter_map(|id| self.actions.get(id))
                .map(|action| ActionDescriptor {
                    action_id: action.id,
                    name: action.action_name.clone(),
                    args: action.args.clone(),
                })
                .collect(),
            dispatch_policy: cmdlet.dispatch_policy,
            owner: cmdlet.owner.clone(),
            node_id: cmdlet.node_id.clone(),
        };

        let sender = self
            .agents
            .sender(agent_id)
            .ok_or_else(|| SmartError::Dispatch(format!("Agent {} is not connected", agent_id)))?;
        sender
            .try_send(MasterMessage::LaunchCmdlet(launch))
            .map_err(|e| match e {
                mpsc::error::TrySendError::Full(_) => {
                    SmartError::Dispatch(format!("Agent {} outbound queue is full", agent_id))
                }
                mpsc::error::TrySendError::Closed(_) => {
                    SmartError::Dispatch(format!("Agent {} connection closed", agent_id))
                }
            })?;

        let cmdlet = self
            .cmdlets
            .get_mut(&cmdlet_id)
            .ok_or_else(|| SmartError::not_found("Cmdlet", cmdlet_id))?;
        cmdlet.update_state(CmdletState::Scheduled)?;
        cmdlet.agent_id = Some(agent_id.to_string());

        self.agents.assign(agent_id, cmdlet_id);
        self.awaiting_ack.insert(cmdlet_id, Instant::now());
        self.stalled.remove(&cmdlet_id);
        metrics::counter!(CMDLETS_DISPATCHED_TOTAL, 1);
        debug!(cmdlet_id, agent_id = %agent_id, "Cmdlet dispatched");
        self.publish(LifecycleEvent::CmdletStateChanged {
            cmdlet_id,
            state: CmdletState::Scheduled,
        });
        Ok(())
    }

    fn register_agent(&mut self, address: &str, sender: mpsc::Sender<MasterMessage>) -> (String, u64) {
        let registration = self.agents.register(address, sender.clone());
        if let Err(e) = sender.try_send(MasterMessage::AgentRegistered {
            agent_id: registration.agent_id.clone(),
        }) {
            warn!(agent_id = %registration.agent_id, error = %e, "Failed to confirm agent registration");
        }
        for cmdlet_id in registration.orphaned {
            self.redeliver(cmdlet_id, "agent re-registered");
        }
        metrics::gauge!(AGENTS_REGISTERED, self.agents.registered_count() as f64);
        (registration.agent_id, registration.connection)
    }

    fn on_agent_message(&mut self, agent_id: &str, message: AgentMessage) {
        self.agents.touch(agent_id);
        match message {
            AgentMessage::Heartbeat { .. } => {}
            AgentMessage::CmdletAck { cmdlet_id } => {
                if self.owned_by(cmdlet_id, agent_id) {
                    self.mark_running(cmdlet_id);
                } else {
                    debug!(cmdlet_id, agent_id = %agent_id, "Ignoring ack for cmdlet not owned by agent");
                }
            }
            AgentMessage::StatusReport(report) => self.on_status_report(agent_id, report),
            AgentMessage::RegisterNewAgent { address } => {
                warn!(agent_id = %agent_id, address = %address, "Duplicate registration on open connection ignored");
            }
        }
    }

    /// cmdlet 当前是否下发给了该 agent
    fn owned_by(&self, cmdlet_id: i64, agent_id: &str) -> bool {
        self.cmdlets
            .get(&cmdlet_id)
            .map(|c| c.state.is_dispatched() && c.agent_id.as_deref() == Some(agent_id))
            .unwrap_or(false)
    }

    fn mark_running(&mut self, cmdlet_id: i64) {
        let Some(cmdlet) = self.cmdlets.get_mut(&cmdlet_id) else {
            return;
        };
        if cmdlet.state != CmdletState::Scheduled {
            return;
        }
        if cmdlet.update_state(CmdletState::Running).is_ok() {
            self.awaiting_ack.remove(&cmdlet_id);
            debug!(cmdlet_id, "Cmdlet running");
            self.publish(LifecycleEvent::CmdletStateChanged {
                cmdlet_id,
                state: CmdletState::Running,
            });
        }
    }

    fn on_status_report(&mut self, agent_id: &str, report: ActionStatusReport) {
        let cmdlet_id = report.cmdlet_id;
        if !self.owned_by(cmdlet_id, agent_id) {
            debug!(cmdlet_id, agent_id = %agent_id, "Ignoring report for cmdlet not owned by agent");
            return;
        }
        // 回执之前到达的上报视为回执
        self.mark_running(cmdlet_id);

        let Some(action) = self.actions.get_mut(&report.action_id) else {
            warn!(cmdlet_id, action_id = report.action_id, "Report for unknown action");
            return;
        };
        if action.cmdlet_id != cmdlet_id || action.state.is_terminal() {
            return;
        }

        action.update_progress(report.progress);
        match report.state {
            ActionState::Pending => {}
            ActionState::Running => action.state = ActionState::Running,
            ActionState::Done => {
                action.state = ActionState::Done;
                action.result = report.result.unwrap_or_default();
                action.finish_time = Some(now_millis());
            }
            ActionState::Failed => {
                action.state = ActionState::Failed;
                if let Some(result) = report.result {
                    action.result = result;
                }
                if let Some(error) = report.error {
                    action.log.push_str(&error);
                }
                action.finish_time = Some(now_millis());
            }
        }
        debug!(
            cmdlet_id,
            action_id = action.id,
            state = ?action.state,
            progress = action.progress,
            "Action status updated"
        );

        if let Some(state) = self.completed_state(cmdlet_id) {
            self.finish(cmdlet_id, state);
        }
    }

    /// 所有 action 结束时得到 cmdlet 终态
    fn completed_state(&self, cmdlet_id: i64) -> Option<CmdletState> {
        let cmdlet = self.cmdlets.get(&cmdlet_id)?;
        let mut failed = false;
        for id in &cmdlet.action_ids {
            let action = self.actions.get(id)?;
            match action.state {
                ActionState::Done => {}
                ActionState::Failed => failed = true,
                _ => return None,
            }
        }
        Some(if failed { CmdletState::Failed } else { CmdletState::Done })
    }

    fn finish(&mut self, cmdlet_id: i64, state: CmdletState) {
        let Some(cmdlet) = self.cmdlets.get_mut(&cmdlet_id) else {
            return;
        };
        if let Err(e) = cmdlet.update_state(state) {
            warn!(cmdlet_id, error = %e, "Cannot finish cmdlet");
            return;
        }
        if let Some(agent_id) = cmdlet.agent_id.clone() {
            self.agents.release(&agent_id, cmdlet_id);
        }
        self.awaiting_ack.remove(&cmdlet_id);
        self.stalled.remove(&cmdlet_id);
        self.tracker.untrack(cmdlet_id);

        let label = match state {
            CmdletState::Done => "done",
            CmdletState::Failed => "failed",
            _ => "cancelled",
        };
        metrics::counter!(CMDLETS_FINISHED_TOTAL, 1, "state" => label);
        info!(cmdlet_id, state = ?state, "Cmdlet finished");
        self.publish(LifecycleEvent::CmdletStateChanged { cmdlet_id, state });
    }

    /// 退回 PENDING 等待重新下发，超过次数上限则置为 FAILED
    fn redeliver(&mut self, cmdlet_id: i64, reason: &str) {
        let max_redeliveries = self.config.max_redeliveries;
        let Some(cmdlet) = self.cmdlets.get_mut(&cmdlet_id) else {
            return;
        };
        if !cmdlet.state.is_dispatched() {
            return;
        }
        if let Some(agent_id) = cmdlet.agent_id.take() {
            self.agents.release(&agent_id, cmdlet_id);
        }
        self.awaiting_ack.remove(&cmdlet_id);

        if cmdlet.redeliveries >= max_redeliveries {
            warn!(cmdlet_id, redeliveries = cmdlet.redeliveries, reason, "Cmdlet redelivery limit exceeded");
            let action_ids = cmdlet.action_ids.clone();
            for id in action_ids {
                if let Some(action) = self.actions.get_mut(&id) {
                    if !action.state.is_terminal() {
                        action.state = ActionState::Failed;
                        action.log.push_str("Redelivery limit exceeded");
                        action.finish_time = Some(now_millis());
                    }
                }
            }
            self.finish(cmdlet_id, CmdletState::Failed);
            return;
        }

        if let Err(e) = cmdlet.update_state(CmdletState::Pending) {
            warn!(cmdlet_id, error = %e, "Cannot redeliver cmdlet");
            return;
        }
        cmdlet.redeliveries += 1;
        let redeliveries = cmdlet.redeliveries;
        for id in cmdlet.action_ids.clone() {
            if let Some(action) = self.actions.get_mut(&id) {
                action.reset();
            }
        }

        self.queue.push_front(cmdlet_id);
        metrics::counter!(CMDLETS_REDELIVERED_TOTAL, 1);
        info!(cmdlet_id, redeliveries, reason, "Cmdlet returned to queue");
        self.publish(LifecycleEvent::CmdletStateChanged {
            cmdlet_id,
            state: CmdletState::Pending,
        });
        self.update_pending_gauge();
    }

    fn check_ack_timeouts(&mut self) {
        let timeout = self.config.dispatch_ack_timeout;
        let expired: Vec<i64> = self
            .awaiting_ack
            .iter()
            .filter(|(_, at)| at.elapsed() > timeout)
            .map(|(id, _)| *id)
            .collect();
        for cmdlet_id in expired {
            warn!(cmdlet_id, "Cmdlet dispatch not acknowledged in time");
            self.redeliver(cmdlet_id, "ack timeout");
        }
    }

    fn check_liveness(&mut self) {
        let timeout_ms = self.config.heartbeat_timeout.as_millis() as i64;
        for agent_id in self.agents.expired(now_millis(), timeout_ms) {
            for cmdlet_id in self.agents.mark_unreachable(&agent_id) {
                self.redeliver(cmdlet_id, "agent unreachable");
            }
        }
        metrics::gauge!(AGENTS_REGISTERED, self.agents.registered_count() as f64);
    }

    fn cancel(&mut self, cmdlet_id: i64) -> Result<()> {
        let cmdlet = self
            .cmdlets
            .get_mut(&cmdlet_id)
            .ok_or_else(|| SmartError::not_found("Cmdlet", cmdlet_id))?;
        if cmdlet.state.is_terminal() {
            return Err(StateTransitionError {
                from: cmdlet.state,
                to: CmdletState::Cancelled,
            }
            .into());
        }

        if cmdlet.state == CmdletState::Pending {
            self.queue.retain(|id| *id != cmdlet_id);
        } else if let Some(agent_id) = cmdlet.agent_id.clone() {
            // 尽力通知 agent，由 action 配合停止
            if let Some(sender) = self.agents.sender(&agent_id) {
                if let Err(e) = sender.try_send(MasterMessage::StopCmdlet { cmdlet_id }) {
                    warn!(cmdlet_id, agent_id = %agent_id, error = %e, "Failed to send stop");
                }
            }
        }

        let action_ids = cmdlet.action_ids.clone();
        for id in action_ids {
            if let Some(action) = self.actions.get_mut(&id) {
                if !action.state.is_terminal() {
                    action.state = ActionState::Failed;
                    action.log.push_str("Cancelled");
                    action.finish_time = Some(now_millis());
                }
            }
        }

        self.finish(cmdlet_id, CmdletState::Cancelled);
        self.publish(LifecycleEvent::CmdletStopped { cmdlet_id });
        self.update_pending_gauge();
        Ok(())
    }

    fn delete(&mut self, cmdlet_id: i64) -> Result<()> {
        let state = self
            .cmdlets
            .get(&cmdlet_id)
            .map(|c| c.state)
            .ok_or_else(|| SmartError::not_found("Cmdlet", cmdlet_id))?;
        if !state.is_terminal() {
            self.cancel(cmdlet_id)?;
        }
        if let Some(cmdlet) = self.cmdlets.remove(&cmdlet_id) {
            for id in cmdlet.action_ids {
                self.actions.remove(&id);
            }
        }
        info!(cmdlet_id, "Cmdlet deleted");
        self.publish(LifecycleEvent::CmdletDeleted { cmdlet_id });
        Ok(())
    }

    fn delete_by_rule(&mut self, rule_id: i64) -> Result<u64> {
        let ids: Vec<i64> = self
            .cmdlets
            .values()
            .filter(|c| c.rule_id == Some(rule_id) && !c.state.is_terminal())
            .map(|c| c.id)
            .collect();
        for cmdlet_id in &ids {
            self.delete(*cmdlet_id)?;
        }
        if !ids.is_empty() {
            info!(rule_id, deleted = ids.len(), "Deleted unfinished cmdlets of rule");
        }
        Ok(ids.len() as u64)
    }

    /// 只保留最近结束的 `keep_finished_cmdlets` 个
    fn purge(&mut self) {
        let mut finished: Vec<(i64, i64)> = self
            .cmdlets
            .values()
            .filter(|c| c.state.is_terminal())
            .map(|c| (c.state_changed_time, c.id))
            .collect();
        if finished.len() <= self.config.keep_finished_cmdlets {
            return;
        }
        finished.sort_unstable();
        let excess = finished.len() - self.config.keep_finished_cmdlets;
        for (_, cmdlet_id) in finished.into_iter().take(excess) {
            if let Some(cmdlet) = self.cmdlets.remove(&cmdlet_id) {
                for id in cmdlet.action_ids {
                    self.actions.remove(&id);
                }
            }
        }
        debug!(purged = excess, tracked = self.tracker.len(), "Purged finished cmdlets");
    }

    fn update_pending_gauge(&self) {
        metrics::gauge!(CMDLETS_PENDING, self.queue.len() as f64);
    }

    fn publish(&self, event: LifecycleEvent) {
        if let Some(bus) = &self.bus {
            bus.publish(event);
        }
    }
}
