use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Cmdlet 状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CmdletState {
    Pending,
    Scheduled,
    Running,
    Done,
    Failed,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Invalid cmdlet state transition: {from:?} -> {to:?}")]
pub struct StateTransitionError {
    pub from: CmdletState,
    pub to: CmdletState,
}

impl CmdletState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            CmdletState::Done | CmdletState::Failed | CmdletState::Cancelled
        )
    }

    /// 是否已经下发给 agent
    pub fn is_dispatched(&self) -> bool {
        matches!(self, CmdletState::Scheduled | CmdletState::Running)
    }

    /// 状态迁移校验
    ///
    /// 正常路径为 PENDING -> SCHEDULED -> RUNNING -> 终态。
    /// 例外只有两类：下发前直接 CANCELLED；agent 丢失或下发确认超时时从
    /// SCHEDULED/RUNNING 退回 PENDING 等待重新下发。
    pub fn can_transition_to(&self, next: CmdletState) -> bool {
        use CmdletState::*;
        matches!(
            (self, next),
            (Pending, Scheduled)
                | (Pending, Cancelled)
                | (Scheduled, Running)
                | (Scheduled, Pending)
                | (Scheduled, Cancelled)
                | (Scheduled, Failed)
                | (Running, Pending)
                | (Running, Done)
                | (Running, Failed)
                | (Running, Cancelled)
        )
    }

    pub fn transition(&self, next: CmdletState) -> Result<CmdletState, StateTransitionError> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(StateTransitionError { from: *self, to: next })
        }
    }
}

/// 下发策略
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DispatchPolicy {
    /// 任意可用 agent
    #[default]
    Any,
    /// 固定到某个节点
    Node,
}

impl DispatchPolicy {
    pub fn name(&self) -> &'static str {
        match self {
            DispatchPolicy::Any => "any",
            DispatchPolicy::Node => "node",
        }
    }
}

/// Cmdlet 信息
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CmdletInfo {
    pub id: i64,

    /// 所属规则，临时提交的 cmdlet 为 None
    pub rule_id: Option<i64>,

    /// 按声明顺序排列的 action ID
    pub action_ids: Vec<i64>,

    /// 原始 cmdlet 字符串
    pub parameters: String,

    pub state: CmdletState,

    pub dispatch_policy: DispatchPolicy,

    /// 固定下发的节点
    pub node_id: Option<String>,

    /// 当前执行的 agent
    pub agent_id: Option<String>,

    /// 以谁的身份执行
    pub owner: String,

    pub generate_time: i64,

    pub state_changed_time: i64,

    /// 已重新下发的次数
    pub redeliveries: u32,
}

impl CmdletInfo {
    pub fn new(id: i64, rule_id: Option<i64>, parameters: impl Into<String>, owner: impl Into<String>) -> Self {
        let now = crate::now_millis();
        Self {
            id,
            rule_id,
            action_ids: Vec::new(),
            parameters: parameters.into(),
            state: CmdletState::Pending,
            dispatch_policy: DispatchPolicy::Any,
            node_id: None,
            agent_id: None,
            owner: owner.into(),
            generate_time: now,
            state_changed_time: now,
            redeliveries: 0,
        }
    }

    /// 迁移到新状态并刷新时间戳
    pub fn update_state(&mut self, next: CmdletState) -> Result<(), StateTransitionError> {
        self.state = self.state.transition(next)?;
        self.state_changed_time = crate::now_millis();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normal_lifecycle() {
        let mut cmdlet = CmdletInfo::new(1, None, "echo -msg hi", "admin");
        cmdlet.update_state(CmdletState::Scheduled).unwrap();
        cmdlet.update_state(CmdletState::Running).unwrap();
        cmdlet.update_state(CmdletState::Done).unwrap();
        assert!(cmdlet.state.is_terminal());
    }

    #[test]
    fn test_cannot_skip_scheduled() {
        let mut cmdlet = CmdletInfo::new(1, None, "echo", "admin");
        let err = cmdlet.update_state(CmdletState::Running).unwrap_err();
        assert_eq!(err.from, CmdletState::Pending);
        assert_eq!(err.to, CmdletState::Running);
        assert!(!CmdletState::Pending.can_transition_to(CmdletState::Done));
    }

    #[test]
    fn test_cancel_before_dispatch() {
        assert!(CmdletState::Pending.can_transition_to(CmdletState::Cancelled));
    }

    #[test]
    fn test_terminal_states_are_final() {
        for terminal in [CmdletState::Done, CmdletState::Failed, CmdletState::Cancelled] {
            for next in [
                CmdletState::Pending,
                CmdletState::Scheduled,
                CmdletState::Running,
                CmdletState::Done,
            ] {
                assert!(!terminal.can_transition_to(next));
            }
        }
    }

    #[test]
    fn test_redelivery_reverts_to_pending() {
        assert!(CmdletState::Running.can_transition_to(CmdletState::Pending));
        assert!(CmdletState::Scheduled.can_transition_to(CmdletState::Pending));
    }
}
