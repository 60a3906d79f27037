//! 共享数据模型
//!
//! 规则、Cmdlet、Action、Agent 以及 master 与 agent 之间的协议消息。

pub mod access;
pub mod action;
pub mod agent;
pub mod cmdlet;
pub mod file;
pub mod protocol;
pub mod rule;

pub use access::{AggregatedAccessCounts, FileAccessEvent, TimeGranularity};
pub use action::{ActionInfo, ActionState};
pub use agent::{AgentInfo, AgentState};
pub use cmdlet::{CmdletInfo, CmdletState, DispatchPolicy, StateTransitionError};
pub use file::{FileDiff, FileDiffState, FileDiffType, FileInfo};
pub use protocol::{ActionDescriptor, ActionStatusReport, AgentMessage, LaunchCmdlet, MasterMessage};
pub use rule::{RuleInfo, RuleState};

/// 当前时间（毫秒）
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
