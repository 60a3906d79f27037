//! master 与 agent 之间的协议消息
//!
//! 每条消息独立序列化为一行 JSON，`type` 字段区分消息种类。

use crate::action::ActionState;
use crate::cmdlet::DispatchPolicy;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// agent -> master
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum AgentMessage {
    RegisterNewAgent { address: String },
    /// 收到 LaunchCmdlet 后的回执
    CmdletAck { cmdlet_id: i64 },
    StatusReport(ActionStatusReport),
    Heartbeat { agent_id: String },
}

/// master -> agent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum MasterMessage {
    AgentRegistered { agent_id: String },
    LaunchCmdlet(LaunchCmdlet),
    StopCmdlet { cmdlet_id: i64 },
}

/// 下发 cmdlet
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LaunchCmdlet {
    pub cmdlet_id: i64,
    pub actions: Vec<ActionDescriptor>,
    pub dispatch_policy: DispatchPolicy,
    pub owner: String,
    pub node_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionDescriptor {
    pub action_id: i64,
    pub name: String,
    pub args: BTreeMap<String, String>,
}

/// action 进度或结果上报
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionStatusReport {
    pub cmdlet_id: i64,
    pub action_id: i64,
    pub progress: f32,
    pub state: ActionState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ActionStatusReport {
    pub fn progress(cmdlet_id: i64, action_id: i64, progress: f32) -> Self {
        Self {
            cmdlet_id,
            action_id,
            progress,
            state: ActionState::Running,
            result: None,
            error: None,
        }
    }

    pub fn done(cmdlet_id: i64, action_id: i64, result: Option<String>) -> Self {
        Self {
            cmdlet_id,
            action_id,
            progress: 1.0,
            state: ActionState::Done,
            result,
            error: None,
        }
    }

    pub fn failed(cmdlet_id: i64, action_id: i64, error: impl Into<String>) -> Self {
        Self {
            cmdlet_id,
            action_id,
            progress: 1.0,
            state: ActionState::Failed,
            result: None,
            error: Some(error.into()),
        }
    }
}
