use serde::{Deserialize, Serialize};

/// master 侧记录的 agent 存活状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AgentState {
    Registered,
    Unreachable,
}

/// Agent 信息
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentInfo {
    pub id: String,
    pub address: String,
    pub register_time: i64,
    pub last_heartbeat: i64,
    pub state: AgentState,
}

impl AgentInfo {
    pub fn new(id: impl Into<String>, address: impl Into<String>) -> Self {
        let now = crate::now_millis();
        Self {
            id: id.into(),
            address: address.into(),
            register_time: now,
            last_heartbeat: now,
            state: AgentState::Registered,
        }
    }

    pub fn is_available(&self) -> bool {
        self.state == AgentState::Registered
    }
}
