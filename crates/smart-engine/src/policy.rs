//! 下发目标选择

use crate::registry::AgentRegistry;
use smart_types::DispatchPolicy;

/// 选择结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selection {
    Agent(String),
    /// 有可用 agent 但都已满载
    Busy,
    /// 指定节点不在线，cmdlet 暂停等待
    Stalled,
}

/// 按下发策略选择 agent
///
/// `Any` 在未满载的已注册 agent 中取负载最小者，负载相同按 ID 排序。
/// `Node` 只接受指定节点（ID 或地址）。
pub fn select_agent(
    registry: &AgentRegistry,
    policy: DispatchPolicy,
    node_id: Option<&str>,
    max_per_agent: usize,
) -> Selection {
    match policy {
        DispatchPolicy::Any => registry
            .dispatchable()
            .filter(|(_, load)| *load < max_per_agent)
            .min_by(|a, b| a.1.cmp(&b.1).then_with(|| a.0.cmp(b.0)))
            .map(|(id, _)| Selection::Agent(id.to_string()))
            .unwrap_or(Selection::Busy),
        DispatchPolicy::Node => {
            let Some(agent_id) = node_id.and_then(|node| registry.resolve(node)) else {
                return Selection::Stalled;
            };
            if !registry.is_dispatchable(agent_id) {
                Selection::Stalled
            } else if registry.load(agent_id) >= max_per_agent {
                Selection::Busy
            } else {
                Selection::Agent(agent_id.to_string())
            }
        }
    }
}
