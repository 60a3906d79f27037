use smart_types::{now_millis, AgentInfo, AgentState, MasterMessage};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// 已注册 agent 的连接与下发记录
struct AgentEntry {
    info: AgentInfo,

    /// 当前连接的出站通道，断开后为 None
    sender: Option<mpsc::Sender<MasterMessage>>,

    /// 连接序号，用于忽略旧连接的断开通知
    connection: u64,

    /// 已下发且未结束的 cmdlet
    in_flight: BTreeSet<i64>,
}

/// 一次注册的结果
#[derive(Debug)]
pub struct Registration {
    pub agent_id: String,
    pub connection: u64,

    /// 旧连接上未结束的 cmdlet，需要重新下发
    pub orphaned: Vec<i64>,
}

/// Agent 注册表
///
/// 由调度器独占，所有修改都在调度器的消息循环里完成。
#[derive(Default)]
pub struct AgentRegistry {
    agents: BTreeMap<String, AgentEntry>,
    by_address: HashMap<String, String>,
    next_id: u64,
    next_connection: u64,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册 agent
    ///
    /// 已知地址沿用原来的 ID，否则分配 `agent-<n>`。
    pub fn register(&mut self, address: &str, sender: mpsc::Sender<MasterMessage>) -> Registration {
        self.next_connection += 1;
        let connection = self.next_connection;

        if let Some(agent_id) = self.by_address.get(address).cloned() {
            if let Some(entry) = self.agents.get_mut(&agent_id) {
                let orphaned: Vec<i64> = std::mem::take(&mut entry.in_flight).into_iter().collect();
                let now = now_millis();
                entry.info.state = AgentState::Registered;
                entry.info.register_time = now;
                entry.info.last_heartbeat = now;
                entry.sender = Some(sender);
                entry.connection = connection;
                info!(agent_id = %agent_id, address = %address, orphaned = orphaned.len(), "Agent re-registered");
                return Registration {
                    agent_id,
                    connection,
                    orphaned,
                };
            }
        }

        self.next_id += 1;
        let agent_id = format!("agent-{}", self.next_id);
        self.by_address.insert(address.to_string(), agent_id.clone());
        self.agents.insert(
            agent_id.clone(),
            AgentEntry {
                info: AgentInfo::new(agent_id.clone(), address),
                sender: Some(sender),
                connection,
                in_flight: BTreeSet::new(),
            },
        );
        info!(agent_id = %agent_id, address = %address, "Agent registered");
        Registration {
            agent_id,
            connection,
            orphaned: Vec::new(),
        }
    }

    /// 连接断开，只处理当前连接的通知
    pub fn disconnect(&mut self, agent_id: &str, connection: u64) -> bool {
        match self.agents.get_mut(agent_id) {
            Some(entry) if entry.connection == connection => {
                entry.sender = None;
                info!(agent_id = %agent_id, in_flight = entry.in_flight.len(), "Agent disconnected");
                true
            }
            _ => {
                debug!(agent_id = %agent_id, connection, "Ignoring stale disconnect");
                false
            }
        }
    }

    /// 刷新心跳时间
    pub fn touch(&mut self, agent_id: &str) {
        if let Some(entry) = self.agents.get_mut(agent_id) {
            entry.info.last_heartbeat = now_millis();
        }
    }

    /// 心跳超时的已注册 agent
    pub fn expired(&self, now: i64, timeout_ms: i64) -> Vec<String> {
        self.agents
            .values()
            .filter(|e| e.info.state == AgentState::Registered)
            .filter(|e| now - e.info.last_heartbeat > timeout_ms)
            .map(|e| e.info.id.clone())
            .collect()
    }

    /// 标记不可达并关闭连接，返回需要重新下发的 cmdlet
    pub fn mark_unreachable(&mut self, agent_id: &str) -> Vec<i64> {
        let Some(entry) = self.agents.get_mut(agent_id) else {
            return Vec::new();
        };
        entry.info.state = AgentState::Unreachable;
        entry.sender = None;
        let in_flight: Vec<i64> = std::mem::take(&mut entry.in_flight).into_iter().collect();
        warn!(agent_id = %agent_id, in_flight = in_flight.len(), "Agent marked unreachable");
        in_flight
    }

    pub fn assign(&mut self, agent_id: &str, cmdlet_id: i64) {
        if let Some(entry) = self.agents.get_mut(agent_id) {
            entry.in_flight.insert(cmdlet_id);
        }
    }

    pub fn release(&mut self, agent_id: &str, cmdlet_id: i64) {
        if let Some(entry) = self.agents.get_mut(agent_id) {
            entry.in_flight.remove(&cmdlet_id);
        }
    }

    pub fn sender(&self, agent_id: &str) -> Option<&mpsc::Sender<MasterMessage>> {
        self.agents.get(agent_id).and_then(|e| e.sender.as_ref())
    }

    /// 已注册且连接正常
    pub fn is_dispatchable(&self, agent_id: &str) -> bool {
        self.agents
            .get(agent_id)
            .map(|e| e.info.is_available() && e.sender.is_some())
            .unwrap_or(false)
    }

    pub fn load(&self, agent_id: &str) -> usize {
        self.agents.get(agent_id).map(|e| e.in_flight.len()).unwrap_or(0)
    }

    /// 可接收下发的 agent 及其负载，按 ID 排序
    pub fn dispatchable(&self) -> impl Iterator<Item = (&str, usize)> {
        self.agents
            .values()
            .filter(|e| e.info.is_available() && e.sender.is_some())
            .map(|e| (e.info.id.as_str(), e.in_flight.len()))
    }

    /// 按 ID 或地址查找
    pub fn resolve(&self, node: &str) -> Option<&str> {
        if let Some(entry) = self.agents.get(node) {
            return Some(entry.info.id.as_str());
        }
        self.by_address.get(node).map(|id| id.as_str())
    }

    pub fn registered_count(&self) -> usize {
        self.agents.values().filter(|e| e.info.is_available()).count()
    }

    pub fn list(&self) -> Vec<AgentInfo> {
        self.agents.values().map(|e| e.info.clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn channel() -> mpsc::Sender<MasterMessage> {
        mpsc::channel(4).0
    }

    #[test]
    fn test_register_assigns_sequential_ids() {
        let mut registry = AgentRegistry::new();
        let a = registry.register("10.0.0.1:9000", channel());
        let b = registry.register("10.0.0.2:9000", channel());

        assert_eq!(a.agent_id, "agent-1");
        assert_eq!(b.agent_id, "agent-2");
        assert_eq!(registry.registered_count(), 2);
    }

    #[test]
    fn test_reregister_reuses_id_and_returns_orphans() {
        let mut registry = AgentRegistry::new();
        let first = registry.register("10.0.0.1:9000", channel());
        registry.assign(&first.agent_id, 7);
        registry.assign(&first.agent_id, 8);

        let second = registry.register("10.0.0.1:9000", channel());
        assert_eq!(second.agent_id, first.agent_id);
        assert_ne!(second.connection, first.connection);
        assert_eq!(second.orphaned, vec![7, 8]);
        assert_eq!(registry.load(&second.agent_id), 0);
    }

    #[test]
    fn test_stale_disconnect_is_ignored() {
        let mut registry = AgentRegistry::new();
        let first = registry.register("10.0.0.1:9000", channel());
        let second = registry.register("10.0.0.1:9000", channel());

        assert!(!registry.disconnect(&first.agent_id, first.connection));
        assert!(registry.is_dispatchable(&first.agent_id));

        assert!(registry.disconnect(&second.agent_id, second.connection));
        assert!(!registry.is_dispatchable(&second.agent_id));
        // 断开不等于不可达，等待心跳超时
        assert_eq!(registry.registered_count(), 1);
    }

    #[test]
    fn test_expired_and_unreachable() {
        let mut registry = AgentRegistry::new();
        let reg = registry.register("10.0.0.1:9000", channel());
        registry.assign(&reg.agent_id, 3);

        let now = now_millis();
        assert!(registry.expired(now, 1000).is_empty());
        assert_eq!(registry.expired(now + 5000, 1000), vec![reg.agent_id.clone()]);

        assert_eq!(registry.mark_unreachable(&reg.agent_id), vec![3]);
        assert!(!registry.is_dispatchable(&reg.agent_id));
        assert!(registry.expired(now + 5000, 1000).is_empty());
        assert_eq!(registry.list()[0].state, AgentState::Unreachable);
    }

    #[test]
    fn test_resolve_by_address() {
        let mut registry = AgentRegistry::new();
        let reg = registry.register("node-a:9000", channel());
        assert_eq!(registry.resolve("node-a:9000"), Some(reg.agent_id.as_str()));
        assert_eq!(registry.resolve(&reg.agent_id), Some(reg.agent_id.as_str()));
        assert_eq!(registry.resolve("node-b:9000"), None);
    }
}
