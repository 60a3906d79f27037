use serde::{Deserialize, Serialize};
use smart_types::CmdletState;
use std::sync::Arc;
use tokio::sync::broadcast;

/// 规则与 cmdlet 生命周期事件
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event")]
pub enum LifecycleEvent {
    RuleAdded { rule_id: i64 },
    RuleStateChanged { rule_id: i64, state: smart_types::RuleState },
    RuleDeleted { rule_id: i64 },
    CmdletAdded { cmdlet_id: i64, rule_id: Option<i64>, owner: String },
    CmdletStateChanged { cmdlet_id: i64, state: CmdletState },
    CmdletStopped { cmdlet_id: i64 },
    CmdletDeleted { cmdlet_id: i64 },
}

/// 生命周期事件总线
///
/// 旁路通知，不保证与持久化之间的先后顺序。没有订阅者时事件直接丢弃。
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<LifecycleEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.sender.subscribe()
    }

    /// 发布事件，返回收到事件的订阅者数量
    pub fn publish(&self, event: LifecycleEvent) -> usize {
        self.sender.send(event).unwrap_or(0)
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1024)
    }
}

pub type SharedEventBus = Arc<EventBus>;
