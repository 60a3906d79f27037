use smart_core::audit::{AuditEvent, AuditLog, AuditObject, AuditOperation, AuditResult};
use smart_core::bus::{LifecycleEvent, SharedEventBus};
use std::collections::HashMap;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// 把 cmdlet 生命周期事件写入审计日志
pub struct CmdletAuditListener {
    log: AuditLog,
    /// cmdlet -> owner，停止和删除事件不带用户
    owners: HashMap<i64, String>,
}

impl CmdletAuditListener {
    pub fn new(log: AuditLog) -> Self {
        Self {
            log,
            owners: HashMap::new(),
        }
    }

    /// 订阅事件总线并在后台记录
    pub fn spawn(mut self, bus: &SharedEventBus) -> JoinHandle<()> {
        let mut events = bus.subscribe();
        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(event) => self.on_event(event).await,
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Cmdlet audit listener lagged behind");
                    }
                    Err(RecvError::Closed) => {
                        debug!("Event bus closed, cmdlet audit listener exiting");
                        break;
                    }
                }
            }
        })
    }

    async fn on_event(&mut self, event: LifecycleEvent) {
        let (cmdlet_id, operation, username) = match event {
            LifecycleEvent::CmdletAdded { cmdlet_id, owner, .. } => {
                self.owners.insert(cmdlet_id, owner.clone());
                (cmdlet_id, AuditOperation::Create, owner)
            }
            LifecycleEvent::CmdletStopped { cmdlet_id } => {
                (cmdlet_id, AuditOperation::Stop, self.owner_of(cmdlet_id))
            }
            LifecycleEvent::CmdletDeleted { cmdlet_id } => {
                let owner = self.owners.remove(&cmdlet_id).unwrap_or_default();
                (cmdlet_id, AuditOperation::Delete, owner)
            }
            _ => return,
        };

        self.log
            .record(AuditEvent {
                username,
                timestamp: smart_types::now_millis(),
                object_type: AuditObject::Cmdlet,
                object_id: Some(cmdlet_id),
                operation,
                result: AuditResult::Success,
                error: None,
            })
            .await;
    }

    fn owner_of(&self, cmdlet_id: i64) -> String {
        self.owners.get(&cmdlet_id).cloned().unwrap_or_default()
    }
}
