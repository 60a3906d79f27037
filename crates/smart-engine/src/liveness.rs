use crate::handle::SchedulerHandle;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::interval;
use tracing::{info, warn};

/// Agent 存活监控
///
/// 定期让调度器检查心跳超时，超时的 agent 被标记为不可达，其 cmdlet 重新下发。
pub struct LivenessMonitor {
    scheduler: SchedulerHandle,
    check_interval: Duration,
    running: Arc<RwLock<bool>>,
}

impl LivenessMonitor {
    pub fn new(scheduler: SchedulerHandle, check_interval: Duration) -> Self {
        Self {
            scheduler,
            check_interval,
            running: Arc::new(RwLock::new(false)),
        }
    }

    /// 启动后台检查任务
    pub async fn start(&self) {
        let mut running = self.running.write().await;
        if *running {
            warn!("Liveness monitor is already running");
            return;
        }
        *running = true;
        drop(running);

        info!(check_interval = ?self.check_interval, "Liveness monitor started");

        let scheduler = self.scheduler.clone();
        let running = self.running.clone();
        let check_interval = self.check_interval;

        tokio::spawn(async move {
            let mut ticker = interval(check_interval);
            loop {
                ticker.tick().await;
                if !*running.read().await {
                    info!("Liveness monitor stopped");
                    break;
                }
                if let Err(e) = scheduler.check_liveness().await {
                    warn!(error = %e, "Liveness check failed, stopping monitor");
                    break;
                }
            }
        });
    }

    pub async fn stop(&self) {
        *self.running.write().await = false;
        info!("Liveness monitor stopping...");
    }

    pub async fn is_running(&self) -> bool {
        *self.running.read().await
    }
}
