//! Cmdlet 执行
//!
//! 每个 cmdlet 一个任务，action 按声明顺序依次执行。某个 action 失败后，
//! 其余 action 直接以失败上报，不再执行。

use crate::actions::{ActionContext, ActionRegistry};
use smart_types::{ActionStatusReport, LaunchCmdlet};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, watch, Mutex};
use tracing::{debug, info, warn};

pub const SKIPPED_MESSAGE: &str = "Skipped due to failure of a previous action";
pub const CANCELLED_MESSAGE: &str = "Cancelled";

#[derive(Clone)]
pub struct CmdletExecutor {
    registry: Arc<ActionRegistry>,
    reports: mpsc::UnboundedSender<ActionStatusReport>,
    running: Arc<Mutex<HashMap<i64, watch::Sender<bool>>>>,
}

impl CmdletExecutor {
    pub fn new(registry: Arc<ActionRegistry>, reports: mpsc::UnboundedSender<ActionStatusReport>) -> Self {
        Self {
            registry,
            reports,
            running: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// 启动 cmdlet，已在执行的重复下发被忽略
    pub async fn launch(&self, launch: LaunchCmdlet) -> bool {
        let cmdlet_id = launch.cmdlet_id;
        let stop_rx = {
            let mut running = self.running.lock().await;
            if running.contains_key(&cmdlet_id) {
                debug!(cmdlet_id, "Cmdlet already running, ignoring launch");
                return false;
            }
            let (stop_tx, stop_rx) = watch::channel(false);
            running.insert(cmdlet_id, stop_tx);
            stop_rx
        };

        info!(cmdlet_id, actions = launch.actions.len(), owner = %launch.owner, "Launching cmdlet");
        let executor = self.clone();
        tokio::spawn(async move {
            executor.execute(launch, stop_rx).await;
            executor.running.lock().await.remove(&cmdlet_id);
        });
        true
    }

    /// 请求停止，action 在下一个 await 点结束
    pub async fn stop(&self, cmdlet_id: i64) -> bool {
        match self.running.lock().await.get(&cmdlet_id) {
            Some(stop) => {
                info!(cmdlet_id, "Stopping cmdlet");
                let _ = stop.send(true);
                true
            }
            None => false,
        }
    }

    pub async fn stop_all(&self) {
        for stop in self.running.lock().await.values() {
            let _ = stop.send(true);
        }
    }

    pub async fn running_count(&self) -> usize {
        self.running.lock().await.len()
    }

    async fn execute(&self, launch: LaunchCmdlet, mut stop: watch::Receiver<bool>) {
        let cmdlet_id = launch.cmdlet_id;
        let mut skip_reason: Option<&str> = None;

        for descriptor in launch.actions {
            let action_id = descriptor.action_id;
            if skip_reason.is_none() && *stop.borrow() {
                skip_reason = Some(CANCELLED_MESSAGE);
            }
            if let Some(reason) = skip_reason {
                self.report(ActionStatusReport::failed(cmdlet_id, action_id, reason));
                continue;
            }

            let Some(action) = self.registry.get(&descriptor.name) else {
                warn!(cmdlet_id, action = %descriptor.name, "Unknown action");
                self.report(ActionStatusReport::failed(
                    cmdlet_id,
                    action_id,
                    format!("Action '{}' not supported", descriptor.name),
                ));
                skip_reason = Some(SKIPPED_MESSAGE);
                continue;
            };

            self.report(ActionStatusReport::progress(cmdlet_id, action_id, 0.0));
            let ctx = ActionContext::new(cmdlet_id, action_id, descriptor.args, self.reports.clone());
            let result = tokio::select! {
                result = action.execute(&ctx) => Some(result),
                _ = stopped(&mut stop) => None,
            };

            match result {
                Some(Ok(output)) => {
                    debug!(cmdlet_id, action_id, action = %descriptor.name, "Action done");
                    let output = (!output.is_empty()).then_some(output);
                    self.report(ActionStatusReport::done(cmdlet_id, action_id, output));
                }
                Some(Err(e)) => {
                    warn!(cmdlet_id, action_id, action = %descriptor.name, error = %e, "Action failed");
                    self.report(ActionStatusReport::failed(cmdlet_id, action_id, e.to_string()));
                    skip_reason = Some(SKIPPED_MESSAGE);
                }
                None => {
                    self.report(ActionStatusReport::failed(cmdlet_id, action_id, CANCELLED_MESSAGE));
                    skip_reason = Some(CANCELLED_MESSAGE);
                }
            }
        }
        info!(cmdlet_id, "Cmdlet execution finished");
    }

    fn report(&self, report: ActionStatusReport) {
        if self.reports.send(report).is_err() {
            warn!("Status report channel closed");
        }
    }
}

/// 等待停止信号
async fn stopped(stop: &mut watch::Receiver<bool>) {
    loop {
        let is_stopped = *stop.borrow();
        if is_stopped {
            return;
        }
        if stop.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}
