//! Action 执行约定与注册表

mod builtin;

pub use builtin::{EchoAction, FailAction, SleepAction};

use async_trait::async_trait;
use smart_core::Result;
use smart_types::ActionStatusReport;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::info;

/// 单个 action 的执行上下文
pub struct ActionContext {
    pub cmdlet_id: i64,
    pub action_id: i64,
    pub args: BTreeMap<String, String>,
    reports: mpsc::UnboundedSender<ActionStatusReport>,
}

impl ActionContext {
    pub fn new(
        cmdlet_id: i64,
        action_id: i64,
        args: BTreeMap<String, String>,
        reports: mpsc::UnboundedSender<ActionStatusReport>,
    ) -> Self {
        Self {
            cmdlet_id,
            action_id,
            args,
            reports,
        }
    }

    pub fn arg(&self, key: &str) -> Option<&str> {
        self.args.get(key).map(|v| v.as_str())
    }

    /// 上报进度，范围 [0, 1]
    pub fn report_progress(&self, progress: f32) {
        let _ = self
            .reports
            .send(ActionStatusReport::progress(self.cmdlet_id, self.action_id, progress));
    }
}

/// 可执行的 action
///
/// 返回值作为 action 结果上报；执行在 await 点可能被取消。
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Action: Send + Sync {
    async fn execute(&self, ctx: &ActionContext) -> Result<String>;
}

/// 名称到 action 实现的映射
#[derive(Clone, Default)]
pub struct ActionRegistry {
    actions: HashMap<String, Arc<dyn Action>>,
}

impl ActionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 包含内置 action：echo、sleep、fail
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        registry.register("echo", Arc::new(EchoAction));
        registry.register("sleep", Arc::new(SleepAction));
        registry.register("fail", Arc::new(FailAction));
        registry
    }

    pub fn register(&mut self, name: &str, action: Arc<dyn Action>) {
        info!(action = %name, "Registering action");
        self.actions.insert(name.to_string(), action);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Action>> {
        self.actions.get(name).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.actions.keys().cloned().collect();
        names.sort();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_registry() {
        let registry = ActionRegistry::with_builtin();
        assert_eq!(registry.names(), vec!["echo", "fail", "sleep"]);
        assert!(registry.get("echo").is_some());
        assert!(registry.get("copy").is_none());
    }

    #[tokio::test]
    async fn test_register_custom_action() {
        let mut action = MockAction::new();
        action
            .expect_execute()
            .returning(|ctx| Ok(format!("copied {}", ctx.arg("-file").unwrap_or_default())));

        let mut registry = ActionRegistry::new();
        registry.register("copy", Arc::new(action));

        let (tx, _rx) = mpsc::unbounded_channel();
        let ctx = ActionContext::new(
            1,
            2,
            BTreeMap::from([("-file".to_string(), "/a".to_string())]),
            tx,
        );
        let result = registry.get("copy").unwrap().execute(&ctx).await.unwrap();
        assert_eq!(result, "copied /a");
    }

    #[tokio::test]
    async fn test_progress_report() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let ctx = ActionContext::new(1, 2, BTreeMap::new(), tx);
        ctx.report_progress(0.25);
        let report = rx.recv().await.unwrap();
        assert_eq!(report.action_id, 2);
        assert_eq!(report.progress, 0.25);
    }
}
