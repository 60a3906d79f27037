use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Action 状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActionState {
    Pending,
    Running,
    Done,
    Failed,
}

impl ActionState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ActionState::Done | ActionState::Failed)
    }
}

/// Action 信息
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionInfo {
    pub id: i64,
    pub cmdlet_id: i64,
    pub action_name: String,
    pub args: BTreeMap<String, String>,
    pub state: ActionState,

    /// 进度，范围 [0, 1]，只增不减
    pub progress: f32,

    pub result: String,
    pub log: String,
    pub create_time: i64,
    pub finish_time: Option<i64>,
}

impl ActionInfo {
    pub fn new(
        id: i64,
        cmdlet_id: i64,
        action_name: impl Into<String>,
        args: BTreeMap<String, String>,
    ) -> Self {
        Self {
            id,
            cmdlet_id,
            action_name: action_name.into(),
            args,
            state: ActionState::Pending,
            progress: 0.0,
            result: String::new(),
            log: String::new(),
            create_time: crate::now_millis(),
            finish_time: None,
        }
    }

    /// 更新进度，回退的进度会被忽略
    pub fn update_progress(&mut self, progress: f32) {
        let progress = if progress.is_nan() { 0.0 } else { progress.clamp(0.0, 1.0) };
        if progress > self.progress {
            self.progress = progress;
        }
    }

    /// 重新下发前恢复初始状态
    pub fn reset(&mut self) {
        self.state = ActionState::Pending;
        self.progress = 0.0;
        self.result.clear();
        self.log.clear();
        self.finish_time = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_progress_is_monotonic_and_clamped() {
        let mut action = ActionInfo::new(1, 1, "echo", BTreeMap::new());
        action.update_progress(0.5);
        action.update_progress(0.3);
        assert_eq!(action.progress, 0.5);

        action.update_progress(7.0);
        assert_eq!(action.progress, 1.0);

        action.update_progress(f32::NAN);
        assert_eq!(action.progress, 1.0);
    }

    #[test]
    fn test_reset() {
        let mut action = ActionInfo::new(1, 1, "echo", BTreeMap::new());
        action.state = ActionState::Failed;
        action.update_progress(0.8);
        action.log.push_str("boom");
        action.reset();

        assert_eq!(action.state, ActionState::Pending);
        assert_eq!(action.progress, 0.0);
        assert!(action.log.is_empty());
    }
}
