use serde::{Deserialize, Serialize};

/// 规则状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RuleState {
    New,
    Active,
    Paused,
    Finished,
    Deleted,
}

impl RuleState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RuleState::Finished | RuleState::Deleted)
    }
}

/// 规则信息
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleInfo {
    /// 规则 ID
    pub id: i64,

    /// 规则原文
    pub text: String,

    /// 状态
    pub state: RuleState,

    /// 提交时间（毫秒）
    pub submit_time: i64,

    /// 最近一次检查时间
    pub last_check_time: Option<i64>,

    /// 已检查次数
    pub num_checked: u64,

    /// 已生成的 cmdlet 数量
    pub num_cmdlets_generated: u64,
}

impl RuleInfo {
    pub fn new(id: i64, text: impl Into<String>, state: RuleState) -> Self {
        Self {
            id,
            text: text.into(),
            state,
            submit_time: crate::now_millis(),
            last_check_time: None,
            num_checked: 0,
            num_cmdlets_generated: 0,
        }
    }

    /// 累加一次检查的统计
    pub fn record_check(&mut self, check_time: i64, cmdlets_generated: u64) {
        self.last_check_time = Some(check_time);
        self.num_checked += 1;
        self.num_cmdlets_generated += cmdlets_generated;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_check_accumulates() {
        let mut rule = RuleInfo::new(1, "file: path matches \"/a/*\" | cache", RuleState::Active);
        rule.record_check(100, 0);
        rule.record_check(200, 3);

        assert_eq!(rule.num_checked, 2);
        assert_eq!(rule.num_cmdlets_generated, 3);
        assert_eq!(rule.last_check_time, Some(200));
    }

    #[test]
    fn test_rule_state_serde() {
        let json = serde_json::to_string(&RuleState::Paused).unwrap();
        assert_eq!(json, "\"PAUSED\"");
        assert!(RuleState::Deleted.is_terminal());
        assert!(!RuleState::Active.is_terminal());
    }
}
