use std::collections::HashMap;

/// 规则 cmdlet 去重
///
/// 同一规则的同一 cmdlet 字符串在结束之前只保留一个。
#[derive(Debug, Default)]
pub struct RuleCmdletTracker {
    by_key: HashMap<(i64, String), i64>,
    by_cmdlet: HashMap<i64, (i64, String)>,
}

impl RuleCmdletTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn find(&self, rule_id: i64, cmdlet: &str) -> Option<i64> {
        self.by_key.get(&(rule_id, cmdlet.to_string())).copied()
    }

    pub fn track(&mut self, rule_id: i64, cmdlet: impl Into<String>, cmdlet_id: i64) {
        let key = (rule_id, cmdlet.into());
        self.by_cmdlet.insert(cmdlet_id, key.clone());
        self.by_key.insert(key, cmdlet_id);
    }

    pub fn untrack(&mut self, cmdlet_id: i64) {
        if let Some(key) = self.by_cmdlet.remove(&cmdlet_id) {
            self.by_key.remove(&key);
        }
    }

    pub fn len(&self) -> usize {
        self.by_cmdlet.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_cmdlet.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_track_and_untrack() {
        let mut tracker = RuleCmdletTracker::new();
        tracker.track(1, "sync -file /a", 10);
        assert_eq!(tracker.find(1, "sync -file /a"), Some(10));
        assert_eq!(tracker.find(2, "sync -file /a"), None);

        tracker.untrack(10);
        assert_eq!(tracker.find(1, "sync -file /a"), None);
        assert!(tracker.is_empty());

        tracker.untrack(10);
        assert_eq!(tracker.len(), 0);
    }
}
