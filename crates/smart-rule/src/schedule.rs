use serde::{Deserialize, Serialize};

/// 规则调度信息
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleInfo {
    pub start_time: i64,
    pub end_time: i64,
    /// 周期（毫秒），一次性规则为 0
    pub every: i64,
    /// `at` 形式，只执行一次
    pub once: bool,
}

impl ScheduleInfo {
    pub const FOR_EVER: i64 = i64::MAX;

    /// 未指定调度时的默认周期
    pub const DEFAULT_EVERY: i64 = 5000;

    pub fn periodic(every: i64, start_time: i64, end_time: i64) -> Self {
        Self {
            start_time,
            end_time,
            every,
            once: false,
        }
    }

    pub fn one_shot(at: i64) -> Self {
        Self {
            start_time: at,
            end_time: at,
            every: 0,
            once: true,
        }
    }

    pub fn is_one_shot(&self) -> bool {
        self.once || self.every <= 0
    }

    pub fn is_executable(&self, now: i64) -> bool {
        now >= self.start_time
    }

    /// 是否已经过了结束时间
    pub fn is_expired(&self, now: i64) -> bool {
        !self.once && self.end_time != Self::FOR_EVER && now > self.end_time
    }

    /// 本次检查之后是否还会有下一次检查
    pub fn has_next_after(&self, now: i64) -> bool {
        !self.is_one_shot() && now.saturating_add(self.every) <= self.end_time
    }

    /// 距首次检查的毫秒数，开始时间已过时对齐到周期边界
    pub fn first_delay(&self, now: i64) -> i64 {
        if now < self.start_time {
            return self.start_time - now;
        }
        if self.is_one_shot() {
            return 0;
        }
        self.every - now.rem_euclid(self.every)
    }
}

impl Default for ScheduleInfo {
    fn default() -> Self {
        Self::periodic(Self::DEFAULT_EVERY, 0, Self::FOR_EVER)
    }
}
