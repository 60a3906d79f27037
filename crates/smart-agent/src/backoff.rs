use crate::config::BackoffPolicy;
use std::time::Duration;

/// 重试间隔
///
/// `Fixed` 每次相同；`Exponential` 从初始间隔开始翻倍，不超过上限。
#[derive(Debug, Clone)]
pub struct Backoff {
    policy: BackoffPolicy,
    initial: Duration,
    max: Duration,
    attempt: u32,
}

impl Backoff {
    pub fn new(policy: BackoffPolicy, initial: Duration, max: Duration) -> Self {
        Self {
            policy,
            initial,
            max: max.max(initial),
            attempt: 0,
        }
    }

    /// 下一次等待时间
    pub fn next_delay(&mut self) -> Duration {
        let delay = match self.policy {
            BackoffPolicy::Fixed => self.initial,
            BackoffPolicy::Exponential => {
                let factor = 2u32.saturating_pow(self.attempt);
                self.initial.saturating_mul(factor).min(self.max)
            }
        };
        self.attempt = self.attempt.saturating_add(1);
        delay
    }

    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    pub fn attempts(&self) -> u32 {
        self.attempt
    }
}
