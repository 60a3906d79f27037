use serde::{Deserialize, Serialize};
use std::time::Duration;

/// 注册重试的退避策略
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackoffPolicy {
    #[default]
    Fixed,
    Exponential,
}

/// Agent 运行参数
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// 按优先顺序排列的 master 地址
    pub masters: Vec<String>,

    /// 本 agent 对外地址，master 据此复用 agent ID
    pub address: String,

    pub backoff: BackoffPolicy,
    pub retry_interval: Duration,
    pub max_retry_interval: Duration,

    /// 超过此时间仍未注册成功则退出
    pub register_timeout: Duration,

    pub heartbeat_interval: Duration,

    /// 状态上报的批量发送间隔
    pub report_interval: Duration,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            masters: vec!["127.0.0.1:7042".to_string()],
            address: "127.0.0.1:7043".to_string(),
            backoff: BackoffPolicy::Fixed,
            retry_interval: Duration::from_millis(2000),
            max_retry_interval: Duration::from_millis(30_000),
            register_timeout: Duration::from_millis(30_000),
            heartbeat_interval: Duration::from_millis(3000),
            report_interval: Duration::from_millis(500),
        }
    }
}
