use serde::{Deserialize, Serialize};
use smart_types::DispatchPolicy;
use std::time::Duration;

/// 调度器参数
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// 超过此时间没有心跳的 agent 被标记为不可达
    pub heartbeat_timeout: Duration,

    /// 存活检查间隔
    pub liveness_check_interval: Duration,

    /// 下发后等待 CmdletAck 的时间
    pub dispatch_ack_timeout: Duration,

    /// 调度循环间隔
    pub schedule_interval: Duration,

    pub max_pending_cmdlets: usize,

    pub max_cmdlets_per_agent: usize,

    /// 重新下发超过此次数的 cmdlet 置为 FAILED
    pub max_redeliveries: u32,

    pub purge_interval: Duration,

    /// 保留的已结束 cmdlet 数量
    pub keep_finished_cmdlets: usize,

    pub dispatch_policy: DispatchPolicy,

    /// 调用调度器的请求超时
    pub request_timeout: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            heartbeat_timeout: Duration::from_millis(15_000),
            liveness_check_interval: Duration::from_millis(5_000),
            dispatch_ack_timeout: Duration::from_millis(5_000),
            schedule_interval: Duration::from_millis(50),
            max_pending_cmdlets: 1000,
            max_cmdlets_per_agent: 16,
            max_redeliveries: 3,
            purge_interval: Duration::from_millis(5_000),
            keep_finished_cmdlets: 1000,
            dispatch_policy: DispatchPolicy::Any,
            request_timeout: Duration::from_secs(10),
        }
    }
}
