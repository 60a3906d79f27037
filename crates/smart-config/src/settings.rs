use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use smart_agent::{AgentConfig, BackoffPolicy};
use smart_engine::SchedulerConfig;
use smart_rule::FileCopyScheduleStrategy;
use smart_types::DispatchPolicy;
use std::time::Duration;

/// 完整配置
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct SmartConfig {
    pub master: MasterSettings,
    pub metastore: MetaStoreSettings,
    pub access_count: AccessCountSettings,
    pub partition: PartitionSettings,
    pub rule: RuleSettings,
    pub agent: AgentSettings,
    pub logging: LoggingSettings,
    pub metrics: MetricsSettings,
}

/// master 服务与调度器
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct MasterSettings {
    /// agent 连接的监听地址
    pub listen: String,
    pub heartbeat_timeout_ms: u64,
    pub liveness_check_interval_ms: u64,
    pub dispatch_ack_timeout_ms: u64,
    pub schedule_interval_ms: u64,
    pub max_pending_cmdlets: usize,
    pub max_cmdlets_per_agent: usize,
    pub max_redeliveries: u32,
    pub purge_interval_ms: u64,
    pub keep_finished_cmdlets: usize,
    pub dispatch_policy: DispatchPolicy,
    /// agent 建立连接后必须在此时间内注册
    pub register_timeout_ms: u64,
}

impl Default for MasterSettings {
    fn default() -> Self {
        Self {
            listen: "127.0.0.1:7042".to_string(),
            heartbeat_timeout_ms: 15_000,
            liveness_check_interval_ms: 5_000,
            dispatch_ack_timeout_ms: 5_000,
            schedule_interval_ms: 50,
            max_pending_cmdlets: 1000,
            max_cmdlets_per_agent: 16,
            max_redeliveries: 3,
            purge_interval_ms: 5_000,
            keep_finished_cmdlets: 1000,
            dispatch_policy: DispatchPolicy::Any,
            register_timeout_ms: 30_000,
        }
    }
}

impl MasterSettings {
    pub fn scheduler_config(&self) -> SchedulerConfig {
        SchedulerConfig {
            heartbeat_timeout: Duration::from_millis(self.heartbeat_timeout_ms),
            liveness_check_interval: Duration::from_millis(self.liveness_check_interval_ms),
            dispatch_ack_timeout: Duration::from_millis(self.dispatch_ack_timeout_ms),
            schedule_interval: Duration::from_millis(self.schedule_interval_ms),
            max_pending_cmdlets: self.max_pending_cmdlets,
            max_cmdlets_per_agent: self.max_cmdlets_per_agent,
            max_redeliveries: self.max_redeliveries,
            purge_interval: Duration::from_millis(self.purge_interval_ms),
            keep_finished_cmdlets: self.keep_finished_cmdlets,
            dispatch_policy: self.dispatch_policy,
            ..SchedulerConfig::default()
        }
    }

    pub fn register_timeout(&self) -> Duration {
        Duration::from_millis(self.register_timeout_ms)
    }

    pub fn liveness_check_interval(&self) -> Duration {
        Duration::from_millis(self.liveness_check_interval_ms)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct MetaStoreSettings {
    pub url: String,
}

impl Default for MetaStoreSettings {
    fn default() -> Self {
        Self {
            url: "sqlite::memory:".to_string(),
        }
    }
}

/// 访问计数采集与持久化
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AccessCountSettings {
    pub fetch_interval_ms: u64,
    pub queue_capacity: usize,
    /// `fail` 或 `save_failed_with_retry`
    pub failover: String,
    pub max_retries: u32,
}

impl Default for AccessCountSettings {
    fn default() -> Self {
        Self {
            fetch_interval_ms: 3_000,
            queue_capacity: 100_000,
            failover: "save_failed_with_retry".to_string(),
            max_retries: 3,
        }
    }
}

impl AccessCountSettings {
    pub fn fetch_interval(&self) -> Duration {
        Duration::from_millis(self.fetch_interval_ms)
    }
}

/// 访问记录分区，cron 表达式带秒字段
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PartitionSettings {
    pub retention_policy: String,
    pub retention_count: i32,
    pub create_cron: String,
    pub cleanup_cron: String,
}

impl Default for PartitionSettings {
    fn default() -> Self {
        Self {
            retention_policy: "month_count".to_string(),
            retention_count: 6,
            create_cron: "0 0 0 * * *".to_string(),
            cleanup_cron: "0 30 0 * * *".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RuleSettings {
    /// 同步规则的复制顺序：`unordered`、`fifo`、`lifo`
    pub copy_schedule_strategy: String,
}

impl Default for RuleSettings {
    fn default() -> Self {
        Self {
            copy_schedule_strategy: "fifo".to_string(),
        }
    }
}

impl RuleSettings {
    pub fn copy_strategy(&self) -> Result<FileCopyScheduleStrategy> {
        FileCopyScheduleStrategy::of(&self.copy_schedule_strategy).map_err(|e| anyhow!(e))
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AgentSettings {
    /// 按优先顺序排列
    pub masters: Vec<String>,
    pub address: String,
    pub backoff: BackoffPolicy,
    pub retry_interval_ms: u64,
    pub max_retry_interval_ms: u64,
    pub register_timeout_ms: u64,
    pub heartbeat_interval_ms: u64,
    pub report_interval_ms: u64,
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            masters: vec!["127.0.0.1:7042".to_string()],
            address: "127.0.0.1:7043".to_string(),
            backoff: BackoffPolicy::Fixed,
            retry_interval_ms: 2_000,
            max_retry_interval_ms: 30_000,
            register_timeout_ms: 30_000,
            heartbeat_interval_ms: 3_000,
            report_interval_ms: 500,
        }
    }
}

impl AgentSettings {
    pub fn agent_config(&self) -> AgentConfig {
        AgentConfig {
            masters: self.masters.clone(),
            address: self.address.clone(),
            backoff: self.backoff,
            retry_interval: Duration::from_millis(self.retry_interval_ms),
            max_retry_interval: Duration::from_millis(self.max_retry_interval_ms),
            register_timeout: Duration::from_millis(self.register_timeout_ms),
            heartbeat_interval: Duration::from_millis(self.heartbeat_interval_ms),
            report_interval: Duration::from_millis(self.report_interval_ms),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingSettings {
    pub level: String,
    pub format: LogFormat,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct MetricsSettings {
    /// Prometheus 导出地址，不配置则不导出
    pub listen: Option<String>,
}

fn non_zero(name: &str, value: u64) -> Result<()> {
    if value == 0 {
        return Err(anyhow!("{} must be greater than 0", name));
    }
    Ok(())
}

impl SmartConfig {
    /// 校验 master 角色所需的配置
    pub fn validate(&self) -> Result<()> {
        let master = &self.master;
        non_zero("master.heartbeat_timeout_ms", master.heartbeat_timeout_ms)?;
        non_zero("master.liveness_check_interval_ms", master.liveness_check_interval_ms)?;
        non_zero("master.dispatch_ack_timeout_ms", master.dispatch_ack_timeout_ms)?;
        non_zero("master.schedule_interval_ms", master.schedule_interval_ms)?;
        non_zero("master.purge_interval_ms", master.purge_interval_ms)?;
        non_zero("master.register_timeout_ms", master.register_timeout_ms)?;
        non_zero("master.max_pending_cmdlets", master.max_pending_cmdlets as u64)?;
        non_zero("master.max_cmdlets_per_agent", master.max_cmdlets_per_agent as u64)?;
        non_zero("access_count.fetch_interval_ms", self.access_count.fetch_interval_ms)?;
        non_zero("access_count.queue_capacity", self.access_count.queue_capacity as u64)?;

        if master.heartbeat_timeout_ms <= master.liveness_check_interval_ms {
            return Err(anyhow!(
                "heartbeat_timeout_ms ({}) must be greater than liveness_check_interval_ms ({})",
                master.heartbeat_timeout_ms,
                master.liveness_check_interval_ms
            ));
        }

        self.rule.copy_strategy()?;
        Ok(())
    }

    /// 校验 agent 角色所需的配置
    pub fn validate_agent(&self) -> Result<()> {
        let agent = &self.agent;
        if agent.masters.is_empty() {
            return Err(anyhow!("agent.masters must not be empty"));
        }
        non_zero("agent.retry_interval_ms", agent.retry_interval_ms)?;
        non_zero("agent.register_timeout_ms", agent.register_timeout_ms)?;
        non_zero("agent.heartbeat_interval_ms", agent.heartbeat_interval_ms)?;
        non_zero("agent.report_interval_ms", agent.report_interval_ms)?;

        if agent.max_retry_interval_ms < agent.retry_interval_ms {
            return Err(anyhow!(
                "max_retry_interval_ms ({}) cannot be less than retry_interval_ms ({})",
                agent.max_retry_interval_ms,
                agent.retry_interval_ms
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = SmartConfig::default();
        config.validate().unwrap();
        config.validate_agent().unwrap();
        assert_eq!(config.master.listen, "127.0.0.1:7042");
        assert_eq!(config.logging.format, LogFormat::Pretty);
        assert!(config.metrics.listen.is_none());
    }

    #[test]
    fn test_scheduler_config_conversion() {
        let mut settings = MasterSettings::default();
        settings.dispatch_ack_timeout_ms = 250;
        settings.max_redeliveries = 5;

        let scheduler = settings.scheduler_config();
        assert_eq!(scheduler.dispatch_ack_timeout, Duration::from_millis(250));
        assert_eq!(scheduler.heartbeat_timeout, Duration::from_secs(15));
        assert_eq!(scheduler.max_redeliveries, 5);
    }

    #[test]
    fn test_agent_config_conversion() {
        let settings = AgentSettings {
            masters: vec!["m1:7042".to_string(), "m2:7042".to_string()],
            backoff: BackoffPolicy::Exponential,
            ..AgentSettings::default()
        };
        let agent = settings.agent_config();
        assert_eq!(agent.masters, vec!["m1:7042", "m2:7042"]);
        assert_eq!(agent.backoff, BackoffPolicy::Exponential);
        assert_eq!(agent.register_timeout, Duration::from_secs(30));
    }

    #[test]
    fn test_heartbeat_must_exceed_liveness_interval() {
        let mut config = SmartConfig::default();
        config.master.heartbeat_timeout_ms = 5_000;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("heartbeat_timeout_ms"));
    }

    #[test]
    fn test_zero_interval_rejected() {
        let mut config = SmartConfig::default();
        config.master.schedule_interval_ms = 0;
        assert!(config.validate().is_err());

        let mut config = SmartConfig::default();
        config.agent.report_interval_ms = 0;
        assert!(config.validate_agent().is_err());
    }

    #[test]
    fn test_agent_requires_masters() {
        let mut config = SmartConfig::default();
        config.agent.masters.clear();
        assert!(config.validate_agent().is_err());
        // master 角色不关心
        config.validate().unwrap();
    }

    #[test]
    fn test_unknown_copy_strategy_rejected() {
        let mut config = SmartConfig::default();
        config.rule.copy_schedule_strategy = "random".to_string();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("Wrong file copy schedule strategy"));
    }
}
