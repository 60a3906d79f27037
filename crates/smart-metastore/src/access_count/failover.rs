//! 访问计数持久化失败处理
//!
//! - `fail`: 直接返回错误，丢弃本批数据
//! - `save_failed_with_retry`: 保留失败批次与下一批合并重试，连续失败超过上限后丢弃并返回错误

use super::manager::AccessCountSaver;
use async_trait::async_trait;
use smart_core::metrics::ACCESS_COUNT_FAILOVER_TOTAL;
use smart_core::{Result, SmartError};
use smart_types::AggregatedAccessCounts;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{error, warn};

pub const FAIL: &str = "fail";
pub const SAVE_FAILED_WITH_RETRY: &str = "save_failed_with_retry";

/// 一次持久化的上下文
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AccessCountContext {
    pub access_counts: Vec<AggregatedAccessCounts>,
}

impl AccessCountContext {
    pub fn new(access_counts: Vec<AggregatedAccessCounts>) -> Self {
        Self { access_counts }
    }
}

#[async_trait]
pub trait Failover: Send + Sync {
    async fn execute(&self, saver: &dyn AccessCountSaver, ctx: AccessCountContext) -> Result<()>;
}

/// 失败即报错
#[derive(Debug, Default)]
pub struct FailFailover;

#[async_trait]
impl Failover for FailFailover {
    async fn execute(&self, saver: &dyn AccessCountSaver, ctx: AccessCountContext) -> Result<()> {
        saver.save(&ctx.access_counts).await.map_err(|e| {
            metrics::counter!(ACCESS_COUNT_FAILOVER_TOTAL, 1, "policy" => FAIL);
            SmartError::PersistenceFailover(e.to_string())
        })
    }
}

#[derive(Debug, Default)]
struct RetryState {
    retained: Vec<AggregatedAccessCounts>,
    retries: u32,
}

/// 带累积的有限次重试
///
/// 保留批次与重试计数放在同一把锁里，二者总是一起重置。
#[derive(Debug)]
pub struct RetryFailover {
    max_retries: u32,
    state: Mutex<RetryState>,
}

impl RetryFailover {
    pub fn new(max_retries: u32) -> Self {
        Self {
            max_retries,
            state: Mutex::new(RetryState::default()),
        }
    }

    pub async fn retries(&self) -> u32 {
        self.state.lock().await.retries
    }

    pub async fn retained(&self) -> Vec<AggregatedAccessCounts> {
        self.state.lock().await.retained.clone()
    }
}

#[async_trait]
impl Failover for RetryFailover {
    async fn execute(&self, saver: &dyn AccessCountSaver, ctx: AccessCountContext) -> Result<()> {
        let mut state = self.state.lock().await;

        let mut batch = std::mem::take(&mut state.retained);
        batch.extend(ctx.access_counts);

        match saver.save(&batch).await {
            Ok(()) => {
                state.retries = 0;
                Ok(())
            }
            Err(e) => {
                metrics::counter!(ACCESS_COUNT_FAILOVER_TOTAL, 1, "policy" => SAVE_FAILED_WITH_RETRY);
                state.retries += 1;
                if state.retries > self.max_retries {
                    error!(
                        retries = state.retries,
                        dropped = batch.len(),
                        error = %e,
                        "Access count persistence retries exhausted, dropping batch"
                    );
                    state.retries = 0;
                    return Err(SmartError::PersistenceFailover(format!(
                        "Failed to save access counts after {} retries: {}",
                        self.max_retries, e
                    )));
                }
                warn!(
                    retries = state.retries,
                    retained = batch.len(),
                    error = %e,
                    "Failed to save access counts, retrying with next batch"
                );
                state.retained = batch;
                Ok(())
            }
        }
    }
}

/// failover 参数
#[derive(Debug, Clone, Copy)]
pub struct FailoverSettings {
    pub max_retries: u32,
}

impl Default for FailoverSettings {
    fn default() -> Self {
        Self { max_retries: 3 }
    }
}

type FailoverFactory = Box<dyn Fn(&FailoverSettings) -> Arc<dyn Failover> + Send + Sync>;

/// 按名称创建 failover，未知名称回落到默认策略
pub struct FailoverRegistry {
    factories: HashMap<String, FailoverFactory>,
    default_policy: String,
}

impl FailoverRegistry {
    pub fn new() -> Self {
        let mut registry = Self {
            factories: HashMap::new(),
            default_policy: SAVE_FAILED_WITH_RETRY.to_string(),
        };
        registry.register(FAIL, |_| Arc::new(FailFailover));
        registry.register(SAVE_FAILED_WITH_RETRY, |settings| {
            Arc::new(RetryFailover::new(settings.max_retries))
        });
        registry
    }

    pub fn register<F>(&mut self, name: &str, factory: F)
    where
        F: Fn(&FailoverSettings) -> Arc<dyn Failover> + Send + Sync + 'static,
    {
        self.factories.insert(name.to_string(), Box::new(factory));
    }

    pub fn create(&self, name: &str, settings: &FailoverSettings) -> Arc<dyn Failover> {
        let factory = self.factories.get(name).or_else(|| {
            warn!(policy = %name, default = %self.default_policy, "Unknown failover policy, using default");
            self.factories.get(&self.default_policy)
        });
        match factory {
            Some(factory) => factory(settings),
            None => Arc::new(RetryFailover::new(settings.max_retries)),
        }
    }
}

impl Default for FailoverRegistry {
    fn default() -> Self {
        Self::new()
    }
}
