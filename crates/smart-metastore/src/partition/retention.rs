use super::dao::FileAccessPartitionDao;
use async_trait::async_trait;
use smart_core::Result;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

pub const MONTH_COUNT: &str = "month_count";

/// 分区保留策略
#[async_trait]
pub trait RetentionPolicyExecutor: Send + Sync {
    async fn cleanup(&self) -> Result<()>;
}

/// 按月份数保留
///
/// 保留最近 `retention_count + 1` 个分区（含当前月），其余按从旧到新删除。
pub struct MonthCountRetentionPolicy {
    dao: Arc<dyn FileAccessPartitionDao>,
    retention_count: i32,
}

impl MonthCountRetentionPolicy {
    pub fn new(dao: Arc<dyn FileAccessPartitionDao>, retention_count: i32) -> Self {
        Self {
            dao,
            retention_count,
        }
    }
}

#[async_trait]
impl RetentionPolicyExecutor for MonthCountRetentionPolicy {
    async fn cleanup(&self) -> Result<()> {
        if self.retention_count <= 0 {
            warn!(
                retention_count = self.retention_count,
                "Non-positive partition retention count, skipping cleanup"
            );
            return Ok(());
        }

        let partitions = self.dao.get_all().await?;
        let keep = self.retention_count as usize + 1;
        if partitions.len() <= keep {
            debug!(partitions = partitions.len(), "No redundant file access partitions");
            return Ok(());
        }

        let redundant = partitions.len() - keep;
        for partition in &partitions[..redundant] {
            self.dao.remove(partition).await?;
        }
        Ok(())
    }
}

type RetentionFactory =
    Box<dyn Fn(Arc<dyn FileAccessPartitionDao>, i32) -> Arc<dyn RetentionPolicyExecutor> + Send + Sync>;

/// 按名称创建保留策略，未知名称回落到 `month_count`
pub struct RetentionPolicyRegistry {
    factories: HashMap<String, RetentionFactory>,
}

impl RetentionPolicyRegistry {
    pub fn new() -> Self {
        let mut registry = Self {
            factories: HashMap::new(),
        };
        registry.register(MONTH_COUNT, |dao, count| {
            Arc::new(MonthCountRetentionPolicy::new(dao, count))
        });
        registry
    }

    pub fn register<F>(&mut self, name: &str, factory: F)
    where
        F: Fn(Arc<dyn FileAccessPartitionDao>, i32) -> Arc<dyn RetentionPolicyExecutor>
            + Send
            + Sync
            + 'static,
    {
        self.factories.insert(name.to_string(), Box::new(factory));
    }

    pub fn create(
        &self,
        name: &str,
        dao: Arc<dyn FileAccessPartitionDao>,
        retention_count: i32,
    ) -> Arc<dyn RetentionPolicyExecutor> {
        match self.factories.get(name) {
            Some(factory) => factory(dao, retention_count),
            None => {
                warn!(policy = %name, default = MONTH_COUNT, "Unknown retention policy, using default");
                Arc::new(MonthCountRetentionPolicy::new(dao, retention_count))
            }
        }
    }
}

impl Default for RetentionPolicyRegistry {
    fn default() -> Self {
        Self::new()
    }
}
