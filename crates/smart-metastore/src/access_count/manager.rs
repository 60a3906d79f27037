use crate::transaction::in_transaction;
use async_trait::async_trait;
use sea_orm::{ConnectionTrait, DatabaseConnection, Statement};
use smart_core::Result;
use smart_types::AggregatedAccessCounts;
use std::collections::HashMap;
use tracing::{debug, error};

/// 访问计数持久化
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AccessCountSaver: Send + Sync {
    async fn save(&self, counts: &[AggregatedAccessCounts]) -> Result<()>;
}

/// 写入 file_access 并刷新 cached_file 的访问统计
pub struct FileAccessManager {
    db: DatabaseConnection,
}

impl FileAccessManager {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }
}

/// 按文件 ID 合并
fn merge_by_file(counts: &[AggregatedAccessCounts]) -> Vec<AggregatedAccessCounts> {
    let mut merged: HashMap<i64, AggregatedAccessCounts> = HashMap::new();
    for count in counts {
        merged
            .entry(count.file_id)
            .and_modify(|c| *c = c.merge(*count))
            .or_insert(*count);
    }
    merged.into_values().collect()
}

#[async_trait]
impl AccessCountSaver for FileAccessManager {
    async fn save(&self, counts: &[AggregatedAccessCounts]) -> Result<()> {
        if counts.is_empty() {
            return Ok(());
        }

        let backend = self.db.get_database_backend();
        let inserts: Vec<String> = counts
            .iter()
            .map(|c| {
                format!(
                    "INSERT INTO file_access (fid, count, access_time) VALUES ({}, {}, {})",
                    c.file_id, c.count, c.last_accessed
                )
            })
            .collect();
        let updates: Vec<String> = merge_by_file(counts)
            .iter()
            .map(|c| {
                format!(
                    "UPDATE cached_file SET num_accessed = num_accessed + {}, \
                     last_access_time = CASE WHEN last_access_time > {} THEN last_access_time ELSE {} END \
                     WHERE fid = {}",
                    c.count, c.last_accessed, c.last_accessed, c.file_id
                )
            })
            .collect();

        let result = in_transaction(&self.db, |txn| {
            Box::pin(async move {
                for sql in inserts {
                    txn.execute(Statement::from_string(backend, sql)).await?;
                }
                for sql in updates {
                    txn.execute(Statement::from_string(backend, sql)).await?;
                }
                Ok(())
            })
        })
        .await;

        match &result {
            Ok(()) => debug!(count = counts.len(), "Access counts saved"),
            Err(e) => error!(error = %e, "Failed to save access counts"),
        }
        result
    }
}
