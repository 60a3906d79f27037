use super::dao::FileAccessPartitionDao;
use super::retention::RetentionPolicyExecutor;
use chrono::{Datelike, Months, NaiveDate};
use smart_core::{Result, SmartError};
use std::sync::Arc;
use tracing::debug;

/// 分区管理
pub struct FileAccessPartitionManager {
    dao: Arc<dyn FileAccessPartitionDao>,
    retention: Arc<dyn RetentionPolicyExecutor>,
}

impl FileAccessPartitionManager {
    pub fn new(
        dao: Arc<dyn FileAccessPartitionDao>,
        retention: Arc<dyn RetentionPolicyExecutor>,
    ) -> Self {
        Self { dao, retention }
    }

    /// 创建当前月与下个月的分区
    pub async fn create_new_partitions(&self) -> Result<()> {
        self.create_partitions_for(chrono::Local::now().date_naive()).await
    }

    pub async fn create_partitions_for(&self, today: NaiveDate) -> Result<()> {
        let current = today
            .with_day(1)
            .ok_or_else(|| SmartError::Internal(format!("Invalid date {}", today)))?;
        let next = current
            .checked_add_months(Months::new(1))
            .ok_or_else(|| SmartError::Internal(format!("Date overflow after {}", current)))?;

        for date in [current, next] {
            let created = self.dao.create(date).await?;
            debug!(date = %date, created = created, "File access partition ensured");
        }
        Ok(())
    }

    pub async fn remove_old_partitions(&self) -> Result<()> {
        self.retention.cleanup().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::partition::dao::{partition_name, SqlFileAccessPartitionDao};
    use crate::partition::retention::MonthCountRetentionPolicy;
    use crate::store::test_support::create_test_store;

    async fn manager() -> (Arc<SqlFileAccessPartitionDao>, FileAccessPartitionManager) {
        let store = create_test_store().await;
        let dao = Arc::new(SqlFileAccessPartitionDao::new(store.connection().clone()));
        let retention = Arc::new(MonthCountRetentionPolicy::new(dao.clone(), 2));
        (dao.clone(), FileAccessPartitionManager::new(dao, retention))
    }

    #[tokio::test]
    async fn test_create_partitions() {
        let (dao, manager) = manager().await;
        let today = NaiveDate::from_ymd_opt(2024, 12, 17).unwrap();
        manager.create_partitions_for(today).await.unwrap();
        // 重复创建不报错
        manager.create_partitions_for(today).await.unwrap();

        let names: Vec<_> = dao.get_all().await.unwrap().into_iter().map(|p| p.name).collect();
        assert_eq!(
            names,
            vec![
                partition_name(NaiveDate::from_ymd_opt(2024, 12, 1).unwrap()),
                partition_name(NaiveDate::from_ymd_opt(2025, 1, 1).unwrap()),
            ]
        );
    }

    #[tokio::test]
    async fn test_remove_old_partitions_keeps_recent() {
        let (dao, manager) = manager().await;
        for month in [3, 4, 5] {
            dao.create(NaiveDate::from_ymd_opt(2024, month, 1).unwrap())
                .await
                .unwrap();
        }
        manager
            .create_partitions_for(NaiveDate::from_ymd_opt(2024, 6, 3).unwrap())
            .await
            .unwrap();
        manager.remove_old_partitions().await.unwrap();

        let months: Vec<_> = dao
            .get_all()
            .await
            .unwrap()
            .into_iter()
            .map(|p| p.date.month())
            .collect();
        assert_eq!(months, vec![5, 6, 7]);
    }
}
