use crate::store::sql_quote;
use crate::transaction::in_transaction;
use async_trait::async_trait;
use chrono::NaiveDate;
use sea_orm::{ConnectionTrait, DatabaseConnection, Statement};
use smart_core::{Result, SmartError};
use tracing::info;

const PARTITION_DATE_FORMAT: &str = "%Y-%m-%d";

/// 分区表名
pub fn partition_name(date: NaiveDate) -> String {
    format!("file_access_{}", date.format("%Y_%m_%d"))
}

/// 访问记录分区
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileAccessPartition {
    pub id: i64,
    pub name: String,
    pub date: NaiveDate,
}

impl FileAccessPartition {
    pub fn new(id: i64, name: impl Into<String>, date: NaiveDate) -> Self {
        Self {
            id,
            name: name.into(),
            date,
        }
    }
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait FileAccessPartitionDao: Send + Sync {
    /// 创建分区，已存在时返回 false
    async fn create(&self, date: NaiveDate) -> Result<bool>;

    /// 全部分区，按日期升序
    async fn get_all(&self) -> Result<Vec<FileAccessPartition>>;

    async fn remove(&self, partition: &FileAccessPartition) -> Result<()>;
}

pub struct SqlFileAccessPartitionDao {
    db: DatabaseConnection,
}

impl SqlFileAccessPartitionDao {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }
}

#[async_trait]
impl FileAccessPartitionDao for SqlFileAccessPartitionDao {
    async fn create(&self, date: NaiveDate) -> Result<bool> {
        let backend = self.db.get_database_backend();
        let name = partition_name(date);

        let existing = self
            .db
            .query_one(Statement::from_string(
                backend,
                format!(
                    "SELECT count(*) AS value FROM file_access_partition WHERE name = {}",
                    sql_quote(&name)
                ),
            ))
            .await?
            .map(|row| row.try_get::<i64>("", "value"))
            .transpose()?
            .unwrap_or(0);
        if existing > 0 {
            return Ok(false);
        }

        let create_table = format!(
            "CREATE TABLE IF NOT EXISTS {} (\
             fid BIGINT NOT NULL, count BIGINT NOT NULL, access_time BIGINT NOT NULL)",
            name
        );
        let register = format!(
            "INSERT INTO file_access_partition (name, partition_date) VALUES ({}, {})",
            sql_quote(&name),
            sql_quote(&date.format(PARTITION_DATE_FORMAT).to_string())
        );
        in_transaction(&self.db, |txn| {
            Box::pin(async move {
                txn.execute(Statement::from_string(backend, create_table)).await?;
                txn.execute(Statement::from_string(backend, register)).await?;
                Ok(())
            })
        })
        .await
        .map_err(|e| {
            SmartError::Internal(format!(
                "Failed to create new partition for file_access table: {}",
                e
            ))
        })?;

        info!(partition = %name, date = %date, "Created partition for file_access table");
        Ok(true)
    }

    async fn get_all(&self) -> Result<Vec<FileAccessPartition>> {
        let rows = self
            .db
            .query_all(Statement::from_string(
                self.db.get_database_backend(),
                "SELECT id, name, partition_date FROM file_access_partition \
                 ORDER BY partition_date ASC"
                    .to_string(),
            ))
            .await?;

        rows.iter()
            .map(|row| -> Result<FileAccessPartition> {
                let date: String = row.try_get("", "partition_date")?;
                let date = NaiveDate::parse_from_str(&date, PARTITION_DATE_FORMAT).map_err(|e| {
                    SmartError::Internal(format!("Invalid partition date '{}': {}", date, e))
                })?;
                Ok(FileAccessPartition::new(
                    row.try_get("", "id")?,
                    row.try_get::<String>("", "name")?,
                    date,
                ))
            })
            .collect()
    }

    async fn remove(&self, partition: &FileAccessPartition) -> Result<()> {
        let backend = self.db.get_database_backend();
        let drop_table = format!("DROP TABLE IF EXISTS {}", partition.name);
        let unregister = format!("DELETE FROM file_access_partition WHERE id = {}", partition.id);
        in_transaction(&self.db, |txn| {
            Box::pin(async move {
                txn.execute(Statement::from_string(backend, drop_table)).await?;
                txn.execute(Statement::from_string(backend, unregister)).await?;
                Ok(())
            })
        })
        .await?;

        info!(partition = %partition.name, "Dropped file access partition");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::test_support::create_test_store;
    use crate::MetaStore;

    fn date(y: i32, m: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, 1).unwrap()
    }

    #[test]
    fn test_partition_name() {
        assert_eq!(partition_name(date(2024, 7)), "file_access_2024_07_01");
    }

    #[tokio::test]
    async fn test_create_list_remove() {
        let store = create_test_store().await;
        let dao = SqlFileAccessPartitionDao::new(store.connection().clone());

        assert!(dao.create(date(2024, 9)).await.unwrap());
        assert!(dao.create(date(2024, 8)).await.unwrap());
        assert!(!dao.create(date(2024, 9)).await.unwrap());

        let partitions = dao.get_all().await.unwrap();
        let names: Vec<_> = partitions.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["file_access_2024_08_01", "file_access_2024_09_01"]);
        assert_eq!(partitions[0].date, date(2024, 8));

        store
            .execute("INSERT INTO file_access_2024_08_01 (fid, count, access_time) VALUES (1, 1, 1)")
            .await
            .unwrap();

        dao.remove(&partitions[0]).await.unwrap();
        assert_eq!(dao.get_all().await.unwrap().len(), 1);
        assert!(store
            .query_long("SELECT count(*) AS value FROM file_access_2024_08_01")
            .await
            .is_err());
    }
}
