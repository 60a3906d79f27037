use crate::store::sql_quote;
use async_trait::async_trait;
use sea_orm::{ConnectionTrait, DatabaseConnection, Statement};
use smart_core::Result;
use smart_types::FileInfo;
use std::collections::HashMap;
use tracing::debug;

/// 文件元数据访问
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait FileInfoDao: Send + Sync {
    /// 路径到文件 ID 的映射，不存在的路径不会出现在结果中
    async fn get_path_fids(&self, paths: Vec<String>) -> Result<HashMap<String, i64>>;

    async fn insert(&self, files: Vec<FileInfo>) -> Result<()>;
}

pub struct SqlFileInfoDao {
    db: DatabaseConnection,
}

impl SqlFileInfoDao {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }
}

#[async_trait]
impl FileInfoDao for SqlFileInfoDao {
    async fn get_path_fids(&self, paths: Vec<String>) -> Result<HashMap<String, i64>> {
        if paths.is_empty() {
            return Ok(HashMap::new());
        }

        let list = paths.iter().map(|p| sql_quote(p)).collect::<Vec<_>>().join(", ");
        let sql = format!("SELECT fid, path FROM file WHERE path IN ({})", list);
        let rows = self
            .db
            .query_all(Statement::from_string(self.db.get_database_backend(), sql))
            .await?;

        let mut fids = HashMap::with_capacity(rows.len());
        for row in rows {
            let fid: i64 = row.try_get("", "fid")?;
            let path: String = row.try_get("", "path")?;
            fids.insert(path, fid);
        }
        Ok(fids)
    }

    async fn insert(&self, files: Vec<FileInfo>) -> Result<()> {
        let backend = self.db.get_database_backend();
        for file in &files {
            let sql = format!(
                "INSERT INTO file (fid, path, length, block_size, modification_time, access_time, \
                 is_dir, owner, owner_group, storage_policy, ec_policy) \
                 VALUES ({}, {}, {}, {}, {}, {}, {}, {}, {}, {}, {})",
                file.fid,
                sql_quote(&file.path),
                file.length,
                file.block_size,
                file.modification_time,
                file.access_time,
                i32::from(file.is_dir),
                sql_quote(&file.owner),
                sql_quote(&file.group),
                sql_quote(&file.storage_policy),
                sql_quote(&file.ec_policy),
            );
            self.db.execute(Statement::from_string(backend, sql)).await?;
        }
        debug!(count = files.len(), "Inserted files");
        Ok(())
    }
}
