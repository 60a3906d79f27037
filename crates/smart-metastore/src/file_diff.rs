use async_trait::async_trait;
use sea_orm::{ConnectionTrait, DatabaseBackend, DatabaseConnection, QueryResult, Statement};
use smart_core::{Result, SmartError};
use smart_types::{FileDiff, FileDiffState, FileDiffType};
use tracing::debug;

use crate::store::sql_quote;

/// 文件变更积压表
#[async_trait]
pub trait FileDiffDao: Send + Sync {
    /// 插入变更，返回分配的 ID
    async fn insert(&self, diff: &FileDiff) -> Result<i64>;

    async fn get_by_state(&self, state: FileDiffState) -> Result<Vec<FileDiff>>;

    async fn update_state(&self, did: i64, state: FileDiffState) -> Result<()>;

    /// 删除某条规则的基准同步记录
    async fn delete_base_sync(&self, rule_id: i64) -> Result<u64>;
}

pub struct SqlFileDiffDao {
    db: DatabaseConnection,
}

impl SqlFileDiffDao {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    fn backend(&self) -> DatabaseBackend {
        self.db.get_database_backend()
    }

    fn from_row(row: &QueryResult) -> Result<FileDiff> {
        let diff_type: i32 = row.try_get("", "diff_type")?;
        let state: i32 = row.try_get("", "state")?;
        let parameters: String = row.try_get("", "parameters")?;

        Ok(FileDiff {
            id: row.try_get("", "did")?,
            rule_id: row.try_get("", "rid")?,
            diff_type: FileDiffType::from_value(diff_type).ok_or_else(|| {
                SmartError::Internal(format!("Unknown file diff type {}", diff_type))
            })?,
            src: row.try_get("", "src")?,
            parameters: serde_json::from_str(&parameters)?,
            state: FileDiffState::from_value(state)
                .ok_or_else(|| SmartError::Internal(format!("Unknown file diff state {}", state)))?,
            create_time: row.try_get("", "create_time")?,
        })
    }
}

#[async_trait]
impl FileDiffDao for SqlFileDiffDao {
    async fn insert(&self, diff: &FileDiff) -> Result<i64> {
        let rid = diff
            .rule_id
            .map(|id| id.to_string())
            .unwrap_or_else(|| "NULL".to_string());
        let sql = format!(
            "INSERT INTO file_diff (rid, diff_type, src, parameters, state, create_time) \
             VALUES ({}, {}, {}, {}, {}, {})",
            rid,
            diff.diff_type.value(),
            sql_quote(&diff.src),
            sql_quote(&serde_json::to_string(&diff.parameters)?),
            diff.state.value(),
            diff.create_time,
        );

        let did = match self.backend() {
            DatabaseBackend::Postgres => {
                let row = self
                    .db
                    .query_one(Statement::from_string(
                        self.backend(),
                        format!("{} RETURNING did", sql),
                    ))
                    .await?
                    .ok_or_else(|| SmartError::Internal("Insert returned no id".to_string()))?;
                row.try_get::<i64>("", "did")?
            }
            _ => {
                let result = self.db.execute(Statement::from_string(self.backend(), sql)).await?;
                result.last_insert_id() as i64
            }
        };

        debug!(did = did, src = %diff.src, diff_type = ?diff.diff_type, "File diff inserted");
        Ok(did)
    }

    async fn get_by_state(&self, state: FileDiffState) -> Result<Vec<FileDiff>> {
        let sql = format!(
            "SELECT * FROM file_diff WHERE state = {} ORDER BY create_time, did",
            state.value()
        );
        let rows = self
            .db
            .query_all(Statement::from_string(self.backend(), sql))
            .await?;
        rows.iter().map(Self::from_row).collect()
    }

    async fn update_state(&self, did: i64, state: FileDiffState) -> Result<()> {
        let sql = format!(
            "UPDATE file_diff SET state = {} WHERE did = {}",
            state.value(),
            did
        );
        let result = self.db.execute(Statement::from_string(self.backend(), sql)).await?;
        if result.rows_affected() == 0 {
            return Err(SmartError::not_found("file diff", did));
        }
        Ok(())
    }

    async fn delete_base_sync(&self, rule_id: i64) -> Result<u64> {
        let sql = format!(
            "DELETE FROM file_diff WHERE rid = {} AND diff_type = {}",
            rule_id,
            FileDiffType::Basesync.value()
        );
        let result = self.db.execute(Statement::from_string(self.backend(), sql)).await?;
        Ok(result.rows_affected())
    }
}
