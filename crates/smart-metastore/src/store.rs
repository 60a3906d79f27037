use async_trait::async_trait;
use sea_orm::{ConnectOptions, ConnectionTrait, Database, DatabaseBackend, DatabaseConnection, Statement};
use smart_core::Result;
use tracing::{debug, info};

/// 规则执行使用的元数据存储接口
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MetaStore: Send + Sync {
    /// 执行语句，返回影响行数
    async fn execute(&self, sql: &str) -> Result<u64>;

    /// 执行查询，返回 `path` 列
    async fn query_paths(&self, sql: &str) -> Result<Vec<String>>;

    /// 执行查询，返回第一行的 `value` 列
    async fn query_long(&self, sql: &str) -> Result<Option<i64>>;
}

/// 基于 sea-orm 的实现
#[derive(Clone)]
pub struct SqlMetaStore {
    db: DatabaseConnection,
}

impl SqlMetaStore {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    pub fn connection(&self) -> &DatabaseConnection {
        &self.db
    }

    pub fn backend(&self) -> DatabaseBackend {
        self.db.get_database_backend()
    }
}

#[async_trait]
impl MetaStore for SqlMetaStore {
    async fn execute(&self, sql: &str) -> Result<u64> {
        debug!(sql = %sql, "Execute statement");
        let result = self
            .db
            .execute(Statement::from_string(self.backend(), sql.to_string()))
            .await?;
        Ok(result.rows_affected())
    }

    async fn query_paths(&self, sql: &str) -> Result<Vec<String>> {
        debug!(sql = %sql, "Query paths");
        let rows = self
            .db
            .query_all(Statement::from_string(self.backend(), sql.to_string()))
            .await?;

        let mut paths = Vec::with_capacity(rows.len());
        for row in rows {
            paths.push(row.try_get::<String>("", "path")?);
        }
        Ok(paths)
    }

    async fn query_long(&self, sql: &str) -> Result<Option<i64>> {
        debug!(sql = %sql, "Query value");
        let row = self
            .db
            .query_one(Statement::from_string(self.backend(), sql.to_string()))
            .await?;

        match row {
            Some(row) => Ok(row.try_get::<Option<i64>>("", "value")?),
            None => Ok(None),
        }
    }
}

/// SQL 字符串字面量
pub fn sql_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

/// 连接元数据库
///
/// 内存 SQLite 每个连接都是独立的库，因此连接池固定为一个连接。
pub async fn connect(url: &str) -> Result<DatabaseConnection> {
    let mut options = ConnectOptions::new(url.to_string());
    if url.contains(":memory:") {
        options.max_connections(1).min_connections(1);
    }
    options.sqlx_logging(false);

    let db = Database::connect(options).await?;
    info!(url = %url, "Connected to metastore");
    Ok(db)
}

fn id_column(backend: DatabaseBackend, name: &str) -> String {
    match backend {
        DatabaseBackend::Postgres => format!("{} BIGSERIAL PRIMARY KEY", name),
        _ => format!("{} INTEGER PRIMARY KEY AUTOINCREMENT", name),
    }
}

/// 创建表结构
pub async fn setup_schema(db: &DatabaseConnection) -> Result<()> {
    let backend = db.get_database_backend();

    let statements = [
        r#"
        CREATE TABLE IF NOT EXISTS file (
            fid BIGINT PRIMARY KEY,
            path TEXT NOT NULL UNIQUE,
            length BIGINT NOT NULL DEFAULT 0,
            block_size BIGINT NOT NULL DEFAULT 0,
            modification_time BIGINT NOT NULL DEFAULT 0,
            access_time BIGINT NOT NULL DEFAULT 0,
            is_dir INTEGER NOT NULL DEFAULT 0,
            owner TEXT NOT NULL DEFAULT '',
            owner_group TEXT NOT NULL DEFAULT '',
            storage_policy TEXT NOT NULL DEFAULT '',
            ec_policy TEXT NOT NULL DEFAULT ''
        )
        "#
        .to_string(),
        format!(
            r#"
        CREATE TABLE IF NOT EXISTS file_diff (
            {},
            rid BIGINT,
            diff_type INTEGER NOT NULL,
            src TEXT NOT NULL,
            parameters TEXT NOT NULL DEFAULT '{{}}',
            state INTEGER NOT NULL DEFAULT 0,
            create_time BIGINT NOT NULL
        )
        "#,
            id_column(backend, "did")
        ),
        r#"
        CREATE TABLE IF NOT EXISTS file_access (
            fid BIGINT NOT NULL,
            count BIGINT NOT NULL,
            access_time BIGINT NOT NULL
        )
        "#
        .to_string(),
        r#"
        CREATE TABLE IF NOT EXISTS cached_file (
            fid BIGINT PRIMARY KEY,
            path TEXT NOT NULL,
            from_time BIGINT NOT NULL,
            last_access_time BIGINT NOT NULL,
            num_accessed BIGINT NOT NULL DEFAULT 0
        )
        "#
        .to_string(),
        format!(
            r#"
        CREATE TABLE IF NOT EXISTS file_access_partition (
            {},
            name TEXT NOT NULL UNIQUE,
            partition_date TEXT NOT NULL
        )
        "#,
            id_column(backend, "id")
        ),
    ];

    for sql in statements {
        db.execute(Statement::from_string(backend, sql)).await?;
    }

    debug!("Metastore schema ready");
    Ok(())
}


#[cfg(test)]
mod tests {
    use super::test_support::create_test_store;
    use super::*;

    #[test]
    fn test_sql_quote() {
        assert_eq!(sql_quote("/a/b"), "'/a/b'");
        assert_eq!(sql_quote("it's"), "'it''s'");
    }

    #[tokio::test]
    async fn test_execute_and_query() {
        let store = create_test_store().await;
        store
            .execute("INSERT INTO file (fid, path, length) VALUES (1, '/a', 10), (2, '/b', 20)")
            .await
            .unwrap();

        let paths = store
            .query_paths("SELECT path FROM file WHERE length > 15")
            .await
            .unwrap();
        assert_eq!(paths, vec!["/b".to_string()]);

        let max = store
            .query_long("SELECT max(length) AS value FROM file")
            .await
            .unwrap();
        assert_eq!(max, Some(20));

        let none = store
            .query_long("SELECT max(length) AS value FROM file WHERE fid > 10")
            .await
            .unwrap();
        assert_eq!(none, None);
    }

    #[tokio::test]
    async fn test_query_error_propagates() {
        let store = create_test_store().await;
        let err = store.query_paths("SELECT path FROM missing_table").await.unwrap_err();
        assert!(matches!(err, smart_core::SmartError::MetaStore(_)));
    }
}
