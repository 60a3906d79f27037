use sea_orm::{DatabaseConnection, DatabaseTransaction, TransactionTrait};
use smart_core::Result;
use std::future::Future;
use std::pin::Pin;
use tracing::warn;

pub type TransactionFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

/// 在事务中执行闭包
///
/// 闭包成功则提交，任何错误都回滚，事务对象在返回前释放。
pub async fn in_transaction<T, F>(db: &DatabaseConnection, f: F) -> Result<T>
where
    T: Send,
    F: for<'a> FnOnce(&'a DatabaseTransaction) -> TransactionFuture<'a, T>,
{
    let txn = db.begin().await?;

    match f(&txn).await {
        Ok(value) => {
            txn.commit().await?;
            Ok(value)
        }
        Err(e) => {
            if let Err(rollback_err) = txn.rollback().await {
                warn!(error = %rollback_err, "Transaction rollback failed");
            }
            Err(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::test_support::create_test_store;
    use crate::MetaStore;
    use sea_orm::{ConnectionTrait, Statement};
    use smart_core::SmartError;

    async fn count_files(store: &crate::SqlMetaStore) -> i64 {
        store
            .query_long("SELECT count(*) AS value FROM file")
            .await
            .unwrap()
            .unwrap_or(0)
    }

    #[tokio::test]
    async fn test_commit_on_success() {
        let store = create_test_store().await;
        let backend = store.backend();

        let inserted = in_transaction(store.connection(), |txn| {
            Box::pin(async move {
                txn.execute(Statement::from_string(
                    backend,
                    "INSERT INTO file (fid, path) VALUES (1, '/a')".to_string(),
                ))
                .await?;
                Ok(1)
            })
        })
        .await
        .unwrap();

        assert_eq!(inserted, 1);
        assert_eq!(count_files(&store).await, 1);
    }

    #[tokio::test]
    async fn test_rollback_on_error() {
        let store = create_test_store().await;
        let backend = store.backend();

        let result: Result<()> = in_transaction(store.connection(), |txn| {
            Box::pin(async move {
                txn.execute(Statement::from_string(
                    backend,
                    "INSERT INTO file (fid, path) VALUES (1, '/a')".to_string(),
                ))
                .await?;
                Err(SmartError::Internal("abort".to_string()))
            })
        })
        .await;

        assert!(result.is_err());
        assert_eq!(count_files(&store).await, 0);
    }
}
