//! 元数据存储
//!
//! 对外只暴露 [`MetaStore`] 等接口，SQL 方言与连接管理封装在 sea-orm 实现中。

pub mod access_count;
pub mod file_diff;
pub mod file_info;
pub mod partition;
pub mod store;
pub mod transaction;

pub use store::{connect, setup_schema, sql_quote, MetaStore, SqlMetaStore};
pub use transaction::in_transaction;
