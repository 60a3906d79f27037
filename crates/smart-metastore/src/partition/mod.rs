//! file_access 按月分区
//!
//! 每个分区是一张 `file_access_yyyy_MM_dd` 表，并在 `file_access_partition` 中登记。

pub mod dao;
pub mod manager;
pub mod retention;
pub mod service;

pub use dao::{partition_name, FileAccessPartition, FileAccessPartitionDao, SqlFileAccessPartitionDao};
pub use manager::FileAccessPartitionManager;
pub use retention::{MonthCountRetentionPolicy, RetentionPolicyExecutor, RetentionPolicyRegistry};
pub use service::FileAccessPartitionService;
