//! 文件访问计数
//!
//! 采集队列 -> 定时拉取 -> 路径解析为文件 ID 并聚合 -> 经 failover 持久化。

pub mod aggregator;
pub mod collector;
pub mod failover;
pub mod fetcher;
pub mod manager;
pub mod table;

pub use aggregator::AccessEventAggregator;
pub use collector::AccessEventCollector;
pub use failover::{AccessCountContext, Failover, FailoverRegistry, FailFailover, RetryFailover};
pub use fetcher::AccessEventFetcher;
pub use manager::{AccessCountSaver, FileAccessManager};
pub use table::AccessCountTable;
