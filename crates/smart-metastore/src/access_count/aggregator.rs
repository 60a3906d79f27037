use super::failover::{AccessCountContext, Failover};
use super::manager::AccessCountSaver;
use crate::file_info::FileInfoDao;
use smart_core::Result;
use smart_types::{AggregatedAccessCounts, FileAccessEvent, TimeGranularity};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, error};

/// 访问事件聚合
///
/// 同一文件的事件按时间桶合并，桶宽由 `granularity` 决定
pub struct AccessEventAggregator {
    file_info: Arc<dyn FileInfoDao>,
    saver: Arc<dyn AccessCountSaver>,
    failover: Arc<dyn Failover>,
    granularity: TimeGranularity,
}

impl AccessEventAggregator {
    pub fn new(
        file_info: Arc<dyn FileInfoDao>,
        saver: Arc<dyn AccessCountSaver>,
        failover: Arc<dyn Failover>,
    ) -> Self {
        Self {
            file_info,
            saver,
            failover,
            granularity: TimeGranularity::Minute,
        }
    }

    pub fn with_granularity(mut self, granularity: TimeGranularity) -> Self {
        self.granularity = granularity;
        self
    }

    fn bucket_of(&self, timestamp: i64) -> i64 {
        timestamp.div_euclid(self.granularity.millis())
    }

    /// 聚合并持久化一批事件
    pub async fn aggregate(&self, events: Vec<FileAccessEvent>) -> Result<()> {
        let counts = self.aggregated_counts(events).await;
        if counts.is_empty() {
            return Ok(());
        }
        debug!(files = counts.len(), "Saving aggregated access counts");
        self.failover
            .execute(self.saver.as_ref(), AccessCountContext::new(counts))
            .await
    }

    /// 解析文件 ID 并按 (文件, 时间桶) 合并，未知路径被丢弃
    async fn aggregated_counts(&self, events: Vec<FileAccessEvent>) -> Vec<AggregatedAccessCounts> {
        let mut paths: Vec<String> = events.iter().map(|e| e.path.clone()).collect();
        paths.sort();
        paths.dedup();

        let fids = match self.file_info.get_path_fids(paths).await {
            Ok(fids) => fids,
            Err(e) => {
                error!(error = %e, "Error fetching file ids for access events");
                HashMap::new()
            }
        };

        let mut order = Vec::new();
        let mut merged: HashMap<(i64, i64), AggregatedAccessCounts> = HashMap::new();
        for event in events {
            let Some(&fid) = fids.get(&event.path) else {
                continue;
            };
            let key = (fid, self.bucket_of(event.timestamp));
            let count = AggregatedAccessCounts::new(fid, 1, event.timestamp);
            match merged.get_mut(&key) {
                Some(existing) => *existing = existing.merge(count),
                None => {
                    order.push(key);
                    merged.insert(key, count);
                }
            }
        }

        order.into_iter().filter_map(|key| merged.remove(&key)).collect()
    }
}
