use super::aggregator::AccessEventAggregator;
use super::collector::AccessEventCollector;
use smart_core::metrics::ACCESS_EVENTS_TOTAL;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::interval;
use tracing::{debug, error, info, warn};

/// 访问事件定时拉取器
///
/// 按固定间隔从采集队列取出事件交给聚合器
pub struct AccessEventFetcher {
    collector: Arc<AccessEventCollector>,
    aggregator: Arc<AccessEventAggregator>,
    fetch_interval: Duration,
    running: Arc<RwLock<bool>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl AccessEventFetcher {
    pub fn new(
        collector: Arc<AccessEventCollector>,
        aggregator: Arc<AccessEventAggregator>,
        fetch_interval: Duration,
    ) -> Self {
        Self {
            collector,
            aggregator,
            fetch_interval,
            running: Arc::new(RwLock::new(false)),
            task: Mutex::new(None),
        }
    }

    /// 启动后台拉取任务
    pub async fn start(&self) {
        let mut running = self.running.write().await;
        if *running {
            warn!("Access event fetcher is already running");
            return;
        }
        *running = true;
        drop(running);

        info!(fetch_interval = ?self.fetch_interval, "Access event fetcher started");

        let collector = self.collector.clone();
        let aggregator = self.aggregator.clone();
        let running = self.running.clone();
        let fetch_interval = self.fetch_interval;

        let handle = tokio::spawn(async move {
            let mut ticker = interval(fetch_interval);
            loop {
                ticker.tick().await;
                if !*running.read().await {
                    info!("Access event fetcher stopped");
                    break;
                }
                Self::fetch(&collector, &aggregator).await;
            }
        });
        *self.task.lock().await = Some(handle);
    }

    /// 停止拉取，返回时后台任务已结束
    pub async fn stop(&self) {
        *self.running.write().await = false;
        info!("Access event fetcher stopping...");
        if let Some(handle) = self.task.lock().await.take() {
            handle.abort();
            let _ = handle.await;
        }
    }

    /// 立即拉取一次
    pub async fn fetch_once(&self) {
        Self::fetch(&self.collector, &self.aggregator).await;
    }

    async fn fetch(collector: &AccessEventCollector, aggregator: &AccessEventAggregator) {
        let events = collector.collect().await;
        if events.is_empty() {
            return;
        }

        metrics::counter!(ACCESS_EVENTS_TOTAL, events.len() as u64);
        debug!(events = events.len(), "Fetched access events");
        if let Err(e) = aggregator.aggregate(events).await {
            error!(error = %e, "Failed to aggregate access events");
        }
    }
}
