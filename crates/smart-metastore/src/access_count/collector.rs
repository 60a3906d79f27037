use smart_core::metrics::ACCESS_EVENTS_REJECTED_TOTAL;
use smart_core::{Result, SmartError};
use smart_types::FileAccessEvent;
use tokio::sync::{mpsc, Mutex};
use tracing::warn;

/// 访问事件采集队列
pub struct AccessEventCollector {
    tx: mpsc::Sender<FileAccessEvent>,
    rx: Mutex<mpsc::Receiver<FileAccessEvent>>,
}

impl AccessEventCollector {
    pub fn new(capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        Self {
            tx,
            rx: Mutex::new(rx),
        }
    }

    /// 入队，队列满时拒绝
    pub fn push(&self, event: FileAccessEvent) -> Result<()> {
        self.tx.try_send(event).map_err(|e| match e {
            mpsc::error::TrySendError::Full(event) => {
                metrics::counter!(ACCESS_EVENTS_REJECTED_TOTAL, 1);
                warn!(path = %event.path, "Access event queue is full");
                SmartError::QueueFull("access event queue".to_string())
            }
            mpsc::error::TrySendError::Closed(_) => {
                SmartError::Channel("access event queue closed".to_string())
            }
        })
    }

    /// 取出当前队列中的全部事件
    pub async fn collect(&self) -> Vec<FileAccessEvent> {
        let mut rx = self.rx.lock().await;
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_bounded_queue() {
        let collector = AccessEventCollector::new(2);
        collector.push(FileAccessEvent::new("/a", 1)).unwrap();
        collector.push(FileAccessEvent::new("/b", 2)).unwrap();
        let err = collector.push(FileAccessEvent::new("/c", 3)).unwrap_err();
        assert!(matches!(err, SmartError::QueueFull(_)));

        let events = collector.collect().await;
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].path, "/a");
        assert!(collector.collect().await.is_empty());

        collector.push(FileAccessEvent::new("/c", 3)).unwrap();
    }
}
