use super::manager::FileAccessPartitionManager;
use smart_core::{Result, SmartError};
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{error, info};

/// 分区定时任务
pub struct FileAccessPartitionService {
    manager: Arc<FileAccessPartitionManager>,
    create_cron: String,
    cleanup_cron: String,
    scheduler: RwLock<Option<JobScheduler>>,
}

fn scheduler_error(e: impl std::fmt::Display) -> SmartError {
    SmartError::Internal(format!("Partition scheduler error: {}", e))
}

impl FileAccessPartitionService {
    pub fn new(
        manager: Arc<FileAccessPartitionManager>,
        create_cron: impl Into<String>,
        cleanup_cron: impl Into<String>,
    ) -> Self {
        Self {
            manager,
            create_cron: create_cron.into(),
            cleanup_cron: cleanup_cron.into(),
            scheduler: RwLock::new(None),
        }
    }

    /// 启动时先各执行一次，再按 cron 周期执行
    pub async fn start(&self) -> Result<()> {
        Self::create_partitions(&self.manager).await;
        Self::cleanup_partitions(&self.manager).await;

        let scheduler = JobScheduler::new().await.map_err(scheduler_error)?;

        let manager = self.manager.clone();
        let create_job = Job::new_async(self.create_cron.as_str(), move |_uuid, _l| {
            let manager = manager.clone();
            Box::pin(async move { Self::create_partitions(&manager).await })
        })
        .map_err(scheduler_error)?;

        let manager = self.manager.clone();
        let cleanup_job = Job::new_async(self.cleanup_cron.as_str(), move |_uuid, _l| {
            let manager = manager.clone();
            Box::pin(async move { Self::cleanup_partitions(&manager).await })
        })
        .map_err(scheduler_error)?;

        scheduler.add(create_job).await.map_err(scheduler_error)?;
        scheduler.add(cleanup_job).await.map_err(scheduler_error)?;
        scheduler.start().await.map_err(scheduler_error)?;
        *self.scheduler.write().await = Some(scheduler);

        info!(
            create_cron = %self.create_cron,
            cleanup_cron = %self.cleanup_cron,
            "File access partition service started"
        );
        Ok(())
    }

    pub async fn stop(&self) -> Result<()> {
        if let Some(mut scheduler) = self.scheduler.write().await.take() {
            scheduler.shutdown().await.map_err(scheduler_error)?;
        }
        info!("File access partition service stopped");
        Ok(())
    }

    async fn create_partitions(manager: &FileAccessPartitionManager) {
        if let Err(e) = manager.create_new_partitions().await {
            error!(error = %e, "Create partition task failed");
        }
    }

    async fn cleanup_partitions(manager: &FileAccessPartitionManager) {
        if let Err(e) = manager.remove_old_partitions().await {
            error!(error = %e, "Cleanup partition task failed");
        }
    }
}
