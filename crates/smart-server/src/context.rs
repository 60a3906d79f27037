//! master 进程的组件装配
//!
//! 先构造元数据库与调度器，再把调度器作为 cmdlet 提交者交给规则管理器，
//! 最后启动 agent 监听与各个后台任务。

use anyhow::{Context, Result};
use smart_config::SmartConfig;
use smart_core::audit::AuditLog;
use smart_core::bus::{EventBus, SharedEventBus};
use smart_engine::{AgentMaster, CmdletAuditListener, CmdletScheduler, LivenessMonitor, SchedulerHandle};
use smart_metastore::access_count::failover::FailoverSettings;
use smart_metastore::access_count::{
    AccessEventAggregator, AccessEventCollector, AccessEventFetcher, FailoverRegistry, FileAccessManager,
};
use smart_metastore::file_diff::SqlFileDiffDao;
use smart_metastore::file_info::SqlFileInfoDao;
use smart_metastore::partition::{
    FileAccessPartitionManager, FileAccessPartitionService, RetentionPolicyRegistry, SqlFileAccessPartitionDao,
};
use smart_metastore::SqlMetaStore;
use smart_rule::{FileCopyDrPlugin, RuleManager};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tracing::{error, info};

pub struct MasterContext {
    config: SmartConfig,
    pub bus: SharedEventBus,
    pub audit: AuditLog,
    pub store: Arc<SqlMetaStore>,
    pub scheduler: SchedulerHandle,
    pub rules: Arc<RuleManager>,
    pub access_events: Arc<AccessEventCollector>,
    master: Arc<AgentMaster>,
    liveness: LivenessMonitor,
    fetcher: AccessEventFetcher,
    partitions: FileAccessPartitionService,
    tasks: Vec<JoinHandle<()>>,
}

impl MasterContext {
    pub async fn build(config: SmartConfig) -> Result<Self> {
        config.validate()?;

        let db = smart_metastore::connect(&config.metastore.url)
            .await
            .context("Failed to connect to metastore")?;
        smart_metastore::setup_schema(&db)
            .await
            .context("Failed to create metastore schema")?;
        let store = Arc::new(SqlMetaStore::new(db.clone()));

        let bus: SharedEventBus = Arc::new(EventBus::default());
        let audit = AuditLog::default();

        let (scheduler, scheduler_task) = CmdletScheduler::new(config.master.scheduler_config())
            .with_event_bus(bus.clone())
            .spawn();
        let audit_task = CmdletAuditListener::new(audit.clone()).spawn(&bus);

        let copy_plugin = FileCopyDrPlugin::new(
            Arc::new(SqlFileDiffDao::new(db.clone())),
            config.rule.copy_strategy()?,
        );
        let rules = Arc::new(
            RuleManager::new(store.clone(), Arc::new(scheduler.clone()))
                .with_plugin(Arc::new(copy_plugin))
                .with_event_bus(bus.clone())
                .with_audit_log(audit.clone()),
        );

        let access = &config.access_count;
        let failover = FailoverRegistry::new().create(
            &access.failover,
            &FailoverSettings {
                max_retries: access.max_retries,
            },
        );
        let access_events = Arc::new(AccessEventCollector::new(access.queue_capacity));
        let aggregator = Arc::new(AccessEventAggregator::new(
            Arc::new(SqlFileInfoDao::new(db.clone())),
            Arc::new(FileAccessManager::new(db.clone())),
            failover,
        ));
        let fetcher = AccessEventFetcher::new(access_events.clone(), aggregator, access.fetch_interval());

        let partition_dao = Arc::new(SqlFileAccessPartitionDao::new(db));
        let retention = RetentionPolicyRegistry::new().create(
            &config.partition.retention_policy,
            partition_dao.clone(),
            config.partition.retention_count,
        );
        let partitions = FileAccessPartitionService::new(
            Arc::new(FileAccessPartitionManager::new(partition_dao, retention)),
            config.partition.create_cron.clone(),
            config.partition.cleanup_cron.clone(),
        );

        let master = Arc::new(AgentMaster::new(scheduler.clone(), config.master.register_timeout()));
        let liveness = LivenessMonitor::new(scheduler.clone(), config.master.liveness_check_interval());

        Ok(Self {
            config,
            bus,
            audit,
            store,
            scheduler,
            rules,
            access_events,
            master,
            liveness,
            fetcher,
            partitions,
            tasks: vec![scheduler_task, audit_task],
        })
    }

    /// 启动后台任务并开始接受 agent 连接，返回实际监听地址
    pub async fn start(&mut self) -> Result<SocketAddr> {
        let listener = TcpListener::bind(&self.config.master.listen)
            .await
            .with_context(|| format!("Failed to bind {}", self.config.master.listen))?;
        let address = listener.local_addr()?;

        let master = self.master.clone();
        self.tasks.push(tokio::spawn(async move {
            if let Err(e) = master.run_tcp(listener).await {
                error!(error = %e, "Agent listener stopped");
            }
        }));

        self.liveness.start().await;
        self.fetcher.start().await;
        self.partitions.start().await?;

        info!(address = %address, "Master started");
        Ok(address)
    }

    /// 以管理员身份提交并激活规则
    pub async fn submit_rule(&self, text: &str) -> Result<i64> {
        let rule_id = self.rules.submit_rule(text, "admin", true).await?;
        Ok(rule_id)
    }

    pub async fn shutdown(self) -> Result<()> {
        info!("Master shutting down");
        self.rules.shutdown().await;
        self.liveness.stop().await;
        self.fetcher.stop().await;
        self.partitions.stop().await?;
        self.scheduler.shutdown().await?;
        for task in self.tasks {
            task.abort();
        }
        info!("Master stopped");
        Ok(())
    }
}
