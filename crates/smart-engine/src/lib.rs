//! Cmdlet 调度与 agent 管理
//!
//! 调度器以消息循环的方式持有全部 cmdlet 状态，master 把 agent 连接上的协议消息
//! 转交给它，存活监控定期触发心跳超时检查。

pub mod audit;
pub mod config;
pub mod handle;
pub mod liveness;
pub mod master;
pub mod policy;
pub mod registry;
pub mod scheduler;
pub mod tracker;

pub use audit::CmdletAuditListener;
pub use config::SchedulerConfig;
pub use handle::SchedulerHandle;
pub use liveness::LivenessMonitor;
pub use master::AgentMaster;
pub use policy::{select_agent, Selection};
pub use registry::AgentRegistry;
pub use scheduler::CmdletScheduler;
pub use tracker::RuleCmdletTracker;
