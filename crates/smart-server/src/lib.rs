//! 进程启动
//!
//! 同一个二进制按角色运行 master 或 agent。

pub mod agent;
pub mod context;
pub mod logging;
pub mod metrics;
pub mod signal;

pub use agent::run_agent;
pub use context::MasterContext;
pub use signal::{ShutdownSignal, SignalHandler};
