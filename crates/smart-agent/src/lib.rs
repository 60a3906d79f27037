//! SmartAgent
//!
//! 向 master 注册，执行下发的 cmdlet 并回报 action 状态。

pub mod actions;
pub mod backoff;
pub mod config;
pub mod connector;
pub mod executor;
pub mod runtime;

pub use actions::{Action, ActionContext, ActionRegistry};
pub use backoff::Backoff;
pub use config::{AgentConfig, BackoffPolicy};
pub use connector::{MasterConnector, TcpConnector};
pub use executor::CmdletExecutor;
pub use runtime::{AgentRuntime, AgentRuntimeState, AgentStatus};
