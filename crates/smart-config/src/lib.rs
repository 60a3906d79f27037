//! 配置
//!
//! master 与 agent 共用一份配置文件，各自读取所需的部分。

pub mod loader;
pub mod settings;

pub use loader::ConfigLoader;
pub use settings::{
    AccessCountSettings, AgentSettings, LogFormat, LoggingSettings, MasterSettings,
    MetaStoreSettings, MetricsSettings, PartitionSettings, RuleSettings, SmartConfig,
};
