//! 规则引擎
//!
//! 规则文本翻译为 SQL 计划，按调度周期检查元数据并生成 cmdlet。

pub mod ast;
pub mod copy;
pub mod executor;
pub mod lexer;
pub mod manager;
pub mod parser;
pub mod plugin;
pub mod property;
pub mod schedule;
pub mod translation;
pub mod translator;

pub use copy::{FileCopyDrPlugin, FileCopyScheduleStrategy};
pub use executor::{CmdletSubmitter, RuleExecutor, TickOutcome};
pub use manager::RuleManager;
pub use plugin::RuleExecutorPlugin;
pub use schedule::ScheduleInfo;
pub use translation::{DynamicParameter, RuleTranslationResult};
pub use translator::RuleTranslator;
