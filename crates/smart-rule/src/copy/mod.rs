//! 文件复制（sync）规则支持

pub mod dr_plugin;
pub mod strategy;

pub use dr_plugin::{base_dir, with_path_separator, FileCopyDrPlugin};
pub use strategy::FileCopyScheduleStrategy;
