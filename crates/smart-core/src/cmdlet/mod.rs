//! cmdlet 字符串解析与模板

pub mod descriptor;
pub mod parser;

pub use descriptor::{CmdletDescriptor, FILE_PATH, RULE_ID};
pub use parser::{CmdletParser, ParsedAction, ParsedCmdlet};
