use super::parser::{CmdletParser, ParsedCmdlet};
use crate::error::Result;
use std::collections::BTreeMap;
use std::hash::{Hash, Hasher};

/// 规则 ID 公共参数
pub const RULE_ID: &str = "-ruleId";
/// 文件路径公共参数
pub const FILE_PATH: &str = "-file";

/// Cmdlet 模板
///
/// 保存 action 名称、公共参数和每个 action 的参数，不校验 action 是否存在。
/// 两个描述符在规则 ID 与 cmdlet 字符串都相同时视为同一个任务。
#[derive(Debug, Clone, Default)]
pub struct CmdletDescriptor {
    action_names: Vec<String>,
    common_args: BTreeMap<String, String>,
    action_args: Vec<BTreeMap<String, String>>,
    cmdlet_string: Option<String>,
}

impl CmdletDescriptor {
    /// 从 cmdlet 字符串构建，空白字符串得到空描述符
    pub fn parse(cmdlet: &str) -> Result<Self> {
        match CmdletParser::new().parse(cmdlet)? {
            Some(parsed) => Ok(Self::from_parsed(parsed)),
            None => Ok(Self::default()),
        }
    }

    pub fn from_parsed(parsed: ParsedCmdlet) -> Self {
        let mut descriptor = Self {
            cmdlet_string: Some(parsed.cmdlet_string),
            ..Default::default()
        };
        for action in parsed.actions {
            descriptor.action_names.push(action.name);
            descriptor.action_args.push(action.args);
        }
        descriptor
    }

    pub fn cmdlet_string(&self) -> String {
        self.cmdlet_string
            .clone()
            .unwrap_or_else(|| self.to_cmdlet_string())
    }

    /// 设置公共参数，cmdlet 字符串随之重新生成
    pub fn set_cmdlet_parameter(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.common_args.insert(key.into(), value.into());
        self.cmdlet_string = Some(self.to_cmdlet_string());
    }

    pub fn rule_id(&self) -> i64 {
        self.common_args
            .get(RULE_ID)
            .and_then(|id| id.parse().ok())
            .unwrap_or(0)
    }

    pub fn set_rule_id(&mut self, rule_id: i64) {
        self.set_cmdlet_parameter(RULE_ID, rule_id.to_string());
    }

    pub fn is_rule_cmdlet(&self) -> bool {
        self.common_args.contains_key(RULE_ID)
    }

    pub fn action_names(&self) -> &[String] {
        &self.action_names
    }

    pub fn action_name(&self, index: usize) -> Option<&str> {
        self.action_names.get(index).map(String::as_str)
    }

    pub fn action_size(&self) -> usize {
        self.action_names.len()
    }

    /// 完整参数，包含公共参数
    pub fn action_args(&self, index: usize) -> BTreeMap<String, String> {
        let mut args = self.common_args.clone();
        if let Some(own) = self.action_args.get(index) {
            args.extend(own.iter().map(|(k, v)| (k.clone(), v.clone())));
        }
        args
    }

    pub fn add_action_arg(&mut self, index: usize, key: impl Into<String>, value: impl Into<String>) {
        if let Some(args) = self.action_args.get_mut(index) {
            args.insert(key.into(), value.into());
            self.cmdlet_string = Some(self.to_cmdlet_string());
        }
    }

    /// 修改某个 action 的参数
    pub fn update_action_arg<F>(&mut self, index: usize, key: &str, f: F)
    where
        F: FnOnce(&str) -> String,
    {
        if let Some(value) = self.action_args.get_mut(index).and_then(|args| args.get_mut(key)) {
            *value = f(value);
            self.cmdlet_string = Some(self.to_cmdlet_string());
        }
    }

    pub fn to_cmdlet_string(&self) -> String {
        (0..self.action_size())
            .map(|i| action_to_string(&self.action_names[i], &self.action_args(i)))
            .collect::<Vec<_>>()
            .join(" ; ")
    }
}

impl PartialEq for CmdletDescriptor {
    fn eq(&self, other: &Self) -> bool {
        self.rule_id() == other.rule_id() && self.cmdlet_string() == other.cmdlet_string()
    }
}

impl Eq for CmdletDescriptor {}

impl Hash for CmdletDescriptor {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.rule_id().hash(state);
        self.cmdlet_string().hash(state);
    }
}

/// 生成单个 action 的字符串形式，需要时为参数值加引号
pub fn action_to_string(name: &str, args: &BTreeMap<String, String>) -> String {
    let mut out = name.to_string();
    for (key, value) in args {
        out.push(' ');
        out.push_str(key);
        if value.is_empty() {
            continue;
        }
        out.push(' ');
        if value.contains(char::is_whitespace) {
            out.push('"');
            out.push_str(value);
            out.push('"');
        } else {
            for c in value.chars() {
                if c == '"' || c == '\\' {
                    out.push('\\');
                }
                out.push(c);
            }
        }
    }
    out
}
