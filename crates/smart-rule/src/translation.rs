use crate::schedule::ScheduleInfo;
use smart_core::cmdlet::CmdletDescriptor;
use std::collections::HashMap;

/// 动态函数的参数
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DynamicParameter {
    /// 属性参数，时间间隔与数量均为整数
    pub args: Vec<i64>,
    /// 临时访问计数表
    pub table: String,
    /// 计算结果写入的变量
    pub variable: Option<String>,
}

/// 规则翻译结果，规则执行的依据
///
/// 每个执行周期使用自己的副本（`clone`），插件改写语句或路径模式不会影响其它副本。
#[derive(Debug, Clone)]
pub struct RuleTranslationResult {
    pub sql_statements: Vec<String>,
    pub dynamic_parameters: HashMap<String, DynamicParameter>,
    /// 返回文件路径的语句下标
    pub ret_sql_index: usize,
    pub schedule_info: ScheduleInfo,
    pub cmd_descriptor: CmdletDescriptor,
    /// 条件在规则文本中的字节区间 `[start, end)`
    pub cond_position: (usize, usize),
    pub path_patterns: Vec<String>,
}

impl RuleTranslationResult {
    pub fn parameter(&self, name: &str) -> Option<&DynamicParameter> {
        self.dynamic_parameters.get(name)
    }

    pub fn ret_sql(&self) -> Option<&str> {
        self.sql_statements.get(self.ret_sql_index).map(String::as_str)
    }
}
