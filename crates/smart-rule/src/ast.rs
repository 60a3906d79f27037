//! 规则语法树

use std::fmt;

/// 比较运算符
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Gt,
    Ge,
    Lt,
    Le,
    Eq,
    Ne,
}

impl CompareOp {
    pub fn sql(&self) -> &'static str {
        match self {
            CompareOp::Gt => ">",
            CompareOp::Ge => ">=",
            CompareOp::Lt => "<",
            CompareOp::Le => "<=",
            CompareOp::Eq => "=",
            CompareOp::Ne => "<>",
        }
    }
}

/// 字面量
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Long(i64),
    Str(String),
    /// `now` 加偏移（毫秒），执行时展开
    Now(i64),
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Long(v) => write!(f, "{}", v),
            Value::Str(s) => write!(f, "{}", s),
            Value::Now(0) => write!(f, "now"),
            Value::Now(offset) => write!(f, "now{:+}", offset),
        }
    }
}

/// 属性引用，如 `accessCount(5min)`
#[derive(Debug, Clone, PartialEq)]
pub struct PropRef {
    pub name: String,
    pub args: Vec<Value>,
    pub position: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Or(Box<Expr>, Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Not(Box<Expr>),
    Compare { prop: PropRef, op: CompareOp, value: Value },
    Matches { prop: PropRef, pattern: String },
    /// 布尔属性
    Flag(PropRef),
    /// 常量条件，如 `1`
    Constant(i64),
}

/// 时间点
#[derive(Debug, Clone, PartialEq)]
pub enum TimeExpr {
    Now(i64),
    /// `yyyy-MM-dd HH:mm:ss`
    Absolute(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum ScheduleExpr {
    Every {
        every: i64,
        from: Option<TimeExpr>,
        to: Option<TimeExpr>,
    },
    At(TimeExpr),
}

/// 解析后的规则
#[derive(Debug, Clone, PartialEq)]
pub struct RuleAst {
    pub object: String,
    pub schedule: Option<ScheduleExpr>,
    pub condition: Expr,
    /// 条件在原文中的字节区间 `[start, end)`
    pub cond_span: (usize, usize),
    pub cmdlet: String,
}
