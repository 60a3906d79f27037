use smart_types::StateTransitionError;
use thiserror::Error;

/// 规则或 cmdlet 文本解析错误
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct ParseError {
    pub message: String,
    /// 出错位置（字符下标）
    pub position: usize,
}

impl ParseError {
    pub fn new(message: impl Into<String>, position: usize) -> Self {
        Self {
            message: message.into(),
            position,
        }
    }
}

/// 统一错误类型
#[derive(Error, Debug)]
pub enum SmartError {
    /// 规则或 cmdlet 文本格式错误，提交时同步拒绝
    #[error("Parse error: {0}")]
    Parse(#[from] ParseError),

    #[error("Not found: {0}")]
    NotFound(String),

    /// agent 不可达
    #[error("Dispatch error: {0}")]
    Dispatch(String),

    /// 访问计数持久化重试耗尽
    #[error("Persistence failover error: {0}")]
    PersistenceFailover(String),

    /// 单次规则检查失败
    #[error("Rule {rule_id} tick failed: {message}")]
    Tick { rule_id: i64, message: String },

    #[error("Queue full: {0}")]
    QueueFull(String),

    #[error(transparent)]
    InvalidTransition(#[from] StateTransitionError),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Metastore error: {0}")]
    MetaStore(#[from] sea_orm::DbErr),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Channel error: {0}")]
    Channel(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl SmartError {
    pub fn not_found(kind: &str, id: impl std::fmt::Display) -> Self {
        SmartError::NotFound(format!("{} {}", kind, id))
    }

    pub fn parse(message: impl Into<String>) -> Self {
        SmartError::Parse(ParseError::new(message, 0))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, SmartError::NotFound(_))
    }
}

/// Result 类型别名
pub type Result<T> = std::result::Result<T, SmartError>;

impl From<anyhow::Error> for SmartError {
    fn from(err: anyhow::Error) -> Self {
        SmartError::Internal(err.to_string())
    }
}

impl<T> From<tokio::sync::mpsc::error::SendError<T>> for SmartError {
    fn from(err: tokio::sync::mpsc::error::SendError<T>) -> Self {
        SmartError::Channel(err.to_string())
    }
}

impl From<tokio::sync::oneshot::error::RecvError> for SmartError {
    fn from(err: tokio::sync::oneshot::error::RecvError) -> Self {
        SmartError::Channel(err.to_string())
    }
}
