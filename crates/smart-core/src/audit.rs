//! 审计记录
//!
//! `audited` 包裹一次操作，根据操作结果直接生成审计记录。

use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditObject {
    Rule,
    Cmdlet,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditOperation {
    Create,
    Start,
    Stop,
    Delete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditResult {
    Success,
    Failure,
}

/// 审计事件
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEvent {
    pub username: String,
    pub timestamp: i64,
    pub object_type: AuditObject,
    pub object_id: Option<i64>,
    pub operation: AuditOperation,
    pub result: AuditResult,
    pub error: Option<String>,
}

/// 审计上下文
#[derive(Debug, Clone)]
pub struct AuditContext {
    pub username: String,
    pub object_type: AuditObject,
    pub object_id: Option<i64>,
    pub operation: AuditOperation,
}

impl AuditContext {
    pub fn new(username: impl Into<String>, object_type: AuditObject, operation: AuditOperation) -> Self {
        Self {
            username: username.into(),
            object_type,
            object_id: None,
            operation,
        }
    }

    pub fn with_object_id(mut self, object_id: i64) -> Self {
        self.object_id = Some(object_id);
        self
    }

    fn into_event(self, result: AuditResult, error: Option<String>) -> AuditEvent {
        AuditEvent {
            username: self.username,
            timestamp: smart_types::now_millis(),
            object_type: self.object_type,
            object_id: self.object_id,
            operation: self.operation,
            result,
            error,
        }
    }
}

/// 内存审计日志，超过容量时丢弃最早的记录
#[derive(Clone)]
pub struct AuditLog {
    events: Arc<RwLock<VecDeque<AuditEvent>>>,
    capacity: usize,
}

impl AuditLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            events: Arc::new(RwLock::new(VecDeque::new())),
            capacity,
        }
    }

    pub async fn record(&self, event: AuditEvent) {
        info!(
            user = %event.username,
            object = ?event.object_type,
            object_id = ?event.object_id,
            operation = ?event.operation,
            result = ?event.result,
            "Audit"
        );

        let mut events = self.events.write().await;
        if events.len() >= self.capacity {
            events.pop_front();
        }
        events.push_back(event);
    }

    pub async fn events(&self) -> Vec<AuditEvent> {
        self.events.read().await.iter().cloned().collect()
    }

    /// 某个对象的全部审计记录
    pub async fn events_of(&self, object_type: AuditObject, object_id: i64) -> Vec<AuditEvent> {
        self.events
            .read()
            .await
            .iter()
            .filter(|e| e.object_type == object_type && e.object_id == Some(object_id))
            .cloned()
            .collect()
    }
}

impl Default for AuditLog {
    fn default() -> Self {
        Self::new(10_000)
    }
}

/// 执行操作并记录审计结果
pub async fn audited<T, Fut>(log: &AuditLog, ctx: AuditContext, op: Fut) -> Result<T>
where
    Fut: Future<Output = Result<T>>,
{
    let result = op.await;
    let event = match &result {
        Ok(_) => ctx.into_event(AuditResult::Success, None),
        Err(e) => ctx.into_event(AuditResult::Failure, Some(e.to_string())),
    };
    log.record(event).await;
    result
}

/// 创建类操作，成功时以返回的 ID 作为审计对象
pub async fn audited_create<Fut>(log: &AuditLog, ctx: AuditContext, op: Fut) -> Result<i64>
where
    Fut: Future<Output = Result<i64>>,
{
    let result = op.await;
    let event = match &result {
        Ok(id) => ctx.with_object_id(*id).into_event(AuditResult::Success, None),
        Err(e) => ctx.into_event(AuditResult::Failure, Some(e.to_string())),
    };
    log.record(event).await;
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SmartError;

    #[tokio::test]
    async fn test_audited_records_success_and_failure() {
        let log = AuditLog::new(10);

        let id = audited_create(
            &log,
            AuditContext::new("admin", AuditObject::Rule, AuditOperation::Create),
            async { Ok(5) },
        )
        .await
        .unwrap();
        assert_eq!(id, 5);

        let err = audited::<(), _>(
            &log,
            AuditContext::new("admin", AuditObject::Rule, AuditOperation::Delete).with_object_id(9),
            async { Err(SmartError::not_found("rule", 9)) },
        )
        .await;
        assert!(err.is_err());

        let events = log.events().await;
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].object_id, Some(5));
        assert_eq!(events[0].result, AuditResult::Success);
        assert_eq!(events[1].result, AuditResult::Failure);
        assert_eq!(events[1].error.as_deref(), Some("Not found: rule 9"));
        assert_eq!(log.events_of(AuditObject::Rule, 9).await.len(), 1);
    }

    #[tokio::test]
    async fn test_capacity_evicts_oldest() {
        let log = AuditLog::new(2);
        for id in 0..3 {
            audited(
                &log,
                AuditContext::new("u", AuditObject::Cmdlet, AuditOperation::Stop).with_object_id(id),
                async { Ok(()) },
            )
            .await
            .unwrap();
        }
        let events = log.events().await;
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].object_id, Some(1));
    }
}
