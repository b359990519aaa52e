use std::collections::HashMap;
use std::future::Future;
use std::panic::Location;
use std::sync::Arc;

use async_trait::async_trait;
use taskhub_core::{TaskHubError, TaskHubResult};
use taskhub_domain::entities::{QueueDefinition, TaskRecord};
use thiserror::Error;

/// 处理器失败分类
#[derive(Debug, Error)]
pub enum HandlerError {
    /// 可预期的业务规则失败
    #[error("{0}")]
    Business(String),

    /// 其他意外失败，附带源码位置
    #[error("{message} ({location})")]
    Unexpected { message: String, location: String },
}

impl HandlerError {
    pub fn business(message: impl Into<String>) -> Self {
        HandlerError::Business(message.into())
    }

    /// 以调用处的 `file:line` 作为位置
    #[track_caller]
    pub fn unexpected(message: impl Into<String>) -> Self {
        let caller = Location::caller();
        HandlerError::Unexpected {
            message: message.into(),
            location: format!("{}:{}", caller.file(), caller.line()),
        }
    }

    pub fn at(message: impl Into<String>, location: impl Into<String>) -> Self {
        HandlerError::Unexpected {
            message: message.into(),
            location: location.into(),
        }
    }

    pub fn is_business(&self) -> bool {
        matches!(self, HandlerError::Business(_))
    }

    /// 写入 err_msg 的文本，包含本次失败后的重试次数
    pub fn record_message(&self, try_num: i32) -> String {
        match self {
            HandlerError::Business(message) => format!("{message}, 重试次数: {try_num}"),
            HandlerError::Unexpected { message, location } => {
                format!("{message}, 位置: {location}, 重试次数: {try_num}")
            }
        }
    }
}

impl From<serde_json::Error> for HandlerError {
    #[track_caller]
    fn from(err: serde_json::Error) -> Self {
        HandlerError::unexpected(format!("参数解析失败: {err}"))
    }
}

impl From<std::io::Error> for HandlerError {
    #[track_caller]
    fn from(err: std::io::Error) -> Self {
        HandlerError::unexpected(format!("IO错误: {err}"))
    }
}

impl From<anyhow::Error> for HandlerError {
    #[track_caller]
    fn from(err: anyhow::Error) -> Self {
        HandlerError::unexpected(format!("{err:#}"))
    }
}

impl From<TaskHubError> for HandlerError {
    #[track_caller]
    fn from(err: TaskHubError) -> Self {
        HandlerError::unexpected(err.to_string())
    }
}

/// 处理器执行上下文
#[derive(Debug, Clone, Default)]
pub struct TaskContext {
    pub task_code: String,
    /// 轮询型任务的backlog行ID
    pub task_id: Option<i64>,
    /// 代理型任务的去重日志ID
    pub dedup_id: Option<i64>,
    /// 本次之前的执行次数
    pub try_num: i32,
    pub queue: Option<QueueDefinition>,
}

impl TaskContext {
    pub fn for_record(record: &TaskRecord) -> Self {
        Self {
            task_code: record.task_code.clone(),
            task_id: Some(record.id),
            dedup_id: None,
            try_num: record.try_num,
            queue: None,
        }
    }
}

/// 处理器能力接口
#[async_trait]
pub trait TaskHandler: Send + Sync {
    async fn execute(
        &self,
        params: serde_json::Value,
        ctx: &TaskContext,
    ) -> Result<(), HandlerError>;
}

/// 闭包适配的处理器
pub struct FnHandler<F>(F);

#[async_trait]
impl<F, Fut> TaskHandler for FnHandler<F>
where
    F: Fn(serde_json::Value, TaskContext) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), HandlerError>> + Send,
{
    async fn execute(
        &self,
        params: serde_json::Value,
        ctx: &TaskContext,
    ) -> Result<(), HandlerError> {
        (self.0)(params, ctx.clone()).await
    }
}

pub fn handler_fn<F, Fut>(f: F) -> Arc<dyn TaskHandler>
where
    F: Fn(serde_json::Value, TaskContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
{
    Arc::new(FnHandler(f))
}

/// 处理器注册表
///
/// 轮询型任务按 `service.method` 查找，代理型任务按队列的 `task_code` 查找。
/// 启动时填充，之后只读。
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn TaskHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, key: impl Into<String>, handler: Arc<dyn TaskHandler>) -> &mut Self {
        self.handlers.insert(key.into(), handler);
        self
    }

    pub fn get(&self, key: &str) -> Option<Arc<dyn TaskHandler>> {
        self.handlers.get(key).cloned()
    }

    pub fn resolve(&self, key: &str) -> TaskHubResult<Arc<dyn TaskHandler>> {
        self.get(key).ok_or_else(|| TaskHubError::HandlerNotFound {
            key: key.to_string(),
        })
    }

    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<_> = self.handlers.keys().cloned().collect();
        keys.sort();
        keys
    }

}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_params(raw: &str) -> Result<serde_json::Value, HandlerError> {
        Ok(serde_json::from_str(raw)?)
    }

    #[test]
    fn test_unexpected_records_caller_location() {
        let line = line!() + 1;
        let err = HandlerError::unexpected("boom");
        match err {
            HandlerError::Unexpected { location, .. } => {
                assert_eq!(location, format!("{}:{}", file!(), line));
            }
            _ => panic!("expected unexpected error"),
        }
    }

    #[test]
    fn test_question_mark_records_its_own_site() {
        let err = parse_params("{").unwrap_err();
        match err {
            HandlerError::Unexpected { message, location } => {
                assert!(message.contains("参数解析失败"));
                assert!(location.starts_with(file!()));
            }
            _ => panic!("expected unexpected error"),
        }
    }

    #[test]
    fn test_record_message_contains_retry_count() {
        let business = HandlerError::business("库存不足");
        assert_eq!(business.record_message(2), "库存不足, 重试次数: 2");
        assert!(business.is_business());

        let unexpected = HandlerError::at("连接断开", "stock.rs:10");
        let message = unexpected.record_message(1);
        assert!(message.contains("stock.rs:10"));
        assert!(message.contains("重试次数: 1"));
    }

    #[tokio::test]
    async fn test_registry_resolution() {
        let mut registry = HandlerRegistry::new();
        registry.register("stock.allocate", handler_fn(|_, _| async { Ok(()) }));

        assert_eq!(registry.keys(), vec!["stock.allocate".to_string()]);
        assert!(matches!(
            registry.resolve("stock.missing"),
            Err(TaskHubError::HandlerNotFound { .. })
        ));

        let handler = registry.resolve("stock.allocate").unwrap();
        handler
            .execute(serde_json::json!({}), &TaskContext::default())
            .await
            .unwrap();
    }
}
