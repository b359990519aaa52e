use thiserror::Error;

/// 任务分发系统错误类型定义
///
/// 这里只描述基础设施与协调层面的失败。处理器自身的业务失败
/// 由Worker记录到任务行上，不会以该类型向上传播。
#[derive(Debug, Error)]
pub enum TaskHubError {
    #[error("数据库错误: {0}")]
    Database(#[from] sqlx::Error),

    #[error("共享状态存储错误: {0}")]
    SharedState(String),

    #[error("消息队列错误: {0}")]
    MessageQueue(String),

    #[error("序列化错误: {0}")]
    Serialization(String),

    #[error("配置错误: {0}")]
    Configuration(String),

    #[error("队列定义未找到: {code}")]
    QueueNotFound { code: String },

    #[error("任务记录未找到: {id}")]
    TaskNotFound { id: i64 },

    #[error("去重日志未找到: {id}")]
    DedupEntryNotFound { id: i64 },

    #[error("处理器未注册: {key}")]
    HandlerNotFound { key: String },

    #[error("进程管理错误: {0}")]
    Process(String),

    #[error("内部错误: {0}")]
    Internal(String),
}

impl From<serde_json::Error> for TaskHubError {
    fn from(err: serde_json::Error) -> Self {
        TaskHubError::Serialization(err.to_string())
    }
}

/// 统一的Result类型
pub type TaskHubResult<T> = std::result::Result<T, TaskHubError>;
