//! 各端口的内存实现
//!
//! 供测试和单机调试使用，行为与PostgreSQL/Redis/RabbitMQ实现保持一致：
//! 领取在同一把锁内完成校验与状态切换，就绪列表后进先出，注销可重复执行。

mod backlog;
mod broker;
mod dedup;
mod process;
mod state;

pub use backlog::MemoryBacklogStore;
pub use broker::MemoryBroker;
pub use dedup::MemoryDedupLog;
pub use process::MemoryProcessProbe;
pub use state::MemorySharedState;

use taskhub_core::TaskHubError;

pub(crate) fn unavailable(what: &str) -> TaskHubError {
    TaskHubError::Database(sqlx::Error::Protocol(format!("{what}不可用")))
}
