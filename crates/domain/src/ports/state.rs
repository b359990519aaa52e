use async_trait::async_trait;
use taskhub_core::TaskHubResult;

use crate::entities::{QueueDefinition, WorkerRegistration};

/// 共享状态存储抽象
///
/// 存放队列快照、每个队列的就绪列表、Worker集合以及每个Worker的登记键。
/// 存储本身不提供事务，登记与注销都是尽力而为，由Reaper事后修正。
#[async_trait]
pub trait SharedState: Send + Sync {
    /// 读取队列快照，从未写入过时返回None
    async fn read_snapshot(&self) -> TaskHubResult<Option<Vec<QueueDefinition>>>;
    /// 整体覆盖队列快照
    async fn write_snapshot(&self, definitions: &[QueueDefinition]) -> TaskHubResult<()>;

    async fn ready_len(&self, task_code: &str) -> TaskHubResult<usize>;
    async fn push_ready(&self, task_code: &str, ids: &[i64]) -> TaskHubResult<()>;
    /// 原子地弹出一个ID，后进先出
    async fn pop_ready(&self, task_code: &str) -> TaskHubResult<Option<i64>>;

    async fn register_worker(&self, registration: &WorkerRegistration) -> TaskHubResult<()>;
    /// 删除成员及其全部登记键，重复调用不报错
    async fn deregister_worker(&self, task_code: &str, member: &str) -> TaskHubResult<()>;
    async fn worker_members(&self, task_code: &str) -> TaskHubResult<Vec<String>>;
    async fn worker_count(&self, task_code: &str) -> TaskHubResult<usize>;
    /// 反查成员所属队列
    async fn worker_queue(&self, member: &str) -> TaskHubResult<Option<String>>;
}
