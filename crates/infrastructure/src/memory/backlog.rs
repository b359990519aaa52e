use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use taskhub_core::{TaskHubError, TaskHubResult};
use taskhub_domain::{
    entities::{sort_by_level, QueueDefinition, TaskRecord, TaskStatus},
    repositories::{BacklogStore, ClaimOutcome, RecordOutcome, StagePolicy},
};
use tokio::sync::Mutex;

use super::unavailable;

#[derive(Default)]
struct Inner {
    queues: Vec<QueueDefinition>,
    tasks: BTreeMap<i64, TaskRecord>,
    next_id: i64,
}

/// 内存backlog
///
/// 整张表由一把互斥锁保护，`claim` 的校验与切换在锁内完成，等价于行锁。
#[derive(Default)]
pub struct MemoryBacklogStore {
    inner: Mutex<Inner>,
    failing_codes: Mutex<HashSet<String>>,
    offline: AtomicBool,
}

impl MemoryBacklogStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert_queue(&self, definition: QueueDefinition) {
        let mut inner = self.inner.lock().await;
        inner.queues.retain(|q| q.task_code != definition.task_code);
        inner.queues.push(definition);
    }

    /// 插入一条任务记录，返回分配的ID
    pub async fn insert_task(&self, mut record: TaskRecord) -> i64 {
        let mut inner = self.inner.lock().await;
        inner.next_id += 1;
        record.id = inner.next_id;
        let id = record.id;
        inner.tasks.insert(id, record);
        id
    }

    pub async fn task(&self, id: i64) -> Option<TaskRecord> {
        self.inner.lock().await.tasks.get(&id).cloned()
    }

    pub async fn tasks_with_status(&self, task_code: &str, status: TaskStatus) -> Vec<TaskRecord> {
        self.inner
            .lock()
            .await
            .tasks
            .values()
            .filter(|t| t.task_code == task_code && t.status == status)
            .cloned()
            .collect()
    }

    /// 把任务的最后更新时间拨回，用于模拟退避期已过或Worker长时间失联
    pub async fn backdate(&self, id: i64, by: Duration) {
        let mut inner = self.inner.lock().await;
        if let Some(task) = inner.tasks.get_mut(&id) {
            let by = chrono::Duration::from_std(by).unwrap_or(chrono::Duration::zero());
            task.update_time -= by;
        }
    }

    /// 使指定队列的backlog操作返回错误
    pub async fn fail_queue(&self, task_code: &str) {
        self.failing_codes.lock().await.insert(task_code.to_string());
    }

    /// 模拟数据库整体不可达
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    async fn check(&self, task_code: Option<&str>) -> TaskHubResult<()> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(unavailable("backlog"));
        }
        if let Some(code) = task_code {
            if self.failing_codes.lock().await.contains(code) {
                return Err(unavailable(&format!("队列 {code} 的backlog")));
            }
        }
        Ok(())
    }

    fn stageable(task: &TaskRecord, policy: &StagePolicy, now: DateTime<Utc>) -> bool {
        match task.status {
            TaskStatus::Pending => true,
            TaskStatus::Failed => policy.retry_due(task.try_num, task.update_time, now),
            _ => false,
        }
    }
}

#[async_trait]
impl BacklogStore for MemoryBacklogStore {
    async fn list_enabled_queues(&self) -> TaskHubResult<Vec<QueueDefinition>> {
        self.check(None).await?;
        let mut queues: Vec<_> = self
            .inner
            .lock()
            .await
            .queues
            .iter()
            .filter(|q| q.enabled)
            .cloned()
            .collect();
        sort_by_level(&mut queues);
        Ok(queues)
    }

    async fn get_queue_by_code(&self, task_code: &str) -> TaskHubResult<Option<QueueDefinition>> {
        self.check(None).await?;
        Ok(self
            .inner
            .lock()
            .await
            .queues
            .iter()
            .find(|q| q.task_code == task_code)
            .cloned())
    }

    async fn count_pending(&self, task_code: &str) -> TaskHubResult<i64> {
        self.check(Some(task_code)).await?;
        let inner = self.inner.lock().await;
        Ok(inner
            .tasks
            .values()
            .filter(|t| t.task_code == task_code && t.status == TaskStatus::Pending)
            .count() as i64)
    }

    async fn stage_pending(
        &self,
        task_code: &str,
        limit: usize,
        policy: &StagePolicy,
    ) -> TaskHubResult<Vec<i64>> {
        self.check(Some(task_code)).await?;
        let now = Utc::now();
        let mut inner = self.inner.lock().await;

        let mut staged = Vec::new();
        for task in inner.tasks.values_mut() {
            if staged.len() >= limit {
                break;
            }
            if task.task_code == task_code && Self::stageable(task, policy, now) {
                task.status = TaskStatus::Queued;
                task.update_time = now;
                staged.push(task.id);
            }
        }
        Ok(staged)
    }

    async fn claim(&self, id: i64) -> TaskHubResult<ClaimOutcome> {
        self.check(None).await?;
        let mut inner = self.inner.lock().await;
        let Some(task) = inner.tasks.get_mut(&id) else {
            return Ok(ClaimOutcome::Missing);
        };
        if task.status != TaskStatus::Queued {
            return Ok(ClaimOutcome::NotClaimable(task.status));
        }
        task.status = TaskStatus::Running;
        task.update_time = Utc::now();
        Ok(ClaimOutcome::Claimed)
    }

    async fn get_task(&self, id: i64) -> TaskHubResult<Option<TaskRecord>> {
        self.check(None).await?;
        Ok(self.inner.lock().await.tasks.get(&id).cloned())
    }

    async fn mark_done(&self, id: i64, try_num: i32) -> TaskHubResult<RecordOutcome> {
        self.check(None).await?;
        let mut inner = self.inner.lock().await;
        let task = inner
            .tasks
            .get_mut(&id)
            .ok_or(TaskHubError::TaskNotFound { id })?;
        if !owned_by(task, try_num) {
            return Ok(RecordOutcome::OwnershipLost);
        }
        let now = Utc::now();
        task.status = TaskStatus::Done;
        task.try_num = try_num;
        task.err_msg = None;
        task.complete_time = Some(now);
        task.update_time = now;
        Ok(RecordOutcome::Recorded)
    }

    async fn mark_failed(
        &self,
        id: i64,
        try_num: i32,
        err_msg: &str,
    ) -> TaskHubResult<RecordOutcome> {
        self.check(None).await?;
        let mut inner = self.inner.lock().await;
        let task = inner
            .tasks
            .get_mut(&id)
            .ok_or(TaskHubError::TaskNotFound { id })?;
        if !owned_by(task, try_num) {
            return Ok(RecordOutcome::OwnershipLost);
        }
        task.status = TaskStatus::Failed;
        task.try_num = try_num;
        task.err_msg = Some(err_msg.to_string());
        task.update_time = Utc::now();
        Ok(RecordOutcome::Recorded)
    }

    async fn fail_stale_running(&self, older_than: Duration) -> TaskHubResult<Vec<i64>> {
        self.check(None).await?;
        let now = Utc::now();
        let threshold = chrono::Duration::from_std(older_than).unwrap_or(chrono::Duration::MAX);
        let mut inner = self.inner.lock().await;

        let mut failed = Vec::new();
        for task in inner.tasks.values_mut() {
            if task.status == TaskStatus::Running && now - task.update_time > threshold {
                task.try_num += 1;
                task.status = TaskStatus::Failed;
                task.err_msg = Some(format!(
                    "worker lost: running超时未更新, 已重试{}次",
                    task.try_num
                ));
                task.update_time = now;
                failed.push(task.id);
            }
        }
        Ok(failed)
    }
}

/// 与postgres实现的 `status = 'running' AND try_num = $2 - 1` 条件一致
fn owned_by(task: &TaskRecord, try_num: i32) -> bool {
    task.status == TaskStatus::Running && task.try_num == try_num - 1
}
