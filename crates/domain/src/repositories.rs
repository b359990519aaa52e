//! 领域仓储抽象
//!
//! backlog库是任务状态的唯一可信来源，行锁是唯一的独占手段。

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use taskhub_core::config::RetryConfig;
use taskhub_core::TaskHubResult;

use crate::entities::{DedupLogEntry, QueueDefinition, TaskRecord, TaskStatus};

/// 领取一行任务的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaimOutcome {
    /// 行从queued转为running，当前Worker获得独占
    Claimed,
    /// 行存在但状态不是queued，属于良性竞争，跳过
    NotClaimable(TaskStatus),
    /// 行不存在
    Missing,
}

impl ClaimOutcome {
    pub fn is_claimed(&self) -> bool {
        matches!(self, ClaimOutcome::Claimed)
    }
}

/// 写入最终状态的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordOutcome {
    Recorded,
    /// 行已不属于本次执行：已被置为failed或由其他Worker重新领取
    OwnershipLost,
}

/// 补充就绪列表时挑选backlog行的策略
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagePolicy {
    pub requeue_failed: bool,
    pub max_retries: i32,
    pub base_delay: Duration,
}

impl StagePolicy {
    /// 只挑选pending行
    pub fn pending_only() -> Self {
        Self {
            requeue_failed: false,
            max_retries: 0,
            base_delay: Duration::ZERO,
        }
    }

    pub fn from_retry(retry: &RetryConfig) -> Self {
        Self {
            requeue_failed: retry.requeue_failed,
            max_retries: retry.max_retries,
            base_delay: Duration::from_secs(retry.base_delay_seconds),
        }
    }

    /// 已失败 `try_num` 次的行需要等待的退避时长
    pub fn backoff_for(&self, try_num: i32) -> Duration {
        let exponent = (try_num.max(1) - 1).min(16) as u32;
        self.base_delay.saturating_mul(1u32 << exponent)
    }

    /// 一条failed行在 `now` 时刻是否可以重新入队
    pub fn retry_due(&self, try_num: i32, updated_at: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        if !self.requeue_failed || try_num >= self.max_retries {
            return false;
        }
        let backoff = chrono::Duration::from_std(self.backoff_for(try_num))
            .unwrap_or(chrono::Duration::MAX);
        updated_at
            .checked_add_signed(backoff)
            .is_some_and(|due| due <= now)
    }
}

/// backlog存储抽象
#[async_trait]
pub trait BacklogStore: Send + Sync {
    async fn list_enabled_queues(&self) -> TaskHubResult<Vec<QueueDefinition>>;
    async fn get_queue_by_code(&self, task_code: &str) -> TaskHubResult<Option<QueueDefinition>>;
    async fn count_pending(&self, task_code: &str) -> TaskHubResult<i64>;

    /// 在同一事务内挑选最多 `limit` 行并置为queued，提交后返回ID。
    /// 返回的ID在提交之前不会被任何人看到。
    async fn stage_pending(
        &self,
        task_code: &str,
        limit: usize,
        policy: &StagePolicy,
    ) -> TaskHubResult<Vec<i64>>;

    /// 行锁下校验状态为queued并置为running
    async fn claim(&self, id: i64) -> TaskHubResult<ClaimOutcome>;
    async fn get_task(&self, id: i64) -> TaskHubResult<Option<TaskRecord>>;
    /// `try_num` 为包含本次在内的执行次数。
    /// 仅当行仍为running且 `try_num - 1` 与库中一致时写入，否则返回 `OwnershipLost`。
    async fn mark_done(&self, id: i64, try_num: i32) -> TaskHubResult<RecordOutcome>;
    async fn mark_failed(
        &self,
        id: i64,
        try_num: i32,
        err_msg: &str,
    ) -> TaskHubResult<RecordOutcome>;

    /// 把超过 `older_than` 未更新的running行置为failed，返回受影响的ID
    async fn fail_stale_running(&self, older_than: Duration) -> TaskHubResult<Vec<i64>>;
}

/// 代理消息去重日志抽象
#[async_trait]
pub trait DedupLog: Send + Sync {
    async fn find_by_hash(&self, msg_hash: &str) -> TaskHubResult<Option<DedupLogEntry>>;
    async fn create(&self, msg_hash: &str, group_id: i64) -> TaskHubResult<DedupLogEntry>;
    async fn mark_done(&self, id: i64, try_num: i32) -> TaskHubResult<()>;
    async fn mark_failed(&self, id: i64, try_num: i32, err_msg: &str) -> TaskHubResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> StagePolicy {
        StagePolicy {
            requeue_failed: true,
            max_retries: 3,
            base_delay: Duration::from_secs(10),
        }
    }

    #[test]
    fn test_retry_due_respects_backoff() {
        let policy = policy();
        let now = Utc::now();
        assert!(!policy.retry_due(1, now - chrono::Duration::seconds(5), now));
        assert!(policy.retry_due(1, now - chrono::Duration::seconds(10), now));
        // 第二次失败后需要等待20秒
        assert!(!policy.retry_due(2, now - chrono::Duration::seconds(15), now));
        assert!(policy.retry_due(2, now - chrono::Duration::seconds(25), now));
    }

    #[test]
    fn test_retry_abandoned_at_max() {
        let policy = policy();
        let long_ago = Utc::now() - chrono::Duration::days(1);
        assert!(!policy.retry_due(3, long_ago, Utc::now()));
        assert!(!StagePolicy::pending_only().retry_due(0, long_ago, Utc::now()));
    }

    #[test]
    fn test_policy_from_retry_config() {
        let policy = StagePolicy::from_retry(&RetryConfig::default());
        assert!(policy.requeue_failed);
        assert_eq!(policy.max_retries, 3);
        assert_eq!(policy.base_delay, Duration::from_secs(60));
    }
}
