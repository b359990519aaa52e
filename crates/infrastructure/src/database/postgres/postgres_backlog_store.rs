use std::time::Duration;

use async_trait::async_trait;
use sqlx::{PgPool, Row};
use taskhub_core::{TaskHubError, TaskHubResult};
use taskhub_domain::{
    entities::{QueueDefinition, TaskRecord, TaskStatus},
    repositories::{BacklogStore, ClaimOutcome, RecordOutcome, StagePolicy},
};
use tracing::{debug, instrument, warn};

const TASK_COLUMNS: &str = "id, task_code, status, service, method, params, try_num, \
                            complete_time, err_msg, create_time, update_time";

pub struct PostgresBacklogStore {
    pool: PgPool,
}

impl PostgresBacklogStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// 条件更新未命中时区分行不存在与所有权已转移
    async fn record_outcome(&self, id: i64, rows_affected: u64) -> TaskHubResult<RecordOutcome> {
        if rows_affected > 0 {
            return Ok(RecordOutcome::Recorded);
        }
        let exists: bool =
            sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM task_record WHERE id = $1)")
                .bind(id)
                .fetch_one(&self.pool)
                .await?;
        if !exists {
            return Err(TaskHubError::TaskNotFound { id });
        }
        warn!("任务 {} 已不属于当前执行，放弃写入最终状态", id);
        Ok(RecordOutcome::OwnershipLost)
    }

    fn row_to_queue(row: &sqlx::postgres::PgRow) -> TaskHubResult<QueueDefinition> {
        Ok(QueueDefinition {
            id: row.try_get("id")?,
            process_name: row.try_get("process_name")?,
            task_code: row.try_get("task_code")?,
            enabled: row.try_get("enabled")?,
            level: row.try_get("level")?,
            max_process_num: row.try_get("max_process_num")?,
        })
    }

    fn row_to_task(row: &sqlx::postgres::PgRow) -> TaskHubResult<TaskRecord> {
        Ok(TaskRecord {
            id: row.try_get("id")?,
            task_code: row.try_get("task_code")?,
            status: row.try_get("status")?,
            service: row.try_get("service")?,
            method: row.try_get("method")?,
            params: row.try_get("params")?,
            try_num: row.try_get("try_num")?,
            complete_time: row.try_get("complete_time")?,
            err_msg: row.try_get("err_msg")?,
            create_time: row.try_get("create_time")?,
            update_time: row.try_get("update_time")?,
        })
    }
}

#[async_trait]
impl BacklogStore for PostgresBacklogStore {
    #[instrument(skip(self))]
    async fn list_enabled_queues(&self) -> TaskHubResult<Vec<QueueDefinition>> {
        let rows = sqlx::query(
            "SELECT id, process_name, task_code, enabled, level, max_process_num \
             FROM task_group WHERE enabled = TRUE ORDER BY level DESC, id ASC",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::row_to_queue).collect()
    }

    #[instrument(skip(self))]
    async fn get_queue_by_code(&self, task_code: &str) -> TaskHubResult<Option<QueueDefinition>> {
        let row = sqlx::query(
            "SELECT id, process_name, task_code, enabled, level, max_process_num \
             FROM task_group WHERE task_code = $1",
        )
        .bind(task_code)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(Self::row_to_queue).transpose()
    }

    #[instrument(skip(self))]
    async fn count_pending(&self, task_code: &str) -> TaskHubResult<i64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM task_record WHERE task_code = $1 AND status = 'pending'",
        )
        .bind(task_code)
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }

    #[instrument(skip(self, policy), fields(requeue_failed = policy.requeue_failed))]
    async fn stage_pending(
        &self,
        task_code: &str,
        limit: usize,
        policy: &StagePolicy,
    ) -> TaskHubResult<Vec<i64>> {
        if limit == 0 {
            return Ok(Vec::new());
        }

        let mut tx = self.pool.begin().await?;

        // SKIP LOCKED 让并发的Dispatcher各自挑选不同的行
        let ids: Vec<i64> = sqlx::query_scalar(
            r#"
            WITH picked AS (
                SELECT id FROM task_record
                WHERE task_code = $1
                  AND (
                    status = 'pending'
                    OR (
                      $3 AND status = 'failed' AND try_num < $4
                      AND update_time <= NOW() - make_interval(
                        secs => $5::double precision
                          * power(2, LEAST(GREATEST(try_num, 1) - 1, 16))
                      )
                    )
                  )
                ORDER BY id
                LIMIT $2
                FOR UPDATE SKIP LOCKED
            )
            UPDATE task_record t
            SET status = 'queued', update_time = NOW()
            FROM picked
            WHERE t.id = picked.id
            RETURNING t.id
            "#,
        )
        .bind(task_code)
        .bind(limit as i64)
        .bind(policy.requeue_failed)
        .bind(policy.max_retries)
        .bind(policy.base_delay.as_secs_f64())
        .fetch_all(&mut *tx)
        .await?;

        tx.commit().await?;

        debug!("队列 {} 暂存 {} 条任务", task_code, ids.len());
        Ok(ids)
    }

    #[instrument(skip(self), fields(task_id = %id))]
    async fn claim(&self, id: i64) -> TaskHubResult<ClaimOutcome> {
        let mut tx = self.pool.begin().await?;

        let status: Option<TaskStatus> =
            sqlx::query_scalar("SELECT status FROM task_record WHERE id = $1 FOR UPDATE")
                .bind(id)
                .fetch_optional(&mut *tx)
                .await?;

        let outcome = match status {
            None => ClaimOutcome::Missing,
            Some(TaskStatus::Queued) => {
                sqlx::query(
                    "UPDATE task_record SET status = 'running', update_time = NOW() WHERE id = $1",
                )
                .bind(id)
                .execute(&mut *tx)
                .await?;
                ClaimOutcome::Claimed
            }
            Some(other) => ClaimOutcome::NotClaimable(other),
        };

        if outcome.is_claimed() {
            tx.commit().await?;
        } else {
            tx.rollback().await?;
            debug!("任务 {} 不可领取: {:?}", id, outcome);
        }
        Ok(outcome)
    }

    #[instrument(skip(self), fields(task_id = %id))]
    async fn get_task(&self, id: i64) -> TaskHubResult<Option<TaskRecord>> {
        let row = sqlx::query(&format!(
            "SELECT {TASK_COLUMNS} FROM task_record WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(Self::row_to_task).transpose()
    }

    #[instrument(skip(self), fields(task_id = %id))]
    async fn mark_done(&self, id: i64, try_num: i32) -> TaskHubResult<RecordOutcome> {
        let result = sqlx::query(
            "UPDATE task_record SET status = 'done', try_num = $2, err_msg = NULL, \
             complete_time = NOW(), update_time = NOW() \
             WHERE id = $1 AND status = 'running' AND try_num = $2 - 1",
        )
        .bind(id)
        .bind(try_num)
        .execute(&self.pool)
        .await?;

        self.record_outcome(id, result.rows_affected()).await
    }

    #[instrument(skip(self, err_msg), fields(task_id = %id))]
    async fn mark_failed(
        &self,
        id: i64,
        try_num: i32,
        err_msg: &str,
    ) -> TaskHubResult<RecordOutcome> {
        let result = sqlx::query(
            "UPDATE task_record SET status = 'failed', try_num = $2, err_msg = $3, \
             update_time = NOW() \
             WHERE id = $1 AND status = 'running' AND try_num = $2 - 1",
        )
        .bind(id)
        .bind(try_num)
        .bind(err_msg)
        .execute(&self.pool)
        .await?;

        self.record_outcome(id, result.rows_affected()).await
    }

    #[instrument(skip(self))]
    async fn fail_stale_running(&self, older_than: Duration) -> TaskHubResult<Vec<i64>> {
        let ids: Vec<i64> = sqlx::query_scalar(
            r#"
            UPDATE task_record
            SET status = 'failed',
                try_num = try_num + 1,
                err_msg = 'worker lost: running超时未更新, 已重试' || (try_num + 1) || '次',
                update_time = NOW()
            WHERE status = 'running'
              AND update_time < NOW() - make_interval(secs => $1::double precision)
            RETURNING id
            "#,
        )
        .bind(older_than.as_secs_f64())
        .fetch_all(&self.pool)
        .await?;

        if !ids.is_empty() {
            warn!("{} 条running任务超时未更新，已置为failed", ids.len());
        }
        Ok(ids)
    }
}
