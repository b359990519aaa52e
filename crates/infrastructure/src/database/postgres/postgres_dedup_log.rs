use async_trait::async_trait;
use sqlx::{PgPool, Row};
use taskhub_core::{TaskHubError, TaskHubResult};
use taskhub_domain::{entities::DedupLogEntry, repositories::DedupLog};
use tracing::{debug, instrument};

const DEDUP_COLUMNS: &str =
    "id, msg_hash, group_id, try_num, status, err_msg, create_time, update_time";

pub struct PostgresDedupLog {
    pool: PgPool,
}

impl PostgresDedupLog {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn row_to_entry(row: &sqlx::postgres::PgRow) -> TaskHubResult<DedupLogEntry> {
        Ok(DedupLogEntry {
            id: row.try_get("id")?,
            msg_hash: row.try_get("msg_hash")?,
            group_id: row.try_get("group_id")?,
            try_num: row.try_get("try_num")?,
            status: row.try_get("status")?,
            err_msg: row.try_get("err_msg")?,
            create_time: row.try_get("create_time")?,
            update_time: row.try_get("update_time")?,
        })
    }
}

#[async_trait]
impl DedupLog for PostgresDedupLog {
    #[instrument(skip(self))]
    async fn find_by_hash(&self, msg_hash: &str) -> TaskHubResult<Option<DedupLogEntry>> {
        let row = sqlx::query(&format!(
            "SELECT {DEDUP_COLUMNS} FROM task_dedup_log WHERE msg_hash = $1"
        ))
        .bind(msg_hash)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(Self::row_to_entry).transpose()
    }

    #[instrument(skip(self))]
    async fn create(&self, msg_hash: &str, group_id: i64) -> TaskHubResult<DedupLogEntry> {
        // 两个Worker同时首次看到同一消息时，后到者拿到已有的行
        let row = sqlx::query(&format!(
            "INSERT INTO task_dedup_log (msg_hash, group_id, try_num, status) \
             VALUES ($1, $2, 0, 'pending') \
             ON CONFLICT (msg_hash) DO UPDATE SET msg_hash = EXCLUDED.msg_hash \
             RETURNING {DEDUP_COLUMNS}"
        ))
        .bind(msg_hash)
        .bind(group_id)
        .fetch_one(&self.pool)
        .await?;

        let entry = Self::row_to_entry(&row)?;
        debug!("去重日志就绪: ID {}, 摘要 {}", entry.id, entry.msg_hash);
        Ok(entry)
    }

    #[instrument(skip(self))]
    async fn mark_done(&self, id: i64, try_num: i32) -> TaskHubResult<()> {
        let result = sqlx::query(
            "UPDATE task_dedup_log SET status = 'done', try_num = $2, err_msg = NULL, \
             update_time = NOW() WHERE id = $1",
        )
        .bind(id)
        .bind(try_num)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(TaskHubError::DedupEntryNotFound { id });
        }
        Ok(())
    }

    #[instrument(skip(self, err_msg))]
    async fn mark_failed(&self, id: i64, try_num: i32, err_msg: &str) -> TaskHubResult<()> {
        let result = sqlx::query(
            "UPDATE task_dedup_log SET status = 'failed', try_num = $2, err_msg = $3, \
             update_time = NOW() WHERE id = $1",
        )
        .bind(id)
        .bind(try_num)
        .bind(err_msg)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(TaskHubError::DedupEntryNotFound { id });
        }
        Ok(())
    }
}
