pub mod postgres_backlog_store;
pub mod postgres_dedup_log;

pub use postgres_backlog_store::*;
pub use postgres_dedup_log::*;

use std::time::Duration;

use sqlx::PgPool;
use taskhub_core::config::DatabaseConfig;
use taskhub_core::TaskHubResult;
use tracing::info;

/// 数据库连接池管理器
pub struct DatabaseManager {
    pool: PgPool,
}

impl DatabaseManager {
    /// 创建新的数据库管理器
    pub async fn new(config: &DatabaseConfig) -> TaskHubResult<Self> {
        let pool = sqlx::postgres::PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(Duration::from_secs(config.connection_timeout_seconds))
            .max_lifetime(Duration::from_secs(1800)) // 30分钟默认生命周期
            .connect(&config.url)
            .await?;

        Ok(Self { pool })
    }

    /// 获取数据库连接池
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// 运行数据库迁移
    pub async fn migrate(&self) -> TaskHubResult<()> {
        sqlx::migrate!("../../migrations")
            .run(&self.pool)
            .await
            .map_err(|e| taskhub_core::TaskHubError::Database(e.into()))?;
        info!("数据库迁移完成");
        Ok(())
    }

    pub fn backlog_store(&self) -> PostgresBacklogStore {
        PostgresBacklogStore::new(self.pool.clone())
    }

    pub fn dedup_log(&self) -> PostgresDedupLog {
        PostgresDedupLog::new(self.pool.clone())
    }

    /// 关闭数据库连接池
    pub async fn close(&self) {
        self.pool.close().await;
    }
}
