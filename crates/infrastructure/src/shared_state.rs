use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use taskhub_core::config::RedisConfig;
use taskhub_core::{StateKeys, TaskHubError, TaskHubResult};
use taskhub_domain::{
    entities::{QueueDefinition, WorkerRegistration},
    ports::SharedState,
};
use tracing::{debug, info};

fn redis_error(action: &str, e: redis::RedisError) -> TaskHubError {
    TaskHubError::SharedState(format!("{action}失败: {e}"))
}

/// 基于Redis的共享状态
///
/// 就绪列表用 RPUSH 写入、RPOP 取出，保持后进先出。
#[derive(Clone)]
pub struct RedisSharedState {
    conn: ConnectionManager,
    keys: StateKeys,
}

impl RedisSharedState {
    pub async fn connect(config: &RedisConfig, namespace: &str) -> TaskHubResult<Self> {
        let client = redis::Client::open(config.build_url())
            .map_err(|e| redis_error("创建Redis客户端", e))?;
        let conn = ConnectionManager::new(client)
            .await
            .map_err(|e| redis_error("连接Redis", e))?;

        info!("成功连接到Redis: {}:{}", config.host, config.port);
        Ok(Self::from_connection(conn, namespace))
    }

    pub fn from_connection(conn: ConnectionManager, namespace: &str) -> Self {
        Self {
            conn,
            keys: StateKeys::new(namespace),
        }
    }

    pub fn keys(&self) -> &StateKeys {
        &self.keys
    }
}

#[async_trait]
impl SharedState for RedisSharedState {
    async fn read_snapshot(&self) -> TaskHubResult<Option<Vec<QueueDefinition>>> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = conn
            .get(self.keys.queue_snapshot())
            .await
            .map_err(|e| redis_error("读取队列快照", e))?;

        match raw {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    async fn write_snapshot(&self, definitions: &[QueueDefinition]) -> TaskHubResult<()> {
        let json = serde_json::to_string(definitions)?;
        let mut conn = self.conn.clone();
        let _: () = conn
            .set(self.keys.queue_snapshot(), json)
            .await
            .map_err(|e| redis_error("写入队列快照", e))?;
        Ok(())
    }

    async fn ready_len(&self, task_code: &str) -> TaskHubResult<usize> {
        let mut conn = self.conn.clone();
        conn.llen(self.keys.ready_list(task_code))
            .await
            .map_err(|e| redis_error("读取就绪列表长度", e))
    }

    async fn push_ready(&self, task_code: &str, ids: &[i64]) -> TaskHubResult<()> {
        if ids.is_empty() {
            return Ok(());
        }
        let mut conn = self.conn.clone();
        let _: () = conn
            .rpush(self.keys.ready_list(task_code), ids)
            .await
            .map_err(|e| redis_error("写入就绪列表", e))?;
        debug!("就绪列表 {} 追加 {} 个ID", task_code, ids.len());
        Ok(())
    }

    async fn pop_ready(&self, task_code: &str) -> TaskHubResult<Option<i64>> {
        let mut conn = self.conn.clone();
        conn.rpop(self.keys.ready_list(task_code), None)
            .await
            .map_err(|e| redis_error("弹出就绪列表", e))
    }

    async fn register_worker(&self, registration: &WorkerRegistration) -> TaskHubResult<()> {
        let member = registration.member();
        let mut conn = self.conn.clone();
        let _: () = redis::pipe()
            .atomic()
            .sadd(self.keys.worker_set(&registration.task_code), &member)
            .set(self.keys.worker_queue(&member), &registration.task_code)
            .set(
                self.keys.worker_started_at(&member),
                registration.started_at.timestamp(),
            )
            .query_async(&mut conn)
            .await
            .map_err(|e| redis_error("登记Worker", e))?;
        Ok(())
    }

    async fn deregister_worker(&self, task_code: &str, member: &str) -> TaskHubResult<()> {
        let mut conn = self.conn.clone();
        let _: () = redis::pipe()
            .atomic()
            .srem(self.keys.worker_set(task_code), member)
            .del(self.keys.worker_queue(member))
            .del(self.keys.worker_started_at(member))
            .query_async(&mut conn)
            .await
            .map_err(|e| redis_error("注销Worker", e))?;
        Ok(())
    }

    async fn worker_members(&self, task_code: &str) -> TaskHubResult<Vec<String>> {
        let mut conn = self.conn.clone();
        conn.smembers(self.keys.worker_set(task_code))
            .await
            .map_err(|e| redis_error("读取Worker集合", e))
    }

    async fn worker_count(&self, task_code: &str) -> TaskHubResult<usize> {
        let mut conn = self.conn.clone();
        conn.scard(self.keys.worker_set(task_code))
            .await
            .map_err(|e| redis_error("统计Worker数量", e))
    }

    async fn worker_queue(&self, member: &str) -> TaskHubResult<Option<String>> {
        let mut conn = self.conn.clone();
        conn.get(self.keys.worker_queue(member))
            .await
            .map_err(|e| redis_error("反查Worker队列", e))
    }
}
