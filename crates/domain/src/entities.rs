use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 队列定义（任务组）
///
/// 由运维在管理端维护，本系统只读。`task_code` 把backlog行、就绪列表键
/// 和Worker集合键关联在一起。
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct QueueDefinition {
    pub id: i64,
    pub process_name: String,
    pub task_code: String,
    pub enabled: bool,
    /// 优先级权重，只用于快照排序
    pub level: i32,
    pub max_process_num: i32,
}

impl QueueDefinition {
    pub fn new(id: i64, task_code: impl Into<String>, max_process_num: i32) -> Self {
        let task_code = task_code.into();
        Self {
            id,
            process_name: task_code.clone(),
            task_code,
            enabled: true,
            level: 0,
            max_process_num,
        }
    }

    /// 每个队列允许的Worker上限，负数按0处理
    pub fn max_workers(&self) -> usize {
        self.max_process_num.max(0) as usize
    }

    pub fn entity_description(&self) -> String {
        format!(
            "队列 '{}' (ID: {}, 编码: {})",
            self.process_name, self.id, self.task_code
        )
    }
}

/// 按权重降序排列队列定义，权重相同时按ID保持稳定顺序
pub fn sort_by_level(definitions: &mut [QueueDefinition]) {
    definitions.sort_by(|a, b| b.level.cmp(&a.level).then(a.id.cmp(&b.id)));
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Queued,
    Running,
    Done,
    Failed,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Queued => "queued",
            TaskStatus::Running => "running",
            TaskStatus::Done => "done",
            TaskStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(TaskStatus::Pending),
            "queued" => Some(TaskStatus::Queued),
            "running" => Some(TaskStatus::Running),
            "done" => Some(TaskStatus::Done),
            "failed" => Some(TaskStatus::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Done | TaskStatus::Failed)
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl sqlx::Type<sqlx::Postgres> for TaskStatus {
    fn type_info() -> sqlx::postgres::PgTypeInfo {
        sqlx::postgres::PgTypeInfo::with_name("VARCHAR")
    }

    fn compatible(ty: &sqlx::postgres::PgTypeInfo) -> bool {
        <&str as sqlx::Type<sqlx::Postgres>>::compatible(ty)
    }
}

impl<'r> sqlx::Decode<'r, sqlx::Postgres> for TaskStatus {
    fn decode(value: sqlx::postgres::PgValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let s = <&str as sqlx::Decode<sqlx::Postgres>>::decode(value)?;
        TaskStatus::parse(s).ok_or_else(|| format!("Invalid task status: {s}").into())
    }
}

impl<'q> sqlx::Encode<'q, sqlx::Postgres> for TaskStatus {
    fn encode_by_ref(
        &self,
        buf: &mut sqlx::postgres::PgArgumentBuffer,
    ) -> Result<sqlx::encode::IsNull, Box<dyn std::error::Error + Send + Sync>> {
        <&str as sqlx::Encode<sqlx::Postgres>>::encode(self.as_str(), buf)
    }
}

/// backlog中的一条任务记录
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskRecord {
    pub id: i64,
    pub task_code: String,
    pub status: TaskStatus,
    /// 处理器所属服务标识
    pub service: String,
    pub method: String,
    pub params: serde_json::Value,
    pub try_num: i32,
    pub complete_time: Option<DateTime<Utc>>,
    pub err_msg: Option<String>,
    pub create_time: DateTime<Utc>,
    pub update_time: DateTime<Utc>,
}

impl TaskRecord {
    pub fn new(
        task_code: impl Into<String>,
        service: impl Into<String>,
        method: impl Into<String>,
        params: serde_json::Value,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: 0, // 将由数据库生成
            task_code: task_code.into(),
            status: TaskStatus::Pending,
            service: service.into(),
            method: method.into(),
            params,
            try_num: 0,
            complete_time: None,
            err_msg: None,
            create_time: now,
            update_time: now,
        }
    }

    /// 处理器注册表中的查找键 `service.method`
    pub fn handler_key(&self) -> String {
        handler_key(&self.service, &self.method)
    }
}

pub fn handler_key(service: &str, method: &str) -> String {
    format!("{service}.{method}")
}

/// 代理消息的去重日志
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DedupLogEntry {
    pub id: i64,
    /// 消息内容的SHA-256十六进制摘要
    pub msg_hash: String,
    pub group_id: i64,
    pub try_num: i32,
    pub status: TaskStatus,
    pub err_msg: Option<String>,
    pub create_time: DateTime<Utc>,
    pub update_time: DateTime<Utc>,
}

/// 仅存在于共享状态中的Worker登记信息
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerRegistration {
    pub task_code: String,
    pub host: String,
    pub pid: u32,
    pub started_at: DateTime<Utc>,
}

impl WorkerRegistration {
    pub fn new(task_code: impl Into<String>, host: impl Into<String>, pid: u32) -> Self {
        Self {
            task_code: task_code.into(),
            host: host.into(),
            pid,
            started_at: Utc::now(),
        }
    }

    /// Worker集合中的成员标识 `host:pid`
    pub fn member(&self) -> String {
        format!("{}:{}", self.host, self.pid)
    }

    /// 从成员标识拆出主机名和进程号
    pub fn parse_member(member: &str) -> Option<(&str, u32)> {
        let (host, pid) = member.rsplit_once(':')?;
        let pid = pid.parse().ok()?;
        Some((host, pid))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_round_trip_through_str() {
        for status in [
            TaskStatus::Pending,
            TaskStatus::Queued,
            TaskStatus::Running,
            TaskStatus::Done,
            TaskStatus::Failed,
        ] {
            assert_eq!(TaskStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(TaskStatus::parse("DONE"), None);
        assert!(TaskStatus::Failed.is_terminal());
        assert!(!TaskStatus::Queued.is_terminal());
    }

    #[test]
    fn test_sort_by_level_descending() {
        let mut definitions = vec![
            QueueDefinition {
                level: 1,
                ..QueueDefinition::new(1, "low", 1)
            },
            QueueDefinition {
                level: 9,
                ..QueueDefinition::new(2, "high", 1)
            },
            QueueDefinition {
                level: 9,
                ..QueueDefinition::new(3, "high2", 1)
            },
        ];
        sort_by_level(&mut definitions);
        let codes: Vec<_> = definitions.iter().map(|d| d.task_code.as_str()).collect();
        assert_eq!(codes, vec!["high", "high2", "low"]);
    }

    #[test]
    fn test_worker_member_identity() {
        let registration = WorkerRegistration::new("picking", "wms-node-1", 4242);
        assert_eq!(registration.member(), "wms-node-1:4242");
        assert_eq!(
            WorkerRegistration::parse_member("wms-node-1:4242"),
            Some(("wms-node-1", 4242))
        );
        assert_eq!(WorkerRegistration::parse_member("broken"), None);
        assert_eq!(WorkerRegistration::parse_member("host:abc"), None);
    }

    #[test]
    fn test_handler_key() {
        let record = TaskRecord::new("picking", "stock", "allocate", serde_json::json!({}));
        assert_eq!(record.handler_key(), "stock.allocate");
        assert_eq!(record.status, TaskStatus::Pending);
        assert_eq!(record.try_num, 0);
    }

    #[test]
    fn test_negative_max_process_num() {
        let definition = QueueDefinition::new(1, "q", -2);
        assert_eq!(definition.max_workers(), 0);
    }
}
