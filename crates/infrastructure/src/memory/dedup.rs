use async_trait::async_trait;
use chrono::Utc;
use taskhub_core::{TaskHubError, TaskHubResult};
use taskhub_domain::{
    entities::{DedupLogEntry, TaskStatus},
    repositories::DedupLog,
};
use tokio::sync::Mutex;

#[derive(Default)]
pub struct MemoryDedupLog {
    entries: Mutex<Vec<DedupLogEntry>>,
}

impl MemoryDedupLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn entries(&self) -> Vec<DedupLogEntry> {
        self.entries.lock().await.clone()
    }
}

#[async_trait]
impl DedupLog for MemoryDedupLog {
    async fn find_by_hash(&self, msg_hash: &str) -> TaskHubResult<Option<DedupLogEntry>> {
        Ok(self
            .entries
            .lock()
            .await
            .iter()
            .find(|e| e.msg_hash == msg_hash)
            .cloned())
    }

    async fn create(&self, msg_hash: &str, group_id: i64) -> TaskHubResult<DedupLogEntry> {
        let mut entries = self.entries.lock().await;
        if let Some(existing) = entries.iter().find(|e| e.msg_hash == msg_hash) {
            return Ok(existing.clone());
        }

        let now = Utc::now();
        let entry = DedupLogEntry {
            id: entries.len() as i64 + 1,
            msg_hash: msg_hash.to_string(),
            group_id,
            try_num: 0,
            status: TaskStatus::Pending,
            err_msg: None,
            create_time: now,
            update_time: now,
        };
        entries.push(entry.clone());
        Ok(entry)
    }

    async fn mark_done(&self, id: i64, try_num: i32) -> TaskHubResult<()> {
        let mut entries = self.entries.lock().await;
        let entry = entries
            .iter_mut()
            .find(|e| e.id == id)
            .ok_or(TaskHubError::DedupEntryNotFound { id })?;
        entry.status = TaskStatus::Done;
        entry.try_num = try_num;
        entry.err_msg = None;
        entry.update_time = Utc::now();
        Ok(())
    }

    async fn mark_failed(&self, id: i64, try_num: i32, err_msg: &str) -> TaskHubResult<()> {
        let mut entries = self.entries.lock().await;
        let entry = entries
            .iter_mut()
            .find(|e| e.id == id)
            .ok_or(TaskHubError::DedupEntryNotFound { id })?;
        entry.status = TaskStatus::Failed;
        entry.try_num = try_num;
        entry.err_msg = Some(err_msg.to_string());
        entry.update_time = Utc::now();
        Ok(())
    }
}
