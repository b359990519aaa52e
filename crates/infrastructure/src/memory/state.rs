use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use taskhub_core::{StateKeys, TaskHubError, TaskHubResult};
use taskhub_domain::{
    entities::{QueueDefinition, WorkerRegistration},
    ports::SharedState,
};
use tokio::sync::Mutex;

#[derive(Default)]
struct Inner {
    strings: HashMap<String, String>,
    lists: HashMap<String, Vec<i64>>,
    sets: HashMap<String, BTreeSet<String>>,
}

/// 按Redis键布局组织的内存共享状态
pub struct MemorySharedState {
    keys: StateKeys,
    inner: Mutex<Inner>,
    offline: AtomicBool,
}

impl MemorySharedState {
    pub fn new(namespace: &str) -> Self {
        Self {
            keys: StateKeys::new(namespace),
            inner: Mutex::new(Inner::default()),
            offline: AtomicBool::new(false),
        }
    }

    pub fn keys(&self) -> &StateKeys {
        &self.keys
    }

    /// 任意类型的键是否存在
    pub async fn key_exists(&self, key: &str) -> bool {
        let inner = self.inner.lock().await;
        inner.strings.contains_key(key)
            || inner.lists.get(key).is_some_and(|l| !l.is_empty())
            || inner.sets.get(key).is_some_and(|s| !s.is_empty())
    }

    pub async fn ready_ids(&self, task_code: &str) -> Vec<i64> {
        let inner = self.inner.lock().await;
        inner
            .lists
            .get(&self.keys.ready_list(task_code))
            .cloned()
            .unwrap_or_default()
    }

    /// 模拟Redis不可达
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    fn check(&self) -> TaskHubResult<()> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(TaskHubError::SharedState("共享状态不可用".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl SharedState for MemorySharedState {
    async fn read_snapshot(&self) -> TaskHubResult<Option<Vec<QueueDefinition>>> {
        self.check()?;
        let inner = self.inner.lock().await;
        match inner.strings.get(&self.keys.queue_snapshot()) {
            Some(json) => Ok(Some(serde_json::from_str(json)?)),
            None => Ok(None),
        }
    }

    async fn write_snapshot(&self, definitions: &[QueueDefinition]) -> TaskHubResult<()> {
        self.check()?;
        let json = serde_json::to_string(definitions)?;
        self.inner
            .lock()
            .await
            .strings
            .insert(self.keys.queue_snapshot(), json);
        Ok(())
    }

    async fn ready_len(&self, task_code: &str) -> TaskHubResult<usize> {
        self.check()?;
        let inner = self.inner.lock().await;
        Ok(inner
            .lists
            .get(&self.keys.ready_list(task_code))
            .map_or(0, Vec::len))
    }

    async fn push_ready(&self, task_code: &str, ids: &[i64]) -> TaskHubResult<()> {
        self.check()?;
        self.inner
            .lock()
            .await
            .lists
            .entry(self.keys.ready_list(task_code))
            .or_default()
            .extend_from_slice(ids);
        Ok(())
    }

    async fn pop_ready(&self, task_code: &str) -> TaskHubResult<Option<i64>> {
        self.check()?;
        let mut inner = self.inner.lock().await;
        Ok(inner
            .lists
            .get_mut(&self.keys.ready_list(task_code))
            .and_then(Vec::pop))
    }

    async fn register_worker(&self, registration: &WorkerRegistration) -> TaskHubResult<()> {
        self.check()?;
        let member = registration.member();
        let mut inner = self.inner.lock().await;
        inner
            .sets
            .entry(self.keys.worker_set(&registration.task_code))
            .or_default()
            .insert(member.clone());
        inner.strings.insert(
            self.keys.worker_queue(&member),
            registration.task_code.clone(),
        );
        inner.strings.insert(
            self.keys.worker_started_at(&member),
            registration.started_at.timestamp().to_string(),
        );
        Ok(())
    }

    async fn deregister_worker(&self, task_code: &str, member: &str) -> TaskHubResult<()> {
        self.check()?;
        let mut inner = self.inner.lock().await;
        if let Some(set) = inner.sets.get_mut(&self.keys.worker_set(task_code)) {
            set.remove(member);
        }
        inner.strings.remove(&self.keys.worker_queue(member));
        inner.strings.remove(&self.keys.worker_started_at(member));
        Ok(())
    }

    async fn worker_members(&self, task_code: &str) -> TaskHubResult<Vec<String>> {
        self.check()?;
        let inner = self.inner.lock().await;
        Ok(inner
            .sets
            .get(&self.keys.worker_set(task_code))
            .map(|s| s.iter().cloned().collect())
            .unwrap_or_default())
    }

    async fn worker_count(&self, task_code: &str) -> TaskHubResult<usize> {
        self.check()?;
        let inner = self.inner.lock().await;
        Ok(inner
            .sets
            .get(&self.keys.worker_set(task_code))
            .map_or(0, BTreeSet::len))
    }

    async fn worker_queue(&self, member: &str) -> TaskHubResult<Option<String>> {
        self.check()?;
        let inner = self.inner.lock().await;
        Ok(inner.strings.get(&self.keys.worker_queue(member)).cloned())
    }
}
