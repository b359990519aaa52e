#![allow(dead_code)]

use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::json;
use taskhub_core::config::{DispatcherConfig, WorkerConfig};
use taskhub_core::TaskHubResult;
use taskhub_dispatcher::{Supervisor, WorkerExit, WorkerHandle, WorkerKind};
use taskhub_domain::entities::{QueueDefinition, TaskRecord};
use taskhub_infrastructure::memory::{MemoryBacklogStore, MemorySharedState};
use taskhub_worker::{handler_fn, HandlerRegistry, PollWorker};
use tokio::sync::{watch, Mutex};
use tokio::task::JoinSet;

pub const HOST: &str = "node-test";

pub fn quiet_worker_config() -> WorkerConfig {
    WorkerConfig {
        jitter_min_ms: 0,
        jitter_max_ms: 0,
        execution_timeout_seconds: 5,
    }
}

pub fn dispatcher_config(global_max_workers: usize, ready_list_capacity: usize) -> DispatcherConfig {
    DispatcherConfig {
        interval_seconds: 1,
        global_max_workers,
        ready_list_capacity,
        worker_program: None,
        block_on_workers: false,
        ..DispatcherConfig::default()
    }
}

pub fn queue(id: i64, code: &str, level: i32, max_process_num: i32) -> QueueDefinition {
    QueueDefinition {
        level,
        ..QueueDefinition::new(id, code, max_process_num)
    }
}

pub async fn insert_tasks(backlog: &MemoryBacklogStore, code: &str, count: usize) -> Vec<i64> {
    let mut ids = Vec::with_capacity(count);
    for n in 0..count {
        let record = TaskRecord::new(code, "stock", "allocate", json!({ "line": n }));
        ids.push(backlog.insert_task(record).await);
    }
    ids
}

/// `stock.allocate` 计数后成功
pub fn counting_registry(calls: Arc<AtomicUsize>) -> Arc<HandlerRegistry> {
    let mut registry = HandlerRegistry::new();
    registry.register(
        "stock.allocate",
        handler_fn(move |_, _| {
            let calls = calls.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        }),
    );
    Arc::new(registry)
}

/// 在tokio任务中运行轮询Worker的进程监督替身
///
/// 派生出的Worker先等待闸门打开再开始领取，便于在执行前观察登记状态。
pub struct TaskSupervisor {
    backlog: Arc<MemoryBacklogStore>,
    state: Arc<MemorySharedState>,
    registry: Arc<HandlerRegistry>,
    gate: watch::Sender<bool>,
    next_pid: AtomicU32,
    children: Mutex<JoinSet<WorkerExit>>,
    spawned: std::sync::Mutex<Vec<WorkerHandle>>,
}

impl TaskSupervisor {
    pub fn new(
        backlog: Arc<MemoryBacklogStore>,
        state: Arc<MemorySharedState>,
        registry: Arc<HandlerRegistry>,
        open: bool,
    ) -> Self {
        let (gate, _) = watch::channel(open);
        Self {
            backlog,
            state,
            registry,
            gate,
            next_pid: AtomicU32::new(10_000),
            children: Mutex::new(JoinSet::new()),
            spawned: std::sync::Mutex::new(Vec::new()),
        }
    }

    pub fn release(&self) {
        self.gate.send_replace(true);
    }

    pub fn spawned(&self) -> Vec<WorkerHandle> {
        self.spawned.lock().unwrap().clone()
    }

    pub fn spawned_for(&self, code: &str) -> usize {
        self.spawned()
            .iter()
            .filter(|h| h.task_code == code)
            .count()
    }
}

#[async_trait]
impl Supervisor for TaskSupervisor {
    async fn spawn(&self, task_code: &str, kind: WorkerKind) -> TaskHubResult<WorkerHandle> {
        let handle = WorkerHandle {
            pid: self.next_pid.fetch_add(1, Ordering::SeqCst),
            task_code: task_code.to_string(),
            kind,
            started_at: Utc::now(),
        };

        let worker = PollWorker::new(
            self.backlog.clone(),
            self.state.clone(),
            self.registry.clone(),
            quiet_worker_config(),
            task_code,
        );
        let mut gate = self.gate.subscribe();
        let watched = handle.clone();
        self.children.lock().await.spawn(async move {
            let _ = gate.wait_for(|open| *open).await;
            let result = worker.run().await;
            WorkerExit {
                handle: watched,
                success: result.is_ok(),
                detail: format!("{result:?}"),
            }
        });

        self.spawned.lock().unwrap().push(handle.clone());
        Ok(handle)
    }

    async fn wait_any(&self) -> Option<WorkerExit> {
        let mut children = self.children.lock().await;
        match children.join_next().await? {
            Ok(exit) => Some(exit),
            Err(e) => panic!("worker task failed: {e}"),
        }
    }

    async fn active(&self) -> usize {
        self.children.lock().await.len()
    }
}
