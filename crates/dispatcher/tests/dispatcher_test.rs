mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use common::*;
use taskhub_core::config::{DispatchSource, MessageQueueConfig, RetryConfig};
use taskhub_core::TaskHubError;
use taskhub_dispatcher::{CatalogRefresher, Dispatcher, WorkerKind};
use taskhub_domain::{
    entities::TaskStatus,
    ports::SharedState,
    repositories::{BacklogStore, StagePolicy},
};
use taskhub_infrastructure::memory::{MemoryBacklogStore, MemoryBroker, MemorySharedState};

struct Fixture {
    backlog: Arc<MemoryBacklogStore>,
    state: Arc<MemorySharedState>,
    calls: Arc<AtomicUsize>,
}

impl Fixture {
    fn new() -> Self {
        Self {
            backlog: Arc::new(MemoryBacklogStore::new()),
            state: Arc::new(MemorySharedState::new("test")),
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    fn supervisor(&self, open: bool) -> Arc<TaskSupervisor> {
        Arc::new(TaskSupervisor::new(
            self.backlog.clone(),
            self.state.clone(),
            counting_registry(self.calls.clone()),
            open,
        ))
    }

    fn dispatcher(
        &self,
        supervisor: Arc<TaskSupervisor>,
        global_max_workers: usize,
        ready_list_capacity: usize,
    ) -> Dispatcher {
        Dispatcher::new(
            self.backlog.clone(),
            self.state.clone(),
            supervisor,
            dispatcher_config(global_max_workers, ready_list_capacity),
            HOST,
        )
    }

    async fn refresh(&self) {
        CatalogRefresher::new(self.backlog.clone(), self.state.clone())
            .refresh()
            .await
            .unwrap();
    }
}

#[tokio::test]
async fn test_spawns_only_for_staged_work() {
    let fx = Fixture::new();
    fx.backlog.insert_queue(queue(1, "Q1", 0, 3)).await;
    let ids = insert_tasks(&fx.backlog, "Q1", 2).await;
    fx.refresh().await;

    let supervisor = fx.supervisor(false);
    let dispatcher = fx.dispatcher(supervisor.clone(), 100, 100);
    let report = dispatcher.run_cycle(None).await.unwrap();

    // max_process_num=3，但只有2条可执行
    assert_eq!(report.staged, 2);
    assert_eq!(report.spawned, 2);
    assert_eq!(fx.state.ready_len("Q1").await.unwrap(), 2);
    assert_eq!(fx.state.worker_count("Q1").await.unwrap(), 2);
    for handle in supervisor.spawned() {
        let member = format!("{HOST}:{}", handle.pid);
        assert_eq!(
            fx.state.worker_queue(&member).await.unwrap().as_deref(),
            Some("Q1")
        );
        assert_eq!(handle.kind, WorkerKind::Poll);
    }

    supervisor.release();
    dispatcher.wait_for_workers().await;

    assert_eq!(fx.calls.load(Ordering::SeqCst), 2);
    for id in ids {
        assert_eq!(fx.backlog.task(id).await.unwrap().status, TaskStatus::Done);
    }
    assert_eq!(fx.state.worker_count("Q1").await.unwrap(), 0);
    assert_eq!(fx.state.ready_len("Q1").await.unwrap(), 0);
}

#[tokio::test]
async fn test_blocking_cycle_waits_and_deregisters() {
    let fx = Fixture::new();
    fx.backlog.insert_queue(queue(1, "Q1", 0, 3)).await;
    insert_tasks(&fx.backlog, "Q1", 2).await;
    fx.refresh().await;

    let supervisor = fx.supervisor(true);
    let mut config = dispatcher_config(100, 100);
    config.block_on_workers = true;
    let dispatcher = Dispatcher::new(
        fx.backlog.clone(),
        fx.state.clone(),
        supervisor.clone(),
        config,
        HOST,
    );

    let report = dispatcher.run_cycle(None).await.unwrap();
    assert_eq!(report.spawned, 2);
    assert_eq!(fx.calls.load(Ordering::SeqCst), 2);
    assert_eq!(fx.state.worker_count("Q1").await.unwrap(), 0);
    assert_eq!(fx.backlog.tasks_with_status("Q1", TaskStatus::Done).await.len(), 2);
}

#[tokio::test]
async fn test_ready_list_capped_and_rows_queued_before_visible() {
    let fx = Fixture::new();
    fx.backlog.insert_queue(queue(1, "picking", 0, 3)).await;
    insert_tasks(&fx.backlog, "picking", 12).await;
    fx.refresh().await;

    let supervisor = fx.supervisor(false);
    let dispatcher = fx.dispatcher(supervisor.clone(), 100, 5);

    let first = dispatcher.run_cycle(None).await.unwrap();
    assert_eq!(first.staged, 5);
    assert_eq!(first.spawned, 3);

    let ready = fx.state.ready_ids("picking").await;
    assert_eq!(ready.len(), 5);
    for id in &ready {
        assert_eq!(
            fx.backlog.task(*id).await.unwrap().status,
            TaskStatus::Queued
        );
    }

    // 就绪列表已满且Worker已达上限
    let second = dispatcher.run_cycle(None).await.unwrap();
    assert_eq!(second.staged, 0);
    assert_eq!(second.spawned, 0);
    assert_eq!(fx.state.ready_len("picking").await.unwrap(), 5);
    assert_eq!(fx.backlog.count_pending("picking").await.unwrap(), 7);
    assert_eq!(supervisor.spawned_for("picking"), 3);
}

#[tokio::test]
async fn test_global_cap_shared_across_queues_in_level_order() {
    let fx = Fixture::new();
    fx.backlog.insert_queue(queue(1, "low", 1, 5)).await;
    fx.backlog.insert_queue(queue(2, "high", 9, 5)).await;
    insert_tasks(&fx.backlog, "low", 5).await;
    insert_tasks(&fx.backlog, "high", 5).await;
    fx.refresh().await;

    let supervisor = fx.supervisor(false);
    let report = fx
        .dispatcher(supervisor.clone(), 6, 100)
        .run_cycle(None)
        .await
        .unwrap();

    assert_eq!(report.spawned, 6);
    assert_eq!(supervisor.spawned_for("high"), 5);
    assert_eq!(supervisor.spawned_for("low"), 1);

    // 已登记的Worker计入全局配额
    let again = fx
        .dispatcher(supervisor.clone(), 6, 100)
        .run_cycle(None)
        .await
        .unwrap();
    assert_eq!(again.spawned, 0);
}

#[tokio::test]
async fn test_disabled_queue_is_skipped() {
    let fx = Fixture::new();
    let mut archive = queue(1, "archive", 0, 4);
    archive.enabled = false;
    insert_tasks(&fx.backlog, "archive", 3).await;
    // 快照可能在队列被禁用前生成
    fx.state.write_snapshot(&[archive]).await.unwrap();

    let supervisor = fx.supervisor(false);
    let report = fx
        .dispatcher(supervisor.clone(), 100, 100)
        .run_cycle(None)
        .await
        .unwrap();

    assert_eq!(report.skipped_disabled, 1);
    assert_eq!(report.spawned, 0);
    assert!(supervisor.spawned().is_empty());
    assert_eq!(fx.backlog.count_pending("archive").await.unwrap(), 3);
    assert_eq!(fx.state.ready_len("archive").await.unwrap(), 0);
}

#[tokio::test]
async fn test_queue_error_does_not_abort_cycle() {
    let fx = Fixture::new();
    fx.backlog.insert_queue(queue(1, "broken", 9, 2)).await;
    fx.backlog.insert_queue(queue(2, "healthy", 1, 2)).await;
    insert_tasks(&fx.backlog, "broken", 2).await;
    insert_tasks(&fx.backlog, "healthy", 2).await;
    fx.refresh().await;
    fx.backlog.fail_queue("broken").await;

    let supervisor = fx.supervisor(false);
    let report = fx
        .dispatcher(supervisor.clone(), 100, 100)
        .run_cycle(None)
        .await
        .unwrap();

    assert_eq!(report.failed_queues, vec!["broken".to_string()]);
    assert_eq!(supervisor.spawned_for("healthy"), 2);
    assert_eq!(supervisor.spawned_for("broken"), 0);
}

#[tokio::test]
async fn test_missing_snapshot_yields_empty_cycle() {
    let fx = Fixture::new();
    fx.backlog.insert_queue(queue(1, "picking", 0, 2)).await;
    insert_tasks(&fx.backlog, "picking", 2).await;

    let report = fx
        .dispatcher(fx.supervisor(false), 100, 100)
        .run_cycle(None)
        .await
        .unwrap();
    assert_eq!(report.spawned, 0);
    assert_eq!(fx.backlog.count_pending("picking").await.unwrap(), 2);
}

#[tokio::test]
async fn test_single_queue_bypasses_snapshot() {
    let fx = Fixture::new();
    fx.backlog.insert_queue(queue(1, "picking", 0, 2)).await;
    fx.backlog.insert_queue(queue(2, "packing", 0, 2)).await;
    insert_tasks(&fx.backlog, "picking", 1).await;
    insert_tasks(&fx.backlog, "packing", 1).await;

    let supervisor = fx.supervisor(false);
    let dispatcher = fx.dispatcher(supervisor.clone(), 100, 100);
    let report = dispatcher.run_cycle(Some("picking")).await.unwrap();

    assert_eq!(report.spawned, 1);
    assert_eq!(supervisor.spawned_for("picking"), 1);
    assert_eq!(fx.backlog.count_pending("packing").await.unwrap(), 1);

    let err = dispatcher.run_cycle(Some("missing")).await.unwrap_err();
    assert!(matches!(err, TaskHubError::QueueNotFound { .. }));
}

#[tokio::test]
async fn test_retry_policy_restages_failed_rows() {
    let fx = Fixture::new();
    fx.backlog.insert_queue(queue(1, "picking", 0, 1)).await;
    let ids = insert_tasks(&fx.backlog, "picking", 1).await;
    fx.refresh().await;

    // 模拟一次失败
    fx.backlog
        .stage_pending("picking", 1, &StagePolicy::pending_only())
        .await
        .unwrap();
    fx.backlog.claim(ids[0]).await.unwrap();
    fx.backlog
        .mark_failed(ids[0], 1, "库存不足, 重试次数: 1")
        .await
        .unwrap();
    fx.backlog
        .backdate(ids[0], std::time::Duration::from_secs(3600))
        .await;

    let supervisor = fx.supervisor(true);
    let without_retry = fx.dispatcher(supervisor.clone(), 100, 100);
    assert_eq!(without_retry.run_cycle(None).await.unwrap().staged, 0);

    let with_retry = fx
        .dispatcher(supervisor.clone(), 100, 100)
        .with_retry(&RetryConfig::default());
    let report = with_retry.run_cycle(None).await.unwrap();
    assert_eq!(report.staged, 1);
    with_retry.wait_for_workers().await;

    let task = fx.backlog.task(ids[0]).await.unwrap();
    assert_eq!(task.status, TaskStatus::Done);
    assert_eq!(task.try_num, 2);
}

#[tokio::test]
async fn test_broker_source_sizes_by_queue_depth() {
    let fx = Fixture::new();
    fx.backlog.insert_queue(queue(1, "outbound", 0, 5)).await;
    fx.refresh().await;

    let mq = MessageQueueConfig::default();
    let broker = Arc::new(MemoryBroker::new());
    for n in 0..3 {
        broker
            .publish(&mq.queue_name("outbound"), format!("{{\"waybill\":{n}}}"))
            .await;
    }

    let supervisor = fx.supervisor(false);
    let mut config = dispatcher_config(100, 100);
    config.source = DispatchSource::Broker;
    let dispatcher = Dispatcher::new(
        fx.backlog.clone(),
        fx.state.clone(),
        supervisor.clone(),
        config.clone(),
        HOST,
    )
    .with_broker(broker, mq);

    let report = dispatcher.run_cycle(None).await.unwrap();
    assert_eq!(report.spawned, 3);
    assert_eq!(report.staged, 0);
    assert!(supervisor
        .spawned()
        .iter()
        .all(|h| h.kind == WorkerKind::Broker));
    assert_eq!(fx.state.ready_len("outbound").await.unwrap(), 0);

    // 未配置代理时该队列调度失败
    let unconfigured = Dispatcher::new(
        fx.backlog.clone(),
        fx.state.clone(),
        fx.supervisor(false),
        config,
        HOST,
    );
    let report = unconfigured.run_cycle(None).await.unwrap();
    assert_eq!(report.failed_queues, vec!["outbound".to_string()]);
}
