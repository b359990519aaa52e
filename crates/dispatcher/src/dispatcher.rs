use std::collections::BTreeSet;
use std::sync::Arc;

use metrics::{counter, gauge};
use taskhub_core::config::{DispatchSource, DispatcherConfig, MessageQueueConfig, RetryConfig};
use taskhub_core::metrics::{READY_LIST_LENGTH, TASKS_STAGED_TOTAL, WORKERS_SPAWNED_TOTAL};
use taskhub_core::{TaskHubError, TaskHubResult};
use taskhub_domain::{
    entities::{QueueDefinition, WorkerRegistration},
    ports::{MessageBroker, SharedState},
    repositories::{BacklogStore, StagePolicy},
};
use tokio::sync::broadcast;
use tracing::{debug, error, info, instrument, warn};

use crate::supervisor::{Supervisor, WorkerExit, WorkerKind};

/// 一个队列在一次调度周期内的处理结果
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueueDispatch {
    pub staged: usize,
    pub available: usize,
    pub spawned: usize,
}

/// 一次调度周期的汇总
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub staged: usize,
    pub spawned: usize,
    pub skipped_disabled: usize,
    pub failed_queues: Vec<String>,
}

/// 计算本轮最多还能为某个队列派生的Worker数
///
/// 队列上限取 `min(max_process_num, running + available)`，再受全局剩余配额约束。
pub fn spawn_quota(
    max_process_num: usize,
    running: usize,
    available: usize,
    global_running: usize,
    global_cap: usize,
) -> usize {
    if available == 0 {
        return 0;
    }
    let effective_max = max_process_num.min(running + available);
    let queue_room = effective_max.saturating_sub(running);
    let global_room = global_cap.saturating_sub(global_running);
    queue_room.min(global_room)
}

/// 调度器
///
/// 每个周期从快照（或指定的单个队列）出发，补充就绪列表、按配额派生Worker并登记。
/// 单个队列的错误只记录日志，不影响同一周期内的其他队列。
pub struct Dispatcher {
    backlog: Arc<dyn BacklogStore>,
    state: Arc<dyn SharedState>,
    supervisor: Arc<dyn Supervisor>,
    config: DispatcherConfig,
    policy: StagePolicy,
    broker: Option<(Arc<dyn MessageBroker>, MessageQueueConfig)>,
    host: String,
}

impl Dispatcher {
    pub fn new(
        backlog: Arc<dyn BacklogStore>,
        state: Arc<dyn SharedState>,
        supervisor: Arc<dyn Supervisor>,
        config: DispatcherConfig,
        host: impl Into<String>,
    ) -> Self {
        Self {
            backlog,
            state,
            supervisor,
            config,
            policy: StagePolicy::pending_only(),
            broker: None,
            host: host.into(),
        }
    }

    /// 补充就绪列表时按重试策略同时挑选到期的failed行
    pub fn with_retry(mut self, retry: &RetryConfig) -> Self {
        self.policy = StagePolicy::from_retry(retry);
        self
    }

    /// 代理来源下用于读取队列深度
    pub fn with_broker(mut self, broker: Arc<dyn MessageBroker>, config: MessageQueueConfig) -> Self {
        self.broker = Some((broker, config));
        self
    }

    pub fn config(&self) -> &DispatcherConfig {
        &self.config
    }

    /// 执行一次调度周期
    ///
    /// `only` 指定时只处理该队列，队列定义直接从backlog读取。
    /// 配置了 `block_on_workers` 时等待本进程派生的Worker全部退出后才返回。
    pub async fn run_cycle(&self, only: Option<&str>) -> TaskHubResult<CycleReport> {
        let targets = self.resolve_targets(only).await?;
        let mut global_running = self.global_running(&targets).await?;
        debug!(
            "调度周期开始: 目标队列 {} 个, 全局存活Worker {}",
            targets.len(),
            global_running
        );

        let mut report = CycleReport::default();
        for queue in &targets {
            if !queue.enabled {
                debug!("{} 已禁用，跳过", queue.entity_description());
                report.skipped_disabled += 1;
                continue;
            }

            match self.dispatch_queue(queue, &mut global_running).await {
                Ok(dispatch) => {
                    report.staged += dispatch.staged;
                    report.spawned += dispatch.spawned;
                }
                Err(e) => {
                    error!("队列 {} 调度失败: {}", queue.task_code, e);
                    report.failed_queues.push(queue.task_code.clone());
                }
            }
        }

        info!(
            "调度周期完成: 暂存 {} 条, 派生 {} 个Worker, 失败队列 {:?}",
            report.staged, report.spawned, report.failed_queues
        );

        if self.config.block_on_workers {
            self.wait_for_workers().await;
        }
        Ok(report)
    }

    async fn resolve_targets(&self, only: Option<&str>) -> TaskHubResult<Vec<QueueDefinition>> {
        if let Some(code) = only {
            let queue = self
                .backlog
                .get_queue_by_code(code)
                .await?
                .ok_or_else(|| TaskHubError::QueueNotFound {
                    code: code.to_string(),
                })?;
            return Ok(vec![queue]);
        }

        match self.state.read_snapshot().await? {
            Some(snapshot) => Ok(snapshot),
            None => {
                warn!("队列快照不存在，等待目录刷新");
                Ok(Vec::new())
            }
        }
    }

    /// 快照中所有队列与本次目标队列的存活Worker总数
    async fn global_running(&self, targets: &[QueueDefinition]) -> TaskHubResult<usize> {
        let mut codes: BTreeSet<String> = targets.iter().map(|q| q.task_code.clone()).collect();
        if let Some(snapshot) = self.state.read_snapshot().await? {
            codes.extend(snapshot.into_iter().map(|q| q.task_code));
        }

        let mut total = 0;
        for code in &codes {
            total += self.state.worker_count(code).await?;
        }
        Ok(total)
    }

    /// 处理单个已启用队列：补充工作来源并按配额派生Worker
    #[instrument(skip(self, queue, global_running), fields(task_code = %queue.task_code))]
    pub async fn dispatch_queue(
        &self,
        queue: &QueueDefinition,
        global_running: &mut usize,
    ) -> TaskHubResult<QueueDispatch> {
        let code = queue.task_code.as_str();
        let mut running = self.state.worker_count(code).await?;

        let (staged, available) = match self.config.source {
            DispatchSource::Backlog => self.top_up(code).await?,
            DispatchSource::Broker => (0, self.broker_depth(code).await?),
        };

        let quota = spawn_quota(
            queue.max_workers(),
            running,
            available,
            *global_running,
            self.config.global_max_workers,
        );
        debug!(
            "队列 {}: 存活 {}, 可用工作 {}, 上限 {}, 本轮配额 {}",
            code,
            running,
            available,
            queue.max_workers(),
            quota
        );

        let kind = WorkerKind::from(self.config.source);
        let mut spawned = 0;
        while spawned < quota {
            let handle = self.supervisor.spawn(code, kind).await?;
            let registration = WorkerRegistration {
                task_code: code.to_string(),
                host: self.host.clone(),
                pid: handle.pid,
                started_at: handle.started_at,
            };
            // 登记失败由Reaper兜底
            if let Err(e) = self.state.register_worker(&registration).await {
                warn!("登记Worker {} 失败: {}", registration.member(), e);
            }

            running += 1;
            *global_running += 1;
            spawned += 1;
            counter!(WORKERS_SPAWNED_TOTAL, "task_code" => code.to_string()).increment(1);
        }

        if spawned > 0 {
            info!("队列 {} 派生 {} 个Worker，当前存活 {}", code, spawned, running);
        }
        Ok(QueueDispatch {
            staged,
            available,
            spawned,
        })
    }

    /// 把就绪列表补到容量上限，返回（本次暂存数, 补充后长度）
    ///
    /// 行先在backlog中置为queued并提交，之后ID才推入就绪列表。
    async fn top_up(&self, code: &str) -> TaskHubResult<(usize, usize)> {
        let pending = self.backlog.count_pending(code).await?;
        let mut ready = self.state.ready_len(code).await?;
        let capacity = self.config.ready_list_capacity;

        let mut staged = 0;
        if ready < capacity {
            let ids = self
                .backlog
                .stage_pending(code, capacity - ready, &self.policy)
                .await?;
            if !ids.is_empty() {
                self.state.push_ready(code, &ids).await?;
                staged = ids.len();
                ready += staged;
                counter!(TASKS_STAGED_TOTAL, "task_code" => code.to_string())
                    .increment(staged as u64);
            }
        }

        debug!(
            "队列 {}: backlog待处理 {}, 暂存 {}, 就绪列表 {}/{}",
            code, pending, staged, ready, capacity
        );
        gauge!(READY_LIST_LENGTH, "task_code" => code.to_string()).set(ready as f64);
        Ok((staged, ready))
    }

    async fn broker_depth(&self, code: &str) -> TaskHubResult<usize> {
        let (broker, mq) = self.broker.as_ref().ok_or_else(|| {
            TaskHubError::Configuration("代理来源需要配置消息代理".to_string())
        })?;
        Ok(broker.queue_depth(&mq.queue_name(code)).await? as usize)
    }

    /// 等待所有已派生的Worker退出并注销
    pub async fn wait_for_workers(&self) {
        while let Some(exit) = self.supervisor.wait_any().await {
            self.handle_exit(exit).await;
        }
    }

    /// Worker退出后删除其登记信息
    pub async fn handle_exit(&self, exit: WorkerExit) {
        let registration = WorkerRegistration {
            task_code: exit.handle.task_code.clone(),
            host: self.host.clone(),
            pid: exit.handle.pid,
            started_at: exit.handle.started_at,
        };
        let member = registration.member();

        if exit.success {
            info!("Worker {} 已退出: {}", member, exit.detail);
        } else {
            warn!("Worker {} 异常退出: {}", member, exit.detail);
        }

        if let Err(e) = self
            .state
            .deregister_worker(&registration.task_code, &member)
            .await
        {
            warn!("注销Worker {} 失败，等待Reaper清理: {}", member, e);
        }
    }

    /// 按固定间隔循环调度，直到收到关闭信号
    pub async fn run(&self, mut shutdown: broadcast::Receiver<()>) -> TaskHubResult<()> {
        info!(
            "Dispatcher启动: 间隔 {}s, 全局上限 {}, 就绪列表容量 {}, 来源 {}",
            self.config.interval_seconds,
            self.config.global_max_workers,
            self.config.ready_list_capacity,
            self.config.source.as_str()
        );
        let mut ticker = tokio::time::interval(self.config.interval());
        let reap_inline = !self.config.block_on_workers;

        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    info!("收到关闭信号，Dispatcher停止调度");
                    break;
                }
                _ = ticker.tick() => {
                    if let Err(e) = self.run_cycle(None).await {
                        error!("调度周期失败: {}", e);
                    }
                }
                Some(exit) = self.supervisor.wait_any(), if reap_inline => {
                    self.handle_exit(exit).await;
                }
            }
        }

        let remaining = self.supervisor.active().await;
        if remaining > 0 {
            info!("仍有 {} 个Worker在运行，由Reaper负责后续清理", remaining);
        }
        Ok(())
    }
}
