use std::sync::Arc;

use metrics::counter;
use taskhub_core::config::WorkerConfig;
use taskhub_core::metrics::TASKS_COMPLETED_TOTAL;
use taskhub_core::{TaskHubError, TaskHubResult};
use taskhub_domain::{
    ports::SharedState,
    repositories::{BacklogStore, ClaimOutcome, RecordOutcome},
};
use tracing::{debug, info, instrument, warn};

use crate::execution::{execute_guarded, jitter_sleep, TaskOutcome, WorkerSummary};
use crate::handler::{HandlerError, HandlerRegistry, TaskContext};

/// 轮询型Worker
///
/// 逐个弹出就绪列表中的ID，在行锁下领取后执行，就绪列表为空时返回。
/// 基础设施错误会中止本次运行，单个任务的处理器失败只记录在该任务行上。
pub struct PollWorker {
    backlog: Arc<dyn BacklogStore>,
    state: Arc<dyn SharedState>,
    registry: Arc<HandlerRegistry>,
    config: WorkerConfig,
    task_code: String,
}

impl PollWorker {
    pub fn new(
        backlog: Arc<dyn BacklogStore>,
        state: Arc<dyn SharedState>,
        registry: Arc<HandlerRegistry>,
        config: WorkerConfig,
        task_code: impl Into<String>,
    ) -> Self {
        Self {
            backlog,
            state,
            registry,
            config,
            task_code: task_code.into(),
        }
    }

    pub fn task_code(&self) -> &str {
        &self.task_code
    }

    pub async fn run(&self) -> TaskHubResult<WorkerSummary> {
        info!("轮询Worker启动: task_code={}", self.task_code);
        let mut summary = WorkerSummary::default();

        while let Some(id) = self.state.pop_ready(&self.task_code).await? {
            let outcome = self.process(id).await?;
            summary.record(outcome);
            jitter_sleep(&self.config).await;
        }

        info!(
            "就绪列表已空，Worker退出: task_code={}, 成功={}, 失败={}, 跳过={}",
            self.task_code, summary.succeeded, summary.failed, summary.skipped
        );
        Ok(summary)
    }

    /// 处理一个已弹出的ID
    #[instrument(skip(self), fields(task_code = %self.task_code))]
    pub async fn process(&self, id: i64) -> TaskHubResult<TaskOutcome> {
        let claim = match self.backlog.claim(id).await {
            Ok(claim) => claim,
            Err(e) => {
                // 行仍是queued，放回就绪列表留给后续Worker
                if let Err(push_err) = self.state.push_ready(&self.task_code, &[id]).await {
                    warn!("任务 {} 放回就绪列表失败: {}", id, push_err);
                }
                return Err(e);
            }
        };

        match claim {
            ClaimOutcome::Claimed => {}
            ClaimOutcome::NotClaimable(status) => {
                debug!("任务 {} 当前状态为 {}，跳过", id, status);
                return Ok(TaskOutcome::Skipped);
            }
            ClaimOutcome::Missing => {
                warn!("任务 {} 不存在，跳过", id);
                return Ok(TaskOutcome::Skipped);
            }
        }

        let record = self
            .backlog
            .get_task(id)
            .await?
            .ok_or(TaskHubError::TaskNotFound { id })?;
        let key = record.handler_key();
        let ctx = TaskContext::for_record(&record);

        let result = match self.registry.resolve(&key) {
            Ok(handler) => {
                execute_guarded(
                    handler,
                    &key,
                    record.params.clone(),
                    &ctx,
                    self.config.execution_timeout(),
                )
                .await
            }
            Err(e) => Err(HandlerError::from(e)),
        };

        // try_num 记录执行次数，成功与失败都计入
        let try_num = record.try_num + 1;
        let (recorded, outcome) = match result {
            Ok(()) => (
                self.backlog.mark_done(id, try_num).await?,
                TaskOutcome::Succeeded,
            ),
            Err(err) => {
                warn!("任务 {} 执行失败 (第{}次): {}", id, try_num, err);
                (
                    self.backlog
                        .mark_failed(id, try_num, &err.record_message(try_num))
                        .await?,
                    TaskOutcome::Failed,
                )
            }
        };

        // 执行期间行被判定超时并可能已被重新领取，结果作废
        if recorded == RecordOutcome::OwnershipLost {
            warn!("任务 {} 执行期间已被回收，丢弃本次结果: {}", id, key);
            return Ok(TaskOutcome::Skipped);
        }
        if outcome == TaskOutcome::Succeeded {
            info!("任务 {} 执行成功: {}", id, key);
        }

        counter!(TASKS_COMPLETED_TOTAL, "source" => "poll", "outcome" => outcome.as_str())
            .increment(1);
        Ok(outcome)
    }
}
