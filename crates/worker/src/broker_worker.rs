use std::sync::Arc;

use metrics::counter;
use sha2::{Digest, Sha256};
use taskhub_core::config::{RetryConfig, WorkerConfig};
use taskhub_core::metrics::TASKS_COMPLETED_TOTAL;
use taskhub_core::{TaskHubError, TaskHubResult};
use taskhub_domain::{
    entities::{QueueDefinition, TaskStatus},
    ports::{Delivery, MessageBroker},
    repositories::{BacklogStore, DedupLog},
};
use tracing::{info, instrument, warn};

use crate::execution::{execute_guarded, jitter_sleep, TaskOutcome, WorkerSummary};
use crate::handler::{HandlerError, HandlerRegistry, TaskContext};

/// 消息内容的SHA-256十六进制摘要
pub fn content_hash(body: &[u8]) -> String {
    hex::encode(Sha256::digest(body))
}

/// 结果落库后对代理消息的答复
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Settlement {
    Ack,
    /// 否认并放回队列，等待重新投递后重试
    Requeue,
}

/// 代理型Worker
///
/// 从任务组对应的代理队列拉取消息，用内容摘要关联去重日志，
/// 结果写入去重日志之后才确认消息。处理器按队列的 `task_code` 查找。
/// 失败且未达到重试上限的消息被放回队列，达到上限后确认并停留在failed。
pub struct BrokerWorker {
    broker: Arc<dyn MessageBroker>,
    dedup: Arc<dyn DedupLog>,
    backlog: Arc<dyn BacklogStore>,
    registry: Arc<HandlerRegistry>,
    config: WorkerConfig,
    retry: RetryConfig,
    task_code: String,
    queue_name: String,
}

impl BrokerWorker {
    pub fn new(
        broker: Arc<dyn MessageBroker>,
        dedup: Arc<dyn DedupLog>,
        backlog: Arc<dyn BacklogStore>,
        registry: Arc<HandlerRegistry>,
        config: WorkerConfig,
        retry: RetryConfig,
        task_code: impl Into<String>,
        queue_name: impl Into<String>,
    ) -> Self {
        Self {
            broker,
            dedup,
            backlog,
            registry,
            config,
            retry,
            task_code: task_code.into(),
            queue_name: queue_name.into(),
        }
    }

    pub async fn run(&self) -> TaskHubResult<WorkerSummary> {
        let queue = self
            .backlog
            .get_queue_by_code(&self.task_code)
            .await?
            .ok_or_else(|| TaskHubError::QueueNotFound {
                code: self.task_code.clone(),
            })?;

        info!(
            "代理Worker启动: task_code={}, queue={}",
            self.task_code, self.queue_name
        );
        let mut summary = WorkerSummary::default();

        while let Some(delivery) = self.broker.fetch(&self.queue_name).await? {
            let (outcome, settlement) = self.process(&queue, &delivery).await?;
            match settlement {
                Settlement::Ack => self.broker.ack(delivery.delivery_tag).await?,
                Settlement::Requeue => self.broker.reject(delivery.delivery_tag, true).await?,
            }
            summary.record(outcome);

            if delivery.remaining == 0 {
                break;
            }
            jitter_sleep(&self.config).await;
        }

        info!(
            "代理队列已空，Worker退出: task_code={}, 成功={}, 失败={}, 跳过={}",
            self.task_code, summary.succeeded, summary.failed, summary.skipped
        );
        Ok(summary)
    }

    /// 执行一条消息并把结果记到去重日志，返回应对代理做出的答复
    #[instrument(skip(self, queue, delivery), fields(task_code = %self.task_code, delivery_tag = delivery.delivery_tag))]
    pub async fn process(
        &self,
        queue: &QueueDefinition,
        delivery: &Delivery,
    ) -> TaskHubResult<(TaskOutcome, Settlement)> {
        let hash = content_hash(&delivery.body);
        let entry = match self.dedup.find_by_hash(&hash).await? {
            Some(entry) => entry,
            None => self.dedup.create(&hash, queue.id).await?,
        };

        if entry.status == TaskStatus::Done {
            info!("消息 {} 已处理完成，重复投递直接确认", hash);
            return Ok((TaskOutcome::Skipped, Settlement::Ack));
        }
        if entry.status == TaskStatus::Failed && entry.try_num >= self.retry.max_retries {
            warn!(
                "消息 {} 已失败{}次，达到重试上限，不再执行",
                hash, entry.try_num
            );
            return Ok((TaskOutcome::Skipped, Settlement::Ack));
        }

        let ctx = TaskContext {
            task_code: self.task_code.clone(),
            task_id: None,
            dedup_id: Some(entry.id),
            try_num: entry.try_num,
            queue: Some(queue.clone()),
        };

        let result = match serde_json::from_slice::<serde_json::Value>(&delivery.body) {
            Ok(params) => match self.registry.resolve(&self.task_code) {
                Ok(handler) => {
                    execute_guarded(
                        handler,
                        &self.task_code,
                        params,
                        &ctx,
                        self.config.execution_timeout(),
                    )
                    .await
                }
                Err(e) => Err(HandlerError::from(e)),
            },
            Err(e) => Err(HandlerError::from(e)),
        };

        let try_num = entry.try_num + 1;
        let (outcome, settlement) = match result {
            Ok(()) => {
                self.dedup.mark_done(entry.id, try_num).await?;
                info!("消息 {} 执行成功", hash);
                (TaskOutcome::Succeeded, Settlement::Ack)
            }
            Err(err) => {
                self.dedup
                    .mark_failed(entry.id, try_num, &err.record_message(try_num))
                    .await?;
                let settlement = if self.retry.allows_retry(try_num) {
                    Settlement::Requeue
                } else {
                    Settlement::Ack
                };
                warn!(
                    "消息 {} 执行失败 (第{}次): {}, 处理: {:?}",
                    hash, try_num, err, settlement
                );
                (TaskOutcome::Failed, settlement)
            }
        };

        counter!(TASKS_COMPLETED_TOTAL, "source" => "broker", "outcome" => outcome.as_str())
            .increment(1);
        Ok((outcome, settlement))
    }
}
