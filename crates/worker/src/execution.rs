use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use rand::Rng;
use taskhub_core::config::WorkerConfig;

use crate::handler::{HandlerError, TaskContext, TaskHandler};

/// 单个任务的处理结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskOutcome {
    Succeeded,
    Failed,
    /// 未执行：领取失败或重复投递
    Skipped,
}

impl TaskOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskOutcome::Succeeded => "done",
            TaskOutcome::Failed => "failed",
            TaskOutcome::Skipped => "skipped",
        }
    }
}

/// 一次Worker运行的汇总
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkerSummary {
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
}

impl WorkerSummary {
    pub fn record(&mut self, outcome: TaskOutcome) {
        match outcome {
            TaskOutcome::Succeeded => self.succeeded += 1,
            TaskOutcome::Failed => self.failed += 1,
            TaskOutcome::Skipped => self.skipped += 1,
        }
    }

    pub fn executed(&self) -> usize {
        self.succeeded + self.failed
    }
}

/// 在执行时限内调用处理器，panic与超时都转换为意外失败
pub async fn execute_guarded(
    handler: Arc<dyn TaskHandler>,
    key: &str,
    params: serde_json::Value,
    ctx: &TaskContext,
    timeout: Duration,
) -> Result<(), HandlerError> {
    let guarded = AssertUnwindSafe(handler.execute(params, ctx)).catch_unwind();

    match tokio::time::timeout(timeout, guarded).await {
        Ok(Ok(result)) => result,
        Ok(Err(payload)) => Err(HandlerError::at(
            format!("处理器panic: {}", panic_message(payload.as_ref())),
            format!("handler {key}"),
        )),
        Err(_) => Err(HandlerError::at(
            format!("执行超时, 时限 {}s", timeout.as_secs_f64()),
            format!("handler {key}"),
        )),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// 两次领取之间的随机抖动
pub async fn jitter_sleep(config: &WorkerConfig) {
    let millis = if config.jitter_max_ms == 0 {
        0
    } else {
        rand::rng().random_range(config.jitter_min_ms..=config.jitter_max_ms)
    };
    if millis > 0 {
        tokio::time::sleep(Duration::from_millis(millis)).await;
    }
}
