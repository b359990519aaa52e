use std::sync::Arc;
use std::time::Duration;

use taskhub_core::TaskHubResult;
use taskhub_domain::repositories::BacklogStore;
use tracing::{info, warn};

/// 僵死running行恢复
///
/// Worker在执行中途崩溃后，其行会一直停在running。超过时限未更新的行
/// 记为失败并累加 `try_num`，之后由重试策略重新入队。
pub struct StaleTaskRecovery {
    backlog: Arc<dyn BacklogStore>,
    stale_after: Duration,
}

impl StaleTaskRecovery {
    pub fn new(backlog: Arc<dyn BacklogStore>, stale_after: Duration) -> Self {
        Self {
            backlog,
            stale_after,
        }
    }

    pub async fn recover_once(&self) -> TaskHubResult<Vec<i64>> {
        let ids = self.backlog.fail_stale_running(self.stale_after).await?;
        if ids.is_empty() {
            info!("没有超过 {}s 的running任务", self.stale_after.as_secs());
        } else {
            warn!("{} 个running任务超时未更新，已标记为失败: {:?}", ids.len(), ids);
        }
        Ok(ids)
    }
}
