use std::sync::Arc;

use taskhub_core::TaskHubResult;
use taskhub_domain::{entities::sort_by_level, ports::SharedState, repositories::BacklogStore};
use tracing::{debug, info, instrument};

/// 队列定义快照刷新
///
/// 每次整体重建快照，backlog读取失败时不写入，旧快照继续生效。
pub struct CatalogRefresher {
    backlog: Arc<dyn BacklogStore>,
    state: Arc<dyn SharedState>,
}

impl CatalogRefresher {
    pub fn new(backlog: Arc<dyn BacklogStore>, state: Arc<dyn SharedState>) -> Self {
        Self { backlog, state }
    }

    /// 返回写入快照的队列数
    #[instrument(skip(self))]
    pub async fn refresh(&self) -> TaskHubResult<usize> {
        let mut definitions = self.backlog.list_enabled_queues().await?;
        sort_by_level(&mut definitions);

        self.state.write_snapshot(&definitions).await?;

        for definition in &definitions {
            debug!("快照队列: {}", definition.entity_description());
        }
        info!("队列快照已刷新，共 {} 个队列", definitions.len());
        Ok(definitions.len())
    }
}
