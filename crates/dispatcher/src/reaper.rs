use std::sync::Arc;

use metrics::counter;
use taskhub_core::metrics::WORKERS_REAPED_TOTAL;
use taskhub_core::TaskHubResult;
use taskhub_domain::{
    entities::WorkerRegistration,
    ports::{ProcessProbe, SharedState},
};
use tracing::{debug, error, info, warn};

/// 一次清理的结果
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReapReport {
    /// 本机登记、做过存活检查的成员数
    pub checked: usize,
    /// 已删除登记信息的成员
    pub reaped: Vec<String>,
    /// 读取或删除失败的次数
    pub errors: usize,
}

/// 失联Worker清理
///
/// 遍历快照中每个队列的Worker集合，只检查本机登记的成员，进程不存在时删除其全部登记键。
/// 删除可重复执行，与Dispatcher的正常注销并发也安全。
pub struct Reaper {
    state: Arc<dyn SharedState>,
    probe: Arc<dyn ProcessProbe>,
    host: String,
}

impl Reaper {
    pub fn new(
        state: Arc<dyn SharedState>,
        probe: Arc<dyn ProcessProbe>,
        host: impl Into<String>,
    ) -> Self {
        Self {
            state,
            probe,
            host: host.into(),
        }
    }

    pub async fn reap_once(&self) -> TaskHubResult<ReapReport> {
        let queues = self.state.read_snapshot().await?.unwrap_or_default();
        let mut report = ReapReport::default();

        for queue in &queues {
            let code = queue.task_code.as_str();
            let members = match self.state.worker_members(code).await {
                Ok(members) => members,
                Err(e) => {
                    error!("读取队列 {} 的Worker集合失败: {}", code, e);
                    report.errors += 1;
                    continue;
                }
            };

            for member in members {
                match WorkerRegistration::parse_member(&member) {
                    Some((host, _)) if host != self.host => continue,
                    Some((_, pid)) => {
                        report.checked += 1;
                        if self.probe.is_alive(pid) {
                            continue;
                        }
                        debug!("Worker {} 进程已不存在", member);
                    }
                    None => warn!("Worker集合 {} 中存在无法解析的成员: {}", code, member),
                }

                match self.state.deregister_worker(code, &member).await {
                    Ok(()) => {
                        info!("清理失联Worker: queue={}, member={}", code, member);
                        counter!(WORKERS_REAPED_TOTAL, "task_code" => code.to_string())
                            .increment(1);
                        report.reaped.push(member);
                    }
                    Err(e) => {
                        error!("清理Worker {} 失败: {}", member, e);
                        report.errors += 1;
                    }
                }
            }
        }

        if !report.reaped.is_empty() {
            info!(
                "本轮清理 {} 个失联Worker (检查 {} 个)",
                report.reaped.len(),
                report.checked
            );
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use taskhub_domain::entities::QueueDefinition;
    use taskhub_infrastructure::memory::{MemoryProcessProbe, MemorySharedState};

    async fn setup() -> (Arc<MemorySharedState>, Arc<MemoryProcessProbe>) {
        let state = Arc::new(MemorySharedState::new("test"));
        state
            .write_snapshot(&[QueueDefinition::new(1, "picking", 3)])
            .await
            .unwrap();
        (state, Arc::new(MemoryProcessProbe::new()))
    }

    #[tokio::test]
    async fn test_only_dead_local_members_are_removed() {
        let (state, probe) = setup().await;
        probe.spawn(100);
        for registration in [
            WorkerRegistration::new("picking", "node-a", 100),
            WorkerRegistration::new("picking", "node-a", 101),
            WorkerRegistration::new("picking", "node-b", 102),
        ] {
            state.register_worker(&registration).await.unwrap();
        }

        let reaper = Reaper::new(state.clone(), probe, "node-a");
        let report = reaper.reap_once().await.unwrap();

        assert_eq!(report.checked, 2);
        assert_eq!(report.reaped, vec!["node-a:101".to_string()]);
        assert_eq!(
            state.worker_members("picking").await.unwrap(),
            vec!["node-a:100".to_string(), "node-b:102".to_string()]
        );
    }

    #[tokio::test]
    async fn test_second_run_is_noop() {
        let (state, probe) = setup().await;
        state
            .register_worker(&WorkerRegistration::new("picking", "node-a", 7))
            .await
            .unwrap();

        let reaper = Reaper::new(state.clone(), probe, "node-a");
        assert_eq!(reaper.reap_once().await.unwrap().reaped.len(), 1);

        let second = reaper.reap_once().await.unwrap();
        assert!(second.reaped.is_empty());
        assert_eq!(second.errors, 0);
        assert!(!state.key_exists(&state.keys().worker_queue("node-a:7")).await);
    }

    #[tokio::test]
    async fn test_unreachable_state_fails_sweep() {
        let (state, probe) = setup().await;
        let reaper = Reaper::new(state.clone(), probe, "node-a");
        state.set_offline(true);
        assert!(reaper.reap_once().await.is_err());
    }

    #[tokio::test]
    async fn test_missing_snapshot_is_a_noop() {
        let state = Arc::new(MemorySharedState::new("test"));
        let reaper = Reaper::new(state, Arc::new(MemoryProcessProbe::new()), "node-a");
        assert_eq!(reaper.reap_once().await.unwrap(), ReapReport::default());
    }
}
