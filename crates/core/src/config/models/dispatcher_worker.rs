use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Dispatcher为Worker配额计数时的工作来源
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum DispatchSource {
    /// 从backlog补充就绪列表，派生轮询型Worker
    #[default]
    Backlog,
    /// 以代理队列深度计数，派生代理型Worker
    Broker,
}

impl DispatchSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            DispatchSource::Backlog => "poll",
            DispatchSource::Broker => "broker",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatcherConfig {
    pub interval_seconds: u64,
    /// 所有队列合计允许同时存活的Worker进程数
    pub global_max_workers: usize,
    /// 每个就绪列表的容量上限
    pub ready_list_capacity: usize,
    /// Worker可执行文件路径，为空时使用与当前程序同目录的 `taskhub-worker`
    pub worker_program: Option<String>,
    /// 每个调度周期派生完毕后是否阻塞等待子进程全部退出
    pub block_on_workers: bool,
    pub source: DispatchSource,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            interval_seconds: 5,
            global_max_workers: 50,
            ready_list_capacity: 100,
            worker_program: None,
            block_on_workers: true,
            source: DispatchSource::Backlog,
        }
    }
}

impl DispatcherConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.interval_seconds == 0 {
            return Err(anyhow::anyhow!("调度间隔必须大于0"));
        }

        if self.global_max_workers == 0 {
            return Err(anyhow::anyhow!("全局最大Worker数必须大于0"));
        }

        if self.ready_list_capacity == 0 {
            return Err(anyhow::anyhow!("就绪列表容量必须大于0"));
        }

        if let Some(program) = &self.worker_program {
            if program.trim().is_empty() {
                return Err(anyhow::anyhow!("Worker程序路径不能为空字符串"));
            }
        }

        Ok(())
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_seconds)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// 两次领取之间的随机抖动下限（毫秒）
    pub jitter_min_ms: u64,
    /// 两次领取之间的随机抖动上限（毫秒）
    pub jitter_max_ms: u64,
    /// 单个任务的执行时限
    pub execution_timeout_seconds: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            jitter_min_ms: 1,
            jitter_max_ms: 10,
            execution_timeout_seconds: 600,
        }
    }
}

impl WorkerConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.jitter_min_ms > self.jitter_max_ms {
            return Err(anyhow::anyhow!(
                "抖动下限 {}ms 不能大于上限 {}ms",
                self.jitter_min_ms,
                self.jitter_max_ms
            ));
        }

        if self.execution_timeout_seconds == 0 {
            return Err(anyhow::anyhow!("任务执行时限必须大于0"));
        }

        Ok(())
    }

    pub fn execution_timeout(&self) -> Duration {
        Duration::from_secs(self.execution_timeout_seconds)
    }
}

/// 失败任务的重新入队策略
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// 补充就绪列表时是否同时挑选可重试的failed行，代理型Worker据此决定是否放回失败消息
    pub requeue_failed: bool,
    /// 达到该重试次数后任务停留在failed，代理消息不再执行
    pub max_retries: i32,
    /// 指数退避的基础间隔（秒），第n次重试至少等待 base * 2^(n-1)
    pub base_delay_seconds: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            requeue_failed: true,
            max_retries: 3,
            base_delay_seconds: 60,
        }
    }
}

impl RetryConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.max_retries < 0 {
            return Err(anyhow::anyhow!("最大重试次数不能为负数"));
        }
        Ok(())
    }

    /// 判断一个失败了 `try_num` 次的任务是否还允许重试
    pub fn allows_retry(&self, try_num: i32) -> bool {
        self.requeue_failed && try_num < self.max_retries
    }
}

/// 周期性维护任务（目录刷新、进程回收、僵死任务恢复）配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MaintenanceConfig {
    pub refresh_interval_seconds: u64,
    pub reap_interval_seconds: u64,
    pub recover_interval_seconds: u64,
    /// running状态超过该时长未更新即视为Worker已丢失
    pub stale_running_seconds: u64,
}

impl Default for MaintenanceConfig {
    fn default() -> Self {
        Self {
            refresh_interval_seconds: 60,
            reap_interval_seconds: 30,
            recover_interval_seconds: 300,
            stale_running_seconds: 3600,
        }
    }
}

impl MaintenanceConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.refresh_interval_seconds == 0
            || self.reap_interval_seconds == 0
            || self.recover_interval_seconds == 0
        {
            return Err(anyhow::anyhow!("维护任务间隔必须大于0"));
        }

        if self.stale_running_seconds == 0 {
            return Err(anyhow::anyhow!("僵死任务判定时长必须大于0"));
        }

        Ok(())
    }
}
