use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use taskhub_core::config::{DispatchSource, DispatcherConfig};
use taskhub_core::{TaskHubError, TaskHubResult};
use tokio::process::Command;
use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

/// Worker进程的工作来源
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerKind {
    Poll,
    Broker,
}

impl WorkerKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkerKind::Poll => "poll",
            WorkerKind::Broker => "broker",
        }
    }
}

impl From<DispatchSource> for WorkerKind {
    fn from(source: DispatchSource) -> Self {
        match source {
            DispatchSource::Backlog => WorkerKind::Poll,
            DispatchSource::Broker => WorkerKind::Broker,
        }
    }
}

/// 已派生Worker的句柄
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerHandle {
    pub pid: u32,
    pub task_code: String,
    pub kind: WorkerKind,
    pub started_at: DateTime<Utc>,
}

/// 子进程退出事件
#[derive(Debug, Clone)]
pub struct WorkerExit {
    pub handle: WorkerHandle,
    pub success: bool,
    pub detail: String,
}

/// Worker进程的派生与回收
#[async_trait]
pub trait Supervisor: Send + Sync {
    async fn spawn(&self, task_code: &str, kind: WorkerKind) -> TaskHubResult<WorkerHandle>;

    /// 等待任一子进程退出，没有存活子进程时立即返回 `None`
    async fn wait_any(&self) -> Option<WorkerExit>;

    /// 尚未回收的子进程数
    async fn active(&self) -> usize;
}

/// 以操作系统子进程运行Worker
pub struct ProcessSupervisor {
    program: PathBuf,
    config_path: Option<String>,
    children: Mutex<JoinSet<WorkerExit>>,
}

impl ProcessSupervisor {
    pub fn new(program: impl Into<PathBuf>, config_path: Option<String>) -> Self {
        Self {
            program: program.into(),
            config_path,
            children: Mutex::new(JoinSet::new()),
        }
    }

    /// 未配置 `worker_program` 时使用与当前程序同目录的 `taskhub-worker`
    pub fn from_config(
        config: &DispatcherConfig,
        config_path: Option<String>,
    ) -> TaskHubResult<Self> {
        let program = match &config.worker_program {
            Some(program) => PathBuf::from(program),
            None => {
                let exe = std::env::current_exe()
                    .map_err(|e| TaskHubError::Process(format!("无法定位当前程序: {e}")))?;
                let dir = exe
                    .parent()
                    .ok_or_else(|| TaskHubError::Process("当前程序没有父目录".to_string()))?;
                dir.join(format!("taskhub-worker{}", std::env::consts::EXE_SUFFIX))
            }
        };
        debug!("Worker程序: {}", program.display());
        Ok(Self::new(program, config_path))
    }

    pub fn program(&self) -> &PathBuf {
        &self.program
    }

    fn command(&self, task_code: &str, kind: WorkerKind) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.arg("--queue")
            .arg(task_code)
            .arg("--mode")
            .arg(kind.as_str())
            .stdin(Stdio::null());
        if let Some(path) = &self.config_path {
            cmd.arg("--config").arg(path);
        }
        cmd
    }
}

#[async_trait]
impl Supervisor for ProcessSupervisor {
    async fn spawn(&self, task_code: &str, kind: WorkerKind) -> TaskHubResult<WorkerHandle> {
        let mut child = self.command(task_code, kind).spawn().map_err(|e| {
            TaskHubError::Process(format!(
                "派生Worker失败 {}: {e}",
                self.program.display()
            ))
        })?;

        let pid = child
            .id()
            .ok_or_else(|| TaskHubError::Process("子进程已退出，无法获取PID".to_string()))?;
        let handle = WorkerHandle {
            pid,
            task_code: task_code.to_string(),
            kind,
            started_at: Utc::now(),
        };
        info!("派生Worker: task_code={}, pid={}, mode={}", task_code, pid, kind.as_str());

        let watched = handle.clone();
        self.children.lock().await.spawn(async move {
            match child.wait().await {
                Ok(status) => WorkerExit {
                    handle: watched,
                    success: status.success(),
                    detail: status.to_string(),
                },
                Err(e) => WorkerExit {
                    handle: watched,
                    success: false,
                    detail: format!("等待子进程失败: {e}"),
                },
            }
        });

        Ok(handle)
    }

    async fn wait_any(&self) -> Option<WorkerExit> {
        let mut children = self.children.lock().await;
        loop {
            match children.join_next().await? {
                Ok(exit) => return Some(exit),
                Err(e) => warn!("子进程监视任务异常: {}", e),
            }
        }
    }

    async fn active(&self) -> usize {
        self.children.lock().await.len()
    }
}
