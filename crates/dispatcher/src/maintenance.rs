use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use taskhub_core::config::MaintenanceConfig;
use taskhub_core::{TaskHubError, TaskHubResult};
use tokio::sync::broadcast;
use tracing::{error, info};

use crate::catalog_refresher::CatalogRefresher;
use crate::reaper::{ReapReport, Reaper};
use crate::recovery::StaleTaskRecovery;

/// 维护进程的运行模式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MaintenanceMode {
    Refresh,
    Reap,
    Recover,
    All,
}

impl MaintenanceMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            MaintenanceMode::Refresh => "refresh",
            MaintenanceMode::Reap => "reap",
            MaintenanceMode::Recover => "recover",
            MaintenanceMode::All => "all",
        }
    }

    fn includes(&self, job: MaintenanceMode) -> bool {
        *self == MaintenanceMode::All || *self == job
    }
}

impl fmt::Display for MaintenanceMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MaintenanceMode {
    type Err = TaskHubError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "refresh" => Ok(MaintenanceMode::Refresh),
            "reap" => Ok(MaintenanceMode::Reap),
            "recover" => Ok(MaintenanceMode::Recover),
            "all" => Ok(MaintenanceMode::All),
            other => Err(TaskHubError::Configuration(format!(
                "不支持的维护模式: {other}"
            ))),
        }
    }
}

/// 单次维护的结果
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MaintenanceReport {
    pub refreshed: Option<usize>,
    pub reaped: Option<ReapReport>,
    pub recovered: Option<Vec<i64>>,
}

/// 目录刷新、失联Worker清理与僵死任务恢复
pub struct Maintenance {
    refresher: CatalogRefresher,
    reaper: Reaper,
    recovery: StaleTaskRecovery,
    config: MaintenanceConfig,
}

impl Maintenance {
    pub fn new(
        refresher: CatalogRefresher,
        reaper: Reaper,
        recovery: StaleTaskRecovery,
        config: MaintenanceConfig,
    ) -> Self {
        Self {
            refresher,
            reaper,
            recovery,
            config,
        }
    }

    /// 按模式各执行一次，`all` 模式下某项失败不影响其余各项，返回第一个错误
    pub async fn run_once(&self, mode: MaintenanceMode) -> TaskHubResult<MaintenanceReport> {
        let mut report = MaintenanceReport::default();
        let mut first_error = None;

        if mode.includes(MaintenanceMode::Refresh) {
            match self.refresher.refresh().await {
                Ok(count) => report.refreshed = Some(count),
                Err(e) => {
                    error!("目录刷新失败，沿用旧快照: {}", e);
                    first_error.get_or_insert(e);
                }
            }
        }

        if mode.includes(MaintenanceMode::Reap) {
            match self.reaper.reap_once().await {
                Ok(reaped) => report.reaped = Some(reaped),
                Err(e) => {
                    error!("清理失联Worker失败: {}", e);
                    first_error.get_or_insert(e);
                }
            }
        }

        if mode.includes(MaintenanceMode::Recover) {
            match self.recovery.recover_once().await {
                Ok(ids) => report.recovered = Some(ids),
                Err(e) => {
                    error!("恢复僵死任务失败: {}", e);
                    first_error.get_or_insert(e);
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(report),
        }
    }

    /// 各项按自己的间隔循环执行，直到收到关闭信号
    pub async fn run(
        &self,
        mode: MaintenanceMode,
        mut shutdown: broadcast::Receiver<()>,
    ) -> TaskHubResult<()> {
        info!("维护进程启动: mode={}", mode);
        let mut refresh = tokio::time::interval(Duration::from_secs(
            self.config.refresh_interval_seconds,
        ));
        let mut reap = tokio::time::interval(Duration::from_secs(self.config.reap_interval_seconds));
        let mut recover = tokio::time::interval(Duration::from_secs(
            self.config.recover_interval_seconds,
        ));

        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    info!("收到关闭信号，维护进程退出");
                    break;
                }
                _ = refresh.tick(), if mode.includes(MaintenanceMode::Refresh) => {
                    if let Err(e) = self.refresher.refresh().await {
                        error!("目录刷新失败，沿用旧快照: {}", e);
                    }
                }
                _ = reap.tick(), if mode.includes(MaintenanceMode::Reap) => {
                    if let Err(e) = self.reaper.reap_once().await {
                        error!("清理失联Worker失败: {}", e);
                    }
                }
                _ = recover.tick(), if mode.includes(MaintenanceMode::Recover) => {
                    if let Err(e) = self.recovery.recover_once().await {
                        error!("恢复僵死任务失败: {}", e);
                    }
                }
            }
        }
        Ok(())
    }
}
