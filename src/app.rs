use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use taskhub_core::config::{AppConfig, DispatchSource};
use taskhub_dispatcher::{
    CatalogRefresher, Dispatcher, Maintenance, MaintenanceMode, ProcessSupervisor, Reaper,
    StaleTaskRecovery,
};
use taskhub_domain::{ports::SharedState, repositories::BacklogStore};
use taskhub_infrastructure::{
    DatabaseManager, RabbitMQBroker, RedisSharedState, SystemProcessProbe,
};
use tokio::sync::broadcast;
use tracing::{error, info};

use crate::common::local_host;

/// 应用运行模式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppMode {
    /// 仅运行Dispatcher
    Dispatcher,
    /// 仅运行维护任务
    Maintenance(MaintenanceMode),
    /// Dispatcher与全部维护任务
    All,
}

/// 主应用程序
pub struct Application {
    config: AppConfig,
    mode: AppMode,
    config_path: Option<String>,
    database: DatabaseManager,
    backlog: Arc<dyn BacklogStore>,
    state: Arc<dyn SharedState>,
    host: String,
}

impl Application {
    /// 建立数据库与Redis连接
    pub async fn new(config: AppConfig, mode: AppMode, config_path: Option<String>) -> Result<Self> {
        info!("初始化应用程序，模式: {:?}", mode);

        let database = DatabaseManager::new(&config.database)
            .await
            .context("连接数据库失败")?;
        let backlog: Arc<dyn BacklogStore> = Arc::new(database.backlog_store());
        let state: Arc<dyn SharedState> = Arc::new(
            RedisSharedState::connect(&config.redis, &config.namespace)
                .await
                .context("连接Redis失败")?,
        );

        Ok(Self {
            config,
            mode,
            config_path,
            database,
            backlog,
            state,
            host: local_host(),
        })
    }

    pub fn database(&self) -> &DatabaseManager {
        &self.database
    }

    /// 按配置组装Dispatcher，代理来源时同时连接消息代理
    pub async fn dispatcher(&self) -> Result<Dispatcher> {
        let supervisor = ProcessSupervisor::from_config(
            &self.config.dispatcher,
            self.config_path.clone(),
        )?;
        let mut dispatcher = Dispatcher::new(
            self.backlog.clone(),
            self.state.clone(),
            Arc::new(supervisor),
            self.config.dispatcher.clone(),
            self.host.clone(),
        );

        if self.config.retry.requeue_failed {
            dispatcher = dispatcher.with_retry(&self.config.retry);
        }
        if self.config.dispatcher.source == DispatchSource::Broker {
            let broker = RabbitMQBroker::connect(&self.config.message_queue)
                .await
                .context("连接消息代理失败")?;
            dispatcher = dispatcher.with_broker(Arc::new(broker), self.config.message_queue.clone());
        }
        Ok(dispatcher)
    }

    pub fn maintenance(&self) -> Maintenance {
        Maintenance::new(
            CatalogRefresher::new(self.backlog.clone(), self.state.clone()),
            Reaper::new(
                self.state.clone(),
                Arc::new(SystemProcessProbe::new()),
                self.host.clone(),
            ),
            StaleTaskRecovery::new(
                self.backlog.clone(),
                Duration::from_secs(self.config.maintenance.stale_running_seconds),
            ),
            self.config.maintenance.clone(),
        )
    }

    /// 运行应用程序，直到收到关闭信号
    pub async fn run(&self, shutdown_rx: broadcast::Receiver<()>) -> Result<()> {
        info!("启动应用程序，模式: {:?}, 主机: {}", self.mode, self.host);

        match self.mode {
            AppMode::Dispatcher => {
                self.dispatcher().await?.run(shutdown_rx).await?;
            }
            AppMode::Maintenance(mode) => {
                self.maintenance().run(mode, shutdown_rx).await?;
            }
            AppMode::All => {
                let dispatcher = self.dispatcher().await?;
                let maintenance = self.maintenance();
                // 先刷新一次快照，Dispatcher首个周期即可看到队列
                if let Err(e) = maintenance.run_once(MaintenanceMode::Refresh).await {
                    error!("启动时刷新队列快照失败: {}", e);
                }

                let maintenance_rx = shutdown_rx.resubscribe();
                let (dispatched, maintained) = tokio::join!(
                    dispatcher.run(shutdown_rx),
                    maintenance.run(MaintenanceMode::All, maintenance_rx),
                );
                dispatched?;
                maintained?;
            }
        }

        self.database.close().await;
        info!("应用程序已停止");
        Ok(())
    }
}
