use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use taskhub_core::config::AppConfig;
use taskhub_dispatcher::MaintenanceMode;
use taskhub_infrastructure::observability::init_metrics;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::app::{AppMode, Application};
use crate::shutdown::ShutdownManager;

/// 通用的应用启动配置
#[derive(Debug, Clone)]
pub struct StartupConfig {
    pub config_path: Option<String>,
    pub log_level: Option<String>,
    pub log_format: Option<String>,
}

impl StartupConfig {
    /// 命令行参数优先于配置文件中的日志设置
    pub fn init_logging(&self, config: &AppConfig) -> Result<()> {
        let level = self
            .log_level
            .as_deref()
            .unwrap_or(&config.observability.log_level);
        let format = self
            .log_format
            .as_deref()
            .unwrap_or(&config.observability.log_format);
        init_logging(level, format)
    }
}

/// 初始化日志系统
pub fn init_logging(log_level: &str, log_format: &str) -> Result<()> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    let registry = tracing_subscriber::registry().with(env_filter);

    match log_format {
        "json" => {
            registry
                .with(tracing_subscriber::fmt::layer().json())
                .try_init()
                .context("初始化JSON日志格式失败")?;
        }
        "pretty" => {
            registry
                .with(tracing_subscriber::fmt::layer().pretty())
                .try_init()
                .context("初始化Pretty日志格式失败")?;
        }
        _ => {
            return Err(anyhow::anyhow!("不支持的日志格式: {log_format}"));
        }
    }

    Ok(())
}

/// 加载配置并初始化日志与指标导出
pub fn bootstrap(startup_config: &StartupConfig) -> Result<AppConfig> {
    let config = AppConfig::load(startup_config.config_path.as_deref()).with_context(|| {
        format!(
            "加载配置失败: {}",
            startup_config.config_path.as_deref().unwrap_or("<默认路径>")
        )
    })?;
    startup_config.init_logging(&config)?;

    if let Some(listen) = &config.observability.metrics_listen {
        init_metrics(listen)?;
    }
    Ok(config)
}

/// 本机主机名，作为Worker登记成员的一部分
pub fn local_host() -> String {
    hostname::get()
        .ok()
        .and_then(|name| name.into_string().ok())
        .unwrap_or_else(|| "localhost".to_string())
}

/// 启动常驻服务，收到SIGINT/SIGTERM后优雅关闭
pub async fn start_application(
    startup_config: StartupConfig,
    app_mode: AppMode,
    service_name: &str,
) -> Result<()> {
    let config = bootstrap(&startup_config)?;

    info!("启动 {} 服务", service_name);
    info!("运行模式: {:?}", app_mode);

    let app = Arc::new(Application::new(config, app_mode, startup_config.config_path).await?);

    let shutdown_manager = ShutdownManager::new();
    let app_handle = {
        let shutdown_rx = shutdown_manager.subscribe();
        let app = Arc::clone(&app);
        tokio::spawn(async move {
            if let Err(e) = app.run(shutdown_rx).await {
                error!("应用运行失败: {e:#}");
            }
        })
    };

    wait_for_shutdown_signal().await;
    info!("收到关闭信号，开始优雅关闭...");
    shutdown_manager.shutdown();

    match tokio::time::timeout(Duration::from_secs(30), app_handle).await {
        Ok(Ok(())) => info!("{} 服务已优雅关闭", service_name),
        Ok(Err(e)) => error!("应用关闭时发生错误: {e}"),
        Err(_) => warn!("{} 服务关闭超时，强制退出", service_name),
    }

    Ok(())
}

/// 等待关闭信号
pub async fn wait_for_shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("安装Ctrl+C信号处理器失败: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("安装SIGTERM信号处理器失败: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("收到Ctrl+C信号");
        },
        _ = terminate => {
            info!("收到SIGTERM信号");
        },
    }
}

/// 解析应用运行模式
pub fn parse_app_mode(mode_str: &str) -> Result<AppMode> {
    match mode_str {
        "dispatcher" => Ok(AppMode::Dispatcher),
        "all" => Ok(AppMode::All),
        other => match other.strip_prefix("maintenance") {
            Some("") => Ok(AppMode::Maintenance(MaintenanceMode::All)),
            Some(job) => Ok(AppMode::Maintenance(
                job.trim_start_matches(':').parse::<MaintenanceMode>()?,
            )),
            None => Err(anyhow::anyhow!("不支持的运行模式: {mode_str}")),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_app_mode() {
        assert_eq!(parse_app_mode("dispatcher").unwrap(), AppMode::Dispatcher);
        assert_eq!(parse_app_mode("all").unwrap(), AppMode::All);
        assert_eq!(
            parse_app_mode("maintenance").unwrap(),
            AppMode::Maintenance(MaintenanceMode::All)
        );
        assert_eq!(
            parse_app_mode("maintenance:reap").unwrap(),
            AppMode::Maintenance(MaintenanceMode::Reap)
        );
        assert!(parse_app_mode("maintenance:cleanup").is_err());
        assert!(parse_app_mode("api").is_err());
    }

    #[test]
    fn test_local_host_not_empty() {
        assert!(!local_host().is_empty());
    }
}
