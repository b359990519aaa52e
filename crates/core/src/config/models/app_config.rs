use anyhow::{Context, Result};
use config::{Config as ConfigBuilder, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::debug;

use super::{
    database::DatabaseConfig,
    dispatcher_worker::{DispatcherConfig, MaintenanceConfig, RetryConfig, WorkerConfig},
    message_queue::{MessageQueueConfig, RedisConfig},
    observability::ObservabilityConfig,
};

/// 默认配置文件搜索路径
const DEFAULT_CONFIG_PATHS: [&str; 3] = [
    "config/taskhub.toml",
    "taskhub.toml",
    "/etc/taskhub/config.toml",
];

/// System configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// 共享状态键前缀，同一Redis上的不同部署互不干扰
    pub namespace: String,
    pub database: DatabaseConfig,
    pub redis: RedisConfig,
    pub message_queue: MessageQueueConfig,
    pub dispatcher: DispatcherConfig,
    pub worker: WorkerConfig,
    pub retry: RetryConfig,
    pub maintenance: MaintenanceConfig,
    pub observability: ObservabilityConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            namespace: "taskhub".to_string(),
            database: DatabaseConfig::default(),
            redis: RedisConfig::default(),
            message_queue: MessageQueueConfig::default(),
            dispatcher: DispatcherConfig::default(),
            worker: WorkerConfig::default(),
            retry: RetryConfig::default(),
            maintenance: MaintenanceConfig::default(),
            observability: ObservabilityConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load configuration from config file and environment variables
    ///
    /// Load order:
    /// 1. Default configuration
    /// 2. Config file (TOML format)
    /// 3. Environment variable overrides (prefix: TASKHUB, separator: `__`)
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let defaults =
            ConfigBuilder::try_from(&AppConfig::default()).context("生成默认配置失败")?;
        let mut builder = ConfigBuilder::builder().add_source(defaults);

        // 1. Load config file if provided
        if let Some(path) = config_path {
            if Path::new(path).exists() {
                debug!("加载配置文件: {}", path);
                builder = builder.add_source(File::new(path, FileFormat::Toml));
            } else {
                return Err(anyhow::anyhow!("配置文件不存在: {}", path));
            }
        } else if let Some(path) = DEFAULT_CONFIG_PATHS
            .iter()
            .find(|path| Path::new(path).exists())
        {
            debug!("加载默认配置文件: {}", path);
            builder = builder.add_source(File::new(path, FileFormat::Toml));
        }

        // 2. Environment variable overrides - highest priority
        builder = builder.add_source(
            Environment::with_prefix("TASKHUB")
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

        let config: AppConfig = builder
            .build()
            .context("构建配置失败")?
            .try_deserialize()
            .context("反序列化配置失败")?;

        config.validate()?;

        Ok(config)
    }

    /// Load configuration from TOML string
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        let config: AppConfig = toml::from_str(toml_str).context("解析TOML配置失败")?;

        config.validate()?;
        Ok(config)
    }

    /// Serialize configuration to TOML string
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("序列化配置为TOML失败")
    }

    /// Validate configuration effectiveness
    pub fn validate(&self) -> Result<()> {
        if self.namespace.is_empty() || self.namespace.contains(char::is_whitespace) {
            return Err(anyhow::anyhow!("无效的命名空间: '{}'", self.namespace));
        }

        self.database.validate().context("数据库配置验证失败")?;
        self.redis.validate().context("Redis配置验证失败")?;
        self.message_queue
            .validate()
            .context("消息队列配置验证失败")?;
        self.dispatcher
            .validate()
            .context("Dispatcher配置验证失败")?;
        self.worker.validate().context("Worker配置验证失败")?;
        self.retry.validate().context("重试策略配置验证失败")?;
        self.maintenance
            .validate()
            .context("维护任务配置验证失败")?;
        self.observability
            .validate()
            .context("可观测性配置验证失败")?;

        // 僵死判定必须晚于执行时限，否则仍在执行的任务会被回收
        if self.maintenance.stale_running_seconds <= self.worker.execution_timeout_seconds {
            return Err(anyhow::anyhow!(
                "僵死任务判定时长 {}s 必须大于任务执行时限 {}s",
                self.maintenance.stale_running_seconds,
                self.worker.execution_timeout_seconds
            ));
        }

        Ok(())
    }
}
