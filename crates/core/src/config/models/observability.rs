use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    pub log_level: String,
    pub log_format: String,
    /// Prometheus抓取端点监听地址，为空时不启动
    pub metrics_listen: Option<String>,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: "pretty".to_string(),
            metrics_listen: None,
        }
    }
}

impl ObservabilityConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&self.log_level.to_lowercase().as_str()) {
            return Err(anyhow::anyhow!(
                "无效的日志级别: {}，支持的级别: {:?}",
                self.log_level,
                valid_log_levels
            ));
        }

        if !["json", "pretty"].contains(&self.log_format.as_str()) {
            return Err(anyhow::anyhow!("不支持的日志格式: {}", self.log_format));
        }

        if let Some(addr) = &self.metrics_listen {
            addr.parse::<std::net::SocketAddr>()
                .map_err(|e| anyhow::anyhow!("无效的指标监听地址 {addr}: {e}"))?;
        }

        Ok(())
    }
}
