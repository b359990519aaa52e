//! Prometheus指标导出

use std::net::SocketAddr;

use anyhow::{Context, Result};
use metrics_exporter_prometheus::PrometheusBuilder;
use taskhub_core::metrics::describe_metrics;
use tracing::info;

/// 在 `listen` 上启动Prometheus抓取端点，必须在tokio运行时内调用
pub fn init_metrics(listen: &str) -> Result<()> {
    let addr: SocketAddr = listen
        .parse()
        .with_context(|| format!("无效的指标监听地址: {listen}"))?;

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| anyhow::anyhow!("Failed to install Prometheus exporter: {e}"))?;

    describe_metrics();
    info!("Prometheus指标导出已启动: {}", addr);
    Ok(())
}
