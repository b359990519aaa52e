//! 内置诊断处理器
//!
//! 业务处理器由各服务在启动时注册，这里只提供运维排障常用的几个。

use std::collections::HashMap;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::process::Command;
use tracing::info;

use crate::handler::{HandlerError, HandlerRegistry, TaskContext, TaskHandler};

pub const SHELL_KEY: &str = "builtin.shell";
pub const LOG_KEY: &str = "builtin.log";
pub const SLEEP_KEY: &str = "builtin.sleep";

/// 注册全部内置处理器
pub fn register_builtin(registry: &mut HandlerRegistry) {
    registry
        .register(SHELL_KEY, Arc::new(ShellHandler))
        .register(LOG_KEY, Arc::new(LogHandler))
        .register(SLEEP_KEY, Arc::new(SleepHandler));
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShellTaskParams {
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    pub working_dir: Option<String>,
    #[serde(default)]
    pub env_vars: HashMap<String, String>,
}

/// 执行一条外部命令，非零退出码记为业务失败
pub struct ShellHandler;

#[async_trait]
impl TaskHandler for ShellHandler {
    async fn execute(
        &self,
        params: serde_json::Value,
        ctx: &TaskContext,
    ) -> Result<(), HandlerError> {
        let params: ShellTaskParams = serde_json::from_value(params)?;

        info!(
            "执行Shell任务: task_code={}, task_id={:?}, command={}, args={:?}",
            ctx.task_code, ctx.task_id, params.command, params.args
        );

        let mut cmd = Command::new(&params.command);
        cmd.args(&params.args)
            .envs(&params.env_vars)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            // 超时后future被丢弃时一并结束子进程
            .kill_on_drop(true);
        if let Some(dir) = &params.working_dir {
            cmd.current_dir(dir);
        }

        let output = cmd.output().await?;
        if output.status.success() {
            return Ok(());
        }

        let stderr = String::from_utf8_lossy(&output.stderr);
        let stderr = stderr.trim();
        if stderr.is_empty() {
            Err(HandlerError::business(format!(
                "命令执行失败，退出码: {:?}",
                output.status.code()
            )))
        } else {
            Err(HandlerError::business(format!(
                "命令执行失败，退出码: {:?}: {stderr}",
                output.status.code()
            )))
        }
    }
}

/// 只记录参数，用于验证链路
pub struct LogHandler;

#[async_trait]
impl TaskHandler for LogHandler {
    async fn execute(
        &self,
        params: serde_json::Value,
        ctx: &TaskContext,
    ) -> Result<(), HandlerError> {
        info!(
            task_code = %ctx.task_code,
            task_id = ?ctx.task_id,
            try_num = ctx.try_num,
            "收到诊断任务: {}",
            params
        );
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct SleepParams {
    millis: u64,
}

/// 按参数休眠，用于验证执行时限
pub struct SleepHandler;

#[async_trait]
impl TaskHandler for SleepHandler {
    async fn execute(
        &self,
        params: serde_json::Value,
        _ctx: &TaskContext,
    ) -> Result<(), HandlerError> {
        let params: SleepParams = serde_json::from_value(params)?;
        tokio::time::sleep(Duration::from_millis(params.millis)).await;
        Ok(())
    }
}
