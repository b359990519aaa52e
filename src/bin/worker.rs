use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Arg, Command};
use taskhub::common::{bootstrap, StartupConfig};
use taskhub_infrastructure::{DatabaseManager, RabbitMQBroker, RedisSharedState};
use taskhub_worker::{register_builtin, BrokerWorker, HandlerRegistry, PollWorker};
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    let matches = Command::new("taskhub-worker")
        .version(env!("CARGO_PKG_VERSION"))
        .about("TaskHub Worker进程")
        .long_about("由Dispatcher派生，处理完指定队列当前的全部工作后退出")
        .arg(
            Arg::new("queue")
                .short('q')
                .long("queue")
                .value_name("TASK_CODE")
                .help("要处理的队列")
                .required(true),
        )
        .arg(
            Arg::new("mode")
                .short('m')
                .long("mode")
                .value_name("MODE")
                .help("工作来源")
                .value_parser(["poll", "broker"])
                .default_value("poll"),
        )
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("配置文件路径"),
        )
        .arg(
            Arg::new("log-level")
                .short('l')
                .long("log-level")
                .value_name("LEVEL")
                .help("日志级别")
                .value_parser(["trace", "debug", "info", "warn", "error"]),
        )
        .arg(
            Arg::new("log-format")
                .long("log-format")
                .value_name("FORMAT")
                .help("日志格式")
                .value_parser(["json", "pretty"]),
        )
        .get_matches();

    let startup_config = StartupConfig {
        config_path: matches.get_one::<String>("config").cloned(),
        log_level: matches.get_one::<String>("log-level").cloned(),
        log_format: matches.get_one::<String>("log-format").cloned(),
    };
    let config = bootstrap(&startup_config)?;

    let queue = matches
        .get_one::<String>("queue")
        .context("缺少 --queue 参数")?;
    let mode = matches
        .get_one::<String>("mode")
        .map(String::as_str)
        .unwrap_or("poll");

    let mut registry = HandlerRegistry::new();
    register_builtin(&mut registry);
    let registry = Arc::new(registry);
    info!(
        "Worker启动: pid={}, queue={}, mode={}, 处理器 {:?}",
        std::process::id(),
        queue,
        mode,
        registry.keys()
    );

    let database = DatabaseManager::new(&config.database)
        .await
        .context("连接数据库失败")?;
    let backlog = Arc::new(database.backlog_store());

    let summary = match mode {
        "broker" => {
            let broker = Arc::new(
                RabbitMQBroker::connect(&config.message_queue)
                    .await
                    .context("连接消息代理失败")?,
            );
            let queue_name = config.message_queue.queue_name(queue);
            let worker = BrokerWorker::new(
                broker.clone(),
                Arc::new(database.dedup_log()),
                backlog,
                registry,
                config.worker.clone(),
                config.retry.clone(),
                queue.as_str(),
                queue_name,
            );
            let summary = worker.run().await;
            if let Err(e) = broker.close().await {
                warn!("关闭消息代理连接失败: {}", e);
            }
            summary
        }
        _ => {
            let state = RedisSharedState::connect(&config.redis, &config.namespace)
                .await
                .context("连接Redis失败")?;
            let worker = PollWorker::new(
                backlog,
                Arc::new(state),
                registry,
                config.worker.clone(),
                queue.as_str(),
            );
            worker.run().await
        }
    };

    database.close().await;
    let summary = summary.with_context(|| format!("队列 {queue} 的Worker异常退出"))?;
    info!(
        "Worker结束: 成功 {}, 失败 {}, 跳过 {}",
        summary.succeeded, summary.failed, summary.skipped
    );
    Ok(())
}
