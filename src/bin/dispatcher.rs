use anyhow::Result;
use clap::{Arg, Command};
use taskhub::app::{AppMode, Application};
use taskhub::common::{bootstrap, start_application, StartupConfig};
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    let matches = Command::new("taskhub-dispatcher")
        .version(env!("CARGO_PKG_VERSION"))
        .about("TaskHub Dispatcher服务")
        .long_about("按固定周期补充就绪列表并派生Worker进程；指定 --queue 时只对该队列执行一次调度")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("配置文件路径"),
        )
        .arg(
            Arg::new("queue")
                .short('q')
                .long("queue")
                .value_name("TASK_CODE")
                .help("只调度指定队列一次，等待派生的Worker退出后返回"),
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

    let Some(queue) = matches.get_one::<String>("queue") else {
        return start_application(startup_config, AppMode::Dispatcher, "Dispatcher").await;
    };

    let config = bootstrap(&startup_config)?;
    let app = Application::new(config, AppMode::Dispatcher, startup_config.config_path).await?;
    let dispatcher = app.dispatcher().await?;

    let report = dispatcher.run_cycle(Some(queue)).await?;
    info!(
        "队列 {} 单次调度: 暂存 {} 条, 派生 {} 个Worker",
        queue, report.staged, report.spawned
    );
    dispatcher.wait_for_workers().await;
    app.database().close().await;
    Ok(())
}
