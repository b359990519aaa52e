use anyhow::Result;
use clap::{Arg, ArgAction, Command};
use taskhub::app::{AppMode, Application};
use taskhub::common::{bootstrap, start_application, StartupConfig};
use taskhub_dispatcher::MaintenanceMode;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    let matches = Command::new("taskhub-maintenance")
        .version(env!("CARGO_PKG_VERSION"))
        .about("TaskHub 维护进程")
        .long_about("刷新队列快照、清理本机失联Worker的登记信息、把超时的running任务记为失败")
        .arg(
            Arg::new("mode")
                .short('m')
                .long("mode")
                .value_name("MODE")
                .help("维护项")
                .value_parser(["refresh", "reap", "recover", "all"])
                .default_value("all"),
        )
        .arg(
            Arg::new("once")
                .long("once")
                .help("各项只执行一次后退出，适合由cron调用")
                .action(ArgAction::SetTrue),
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
    let mode: MaintenanceMode = matches
        .get_one::<String>("mode")
        .map(String::as_str)
        .unwrap_or("all")
        .parse()?;
    let app_mode = AppMode::Maintenance(mode);

    if !matches.get_flag("once") {
        return start_application(startup_config, app_mode, "Maintenance").await;
    }

    let config = bootstrap(&startup_config)?;
    let app = Application::new(config, app_mode, startup_config.config_path).await?;
    let result = app.maintenance().run_once(mode).await;
    app.database().close().await;

    let report = result?;
    info!(
        "维护完成: 刷新 {:?}, 清理 {:?}, 恢复 {:?}",
        report.refreshed,
        report.reaped.map(|r| r.reaped),
        report.recovered
    );
    Ok(())
}
