use anyhow::Result;
use clap::{Arg, ArgAction, Command};
use taskhub::common::{bootstrap, parse_app_mode, start_application, StartupConfig};
use taskhub_infrastructure::DatabaseManager;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    let matches = Command::new("taskhub")
        .version(env!("CARGO_PKG_VERSION"))
        .about("仓储作业后台的分布式任务分发系统")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("配置文件路径，缺省时依次查找 config/taskhub.toml、taskhub.toml"),
        )
        .arg(
            Arg::new("mode")
                .short('m')
                .long("mode")
                .value_name("MODE")
                .help("运行模式: dispatcher | maintenance[:refresh|reap|recover|all] | all")
                .default_value("all"),
        )
        .arg(
            Arg::new("migrate")
                .long("migrate")
                .help("执行数据库迁移后退出")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("log-level")
                .short('l')
                .long("log-level")
                .value_name("LEVEL")
                .help("日志级别，覆盖配置文件")
                .value_parser(["trace", "debug", "info", "warn", "error"]),
        )
        .arg(
            Arg::new("log-format")
                .long("log-format")
                .value_name("FORMAT")
                .help("日志格式，覆盖配置文件")
                .value_parser(["json", "pretty"]),
        )
        .get_matches();

    let startup_config = StartupConfig {
        config_path: matches.get_one::<String>("config").cloned(),
        log_level: matches.get_one::<String>("log-level").cloned(),
        log_format: matches.get_one::<String>("log-format").cloned(),
    };

    if matches.get_flag("migrate") {
        let config = bootstrap(&startup_config)?;
        let database = DatabaseManager::new(&config.database).await?;
        database.migrate().await?;
        database.close().await;
        info!("数据库迁移完成");
        return Ok(());
    }

    let mode = matches
        .get_one::<String>("mode")
        .map(String::as_str)
        .unwrap_or("all");
    let app_mode = parse_app_mode(mode)?;
    start_application(startup_config, app_mode, "TaskHub").await
}
