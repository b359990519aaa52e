use std::env;

use taskhub_core::config::AppConfig;

#[test]
fn test_environment_overrides_file_values() {
    let file = tempfile::NamedTempFile::new().unwrap();
    std::fs::write(
        file.path(),
        r#"
[dispatcher]
global_max_workers = 3
"#,
    )
    .unwrap();

    env::set_var("TASKHUB__DISPATCHER__GLOBAL_MAX_WORKERS", "25");
    env::set_var("TASKHUB__NAMESPACE", "env-ns");
    let config = AppConfig::load(file.path().to_str()).unwrap();
    env::remove_var("TASKHUB__DISPATCHER__GLOBAL_MAX_WORKERS");
    env::remove_var("TASKHUB__NAMESPACE");

    assert_eq!(config.dispatcher.global_max_workers, 25);
    assert_eq!(config.namespace, "env-ns");
}
