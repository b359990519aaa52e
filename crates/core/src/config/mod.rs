//! 配置管理
//!
//! 配置按以下顺序叠加：内置默认值 → TOML配置文件 → 环境变量
//! （前缀 `TASKHUB`，层级分隔符 `__`，例如 `TASKHUB__DISPATCHER__GLOBAL_MAX_WORKERS=20`）。

pub mod models;

pub use models::*;
