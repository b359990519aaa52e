pub mod app_config;
pub mod database;
pub mod dispatcher_worker;
pub mod message_queue;
pub mod observability;

pub use app_config::AppConfig;
pub use database::DatabaseConfig;
pub use dispatcher_worker::{
    DispatchSource, DispatcherConfig, MaintenanceConfig, RetryConfig, WorkerConfig,
};
pub use message_queue::{MessageQueueConfig, RedisConfig};
pub use observability::ObservabilityConfig;
