pub mod config;
pub mod errors;
pub mod keys;
pub mod metrics;

pub use config::AppConfig;
pub use errors::*;
pub use keys::StateKeys;
