pub mod database;
pub mod memory;
pub mod message_queue;
pub mod observability;
pub mod process_probe;
pub mod shared_state;

pub use database::*;
pub use message_queue::RabbitMQBroker;
pub use process_probe::SystemProcessProbe;
pub use shared_state::RedisSharedState;
