pub mod postgres;

pub use postgres::{DatabaseManager, PostgresBacklogStore, PostgresDedupLog};
