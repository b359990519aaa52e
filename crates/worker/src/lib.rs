//! Worker进程的执行逻辑
//!
//! 轮询型Worker从就绪列表领取backlog任务，代理型Worker从消息代理拉取消息，
//! 两者共用同一套处理器注册表和失败记录约定。

pub mod broker_worker;
pub mod execution;
pub mod executors;
pub mod handler;
pub mod poll_worker;

pub use broker_worker::{content_hash, BrokerWorker, Settlement};
pub use execution::{execute_guarded, TaskOutcome, WorkerSummary};
pub use executors::register_builtin;
pub use handler::{handler_fn, HandlerError, HandlerRegistry, TaskContext, TaskHandler};
pub use poll_worker::PollWorker;
