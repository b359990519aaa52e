//! 调度侧组件
//!
//! Dispatcher补充就绪列表并按配额派生Worker进程，维护进程负责目录刷新、
//! 失联Worker清理与僵死任务恢复。各组件之间只通过共享状态和backlog库协作。

pub mod catalog_refresher;
pub mod dispatcher;
pub mod maintenance;
pub mod reaper;
pub mod recovery;
pub mod supervisor;

pub use catalog_refresher::CatalogRefresher;
pub use dispatcher::{spawn_quota, CycleReport, Dispatcher, QueueDispatch};
pub use maintenance::{Maintenance, MaintenanceMode, MaintenanceReport};
pub use reaper::{ReapReport, Reaper};
pub use recovery::StaleTaskRecovery;
pub use supervisor::{ProcessSupervisor, Supervisor, WorkerExit, WorkerHandle, WorkerKind};
