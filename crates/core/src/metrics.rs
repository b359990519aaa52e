//! 指标名称
//!
//! 指标通过 `metrics` 门面记录，进程未安装导出器时记录调用为空操作。

use metrics::{describe_counter, describe_gauge};

pub const WORKERS_SPAWNED_TOTAL: &str = "taskhub_workers_spawned_total";
pub const TASKS_STAGED_TOTAL: &str = "taskhub_tasks_staged_total";
pub const TASKS_COMPLETED_TOTAL: &str = "taskhub_tasks_completed_total";
pub const WORKERS_REAPED_TOTAL: &str = "taskhub_workers_reaped_total";
pub const READY_LIST_LENGTH: &str = "taskhub_ready_list_length";

/// 注册指标说明
pub fn describe_metrics() {
    describe_counter!(WORKERS_SPAWNED_TOTAL, "Dispatcher派生的Worker进程数");
    describe_counter!(TASKS_STAGED_TOTAL, "从backlog移入就绪列表的任务数");
    describe_counter!(
        TASKS_COMPLETED_TOTAL,
        "Worker记录结果的任务数，按outcome区分"
    );
    describe_counter!(WORKERS_REAPED_TOTAL, "Reaper清理的失联Worker数");
    describe_gauge!(READY_LIST_LENGTH, "补充后的就绪列表长度");
}
