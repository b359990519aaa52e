//! 共享状态键命名
//!
//! 所有键都带部署命名空间前缀，Dispatcher、Worker与Reaper必须使用同一套命名。

/// 按命名空间生成共享状态键
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateKeys {
    namespace: String,
}

impl StateKeys {
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// 队列定义快照（JSON字符串）
    pub fn queue_snapshot(&self) -> String {
        format!("{}:task_groups", self.namespace)
    }

    /// 队列的就绪列表（LIST）
    pub fn ready_list(&self, task_code: &str) -> String {
        format!("{}:ready:{}", self.namespace, task_code)
    }

    /// 队列的存活Worker集合（SET，成员为 `host:pid`）
    pub fn worker_set(&self, task_code: &str) -> String {
        format!("{}:workers:{}", self.namespace, task_code)
    }

    /// Worker成员到所属队列的反查键
    pub fn worker_queue(&self, member: &str) -> String {
        format!("{}:worker:{}:queue", self.namespace, member)
    }

    /// Worker启动时间
    pub fn worker_started_at(&self, member: &str) -> String {
        format!("{}:worker:{}:started_at", self.namespace, member)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keys_are_namespaced() {
        let keys = StateKeys::new("wms-prod");
        assert_eq!(keys.queue_snapshot(), "wms-prod:task_groups");
        assert_eq!(keys.ready_list("picking"), "wms-prod:ready:picking");
        assert_eq!(keys.worker_set("picking"), "wms-prod:workers:picking");
        assert_eq!(
            keys.worker_queue("host-a:4242"),
            "wms-prod:worker:host-a:4242:queue"
        );
        assert_eq!(
            keys.worker_started_at("host-a:4242"),
            "wms-prod:worker:host-a:4242:started_at"
        );
    }

    #[test]
    fn test_distinct_namespaces_do_not_collide() {
        let a = StateKeys::new("a");
        let b = StateKeys::new("b");
        assert_ne!(a.ready_list("q"), b.ready_list("q"));
    }
}
