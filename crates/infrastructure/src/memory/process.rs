use std::collections::HashSet;
use std::sync::Mutex;

use taskhub_domain::ports::ProcessProbe;

/// 由测试显式维护存活进程集合的探测器
#[derive(Default)]
pub struct MemoryProcessProbe {
    alive: Mutex<HashSet<u32>>,
}

impl MemoryProcessProbe {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn spawn(&self, pid: u32) {
        self.alive
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(pid);
    }

    pub fn kill(&self, pid: u32) {
        self.alive
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(&pid);
    }
}

impl ProcessProbe for MemoryProcessProbe {
    fn is_alive(&self, pid: u32) -> bool {
        self.alive
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .contains(&pid)
    }
}
