use std::sync::Mutex;

use sysinfo::{Pid, ProcessRefreshKind, ProcessStatus, ProcessesToUpdate, RefreshKind, System};
use taskhub_domain::ports::ProcessProbe;

/// 通过操作系统进程表判断Worker是否存活
pub struct SystemProcessProbe {
    system: Mutex<System>,
}

impl SystemProcessProbe {
    pub fn new() -> Self {
        let system = System::new_with_specifics(
            RefreshKind::new().with_processes(ProcessRefreshKind::new()),
        );
        Self {
            system: Mutex::new(system),
        }
    }
}

impl Default for SystemProcessProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessProbe for SystemProcessProbe {
    fn is_alive(&self, pid: u32) -> bool {
        let pid = Pid::from_u32(pid);
        let mut system = self
            .system
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        system.refresh_processes_specifics(
            ProcessesToUpdate::Some(&[pid]),
            true,
            ProcessRefreshKind::new(),
        );

        // 僵尸进程已经退出，只是尚未被父进程回收
        system
            .process(pid)
            .is_some_and(|process| {
                !matches!(process.status(), ProcessStatus::Zombie | ProcessStatus::Dead)
            })
    }
}
