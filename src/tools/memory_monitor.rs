use log::info;
use sysinfo::{Pid, ProcessRefreshKind, ProcessesToUpdate, System};

const MIB: u64 = 1024 * 1024;

/// 某個時間點的記憶體用量（位元組）
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MemorySnapshot {
    pub total: u64,
    pub used: u64,
    pub available: u64,
    pub process_resident: Option<u64>,
}

pub struct MemoryMonitor {
    system: System,
    pid: Option<Pid>,
}

impl MemoryMonitor {
    #[must_use]
    pub fn new() -> Self {
        Self {
            system: System::new(),
            pid: sysinfo::get_current_pid().ok(),
        }
    }

    pub fn snapshot(&mut self) -> MemorySnapshot {
        self.system.refresh_memory();

        let process_resident = self.pid.and_then(|pid| {
            self.system.refresh_processes_specifics(
                ProcessesToUpdate::Some(&[pid]),
                true,
                ProcessRefreshKind::nothing().with_memory(),
            );
            self.system.process(pid).map(sysinfo::Process::memory)
        });

        MemorySnapshot {
            total: self.system.total_memory(),
            used: self.system.used_memory(),
            available: self.system.available_memory(),
            process_resident,
        }
    }

    /// 將目前的記憶體用量寫入日誌
    pub fn log_usage(&mut self, context: &str) -> MemorySnapshot {
        let snapshot = self.snapshot();
        info!(
            "[{context}] 記憶體 - 總計: {} MB, 已用: {} MB, 可用: {} MB, 本程序: {}",
            snapshot.total / MIB,
            snapshot.used / MIB,
            snapshot.available / MIB,
            snapshot
                .process_resident
                .map_or_else(|| "未知".to_string(), |rss| format!("{} MB", rss / MIB))
        );
        snapshot
    }
}

impl Default for MemoryMonitor {
    fn default() -> Self {
        Self::new()
    }
}
