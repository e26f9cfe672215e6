//! Host resource snapshot
//!
//! Advisory status of disk and memory, shown to the operator and passed to
//! the predictive scorer as context.

use std::path::Path;

use serde::Serialize;
use sysinfo::{Disks, System};

/// Minimum free disk percentage before the disk status turns bad
pub const DISK_FREE_THRESHOLD: f64 = 10.0;

/// Maximum memory usage percentage before the memory status turns bad
pub const MEMORY_USED_THRESHOLD: f64 = 85.0;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResourceStatus {
    pub ok: bool,
    pub percent: f64,
    pub message: String,
    pub warning: Option<String>,
}

/// Environment facts consumed by the predictive scorer
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct EnvironmentSnapshot {
    pub disk_status: Option<ResourceStatus>,
    pub memory_status: Option<ResourceStatus>,
}

impl EnvironmentSnapshot {
    /// Whether the disk is known to be under pressure
    pub fn disk_pressure(&self) -> bool {
        self.disk_status.as_ref().is_some_and(|s| !s.ok)
    }

    /// Warnings from every status that is not ok
    pub fn warnings(&self) -> Vec<String> {
        [&self.disk_status, &self.memory_status]
            .into_iter()
            .flatten()
            .filter(|s| !s.ok)
            .map(|s| s.warning.clone().unwrap_or_else(|| s.message.clone()))
            .collect()
    }
}

/// Disk status from free and total bytes
pub fn disk_status(available: u64, total: u64) -> ResourceStatus {
    let percent_free = if total == 0 {
        100.0
    } else {
        available as f64 / total as f64 * 100.0
    };
    let ok = percent_free > DISK_FREE_THRESHOLD;
    ResourceStatus {
        ok,
        percent: percent_free,
        message: format!("Disk free: {percent_free:.2}%"),
        warning: (!ok).then(|| format!("Low disk space: only {percent_free:.2}% free.")),
    }
}

/// Memory status from used and total bytes
pub fn memory_status(used: u64, total: u64) -> ResourceStatus {
    let used_percent = if total == 0 {
        0.0
    } else {
        used as f64 / total as f64 * 100.0
    };
    let ok = used_percent < MEMORY_USED_THRESHOLD;
    ResourceStatus {
        ok,
        percent: used_percent,
        message: format!("Memory usage: {used_percent:.2}%"),
        warning: (!ok).then(|| format!("High memory usage: {used_percent:.2}%.")),
    }
}

/// Sample the host
pub fn snapshot() -> EnvironmentSnapshot {
    let disks = Disks::new_with_refreshed_list();
    let root = disks
        .list()
        .iter()
        .find(|d| d.mount_point() == Path::new("/"))
        .or_else(|| disks.list().iter().max_by_key(|d| d.total_space()));
    let disk = root.map(|d| disk_status(d.available_space(), d.total_space()));

    let mut sys = System::new();
    sys.refresh_memory();
    let memory = (sys.total_memory() > 0)
        .then(|| memory_status(sys.used_memory(), sys.total_memory()));

    EnvironmentSnapshot {
        disk_status: disk,
        memory_status: memory,
    }
}
