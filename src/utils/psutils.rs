use log::debug;
use serde::Serialize;
use std::ffi::OsStr;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use sysinfo::System;

pub const DEFAULT_PROC_ROOT: &str = "/proc";

/// Point-in-time view of the running processes.
pub trait ProcessTable {
    /// Ids of every process in the table, in ascending order.
    fn pids(&self) -> io::Result<Vec<u32>>;

    /// Raw NUL-separated command line of `pid`.
    fn cmdline(&self, pid: u32) -> io::Result<Vec<u8>>;
}

/// Process table backed by a procfs mount (or a copy of one).
#[derive(Debug, Clone)]
pub struct ProcFs {
    root: PathBuf,
}

impl ProcFs {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl Default for ProcFs {
    fn default() -> Self {
        Self::new(DEFAULT_PROC_ROOT)
    }
}

impl ProcessTable for ProcFs {
    fn pids(&self) -> io::Result<Vec<u32>> {
        let mut pids: Vec<u32> = fs::read_dir(&self.root)?
            .flatten()
            .filter_map(|entry| parse_pid(&entry.file_name()))
            .collect();
        pids.sort_unstable();
        debug!("{} process entries under {}", pids.len(), self.root.display());
        Ok(pids)
    }

    fn cmdline(&self, pid: u32) -> io::Result<Vec<u8>> {
        fs::read(self.root.join(pid.to_string()).join("cmdline"))
    }
}

/// Returns the pid named by a procfs entry, skipping `self`, `sys` and friends.
pub fn parse_pid(name: &OsStr) -> Option<u32> {
    let name = name.to_str()?;
    if name.is_empty() || !name.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    name.parse().ok()
}

/// Identity of the machine the report was collected on.
#[derive(Debug, Clone, Serialize)]
pub struct HostSummary {
    pub hostname: String,
    pub kernel: String,
    pub os: String,
    pub uptime_secs: u64,
}

pub fn host_summary() -> HostSummary {
    HostSummary {
        hostname: System::host_name().unwrap_or_else(|| "unknown".to_string()),
        kernel: System::kernel_version().unwrap_or_else(|| "unknown".to_string()),
        os: System::long_os_version().unwrap_or_else(|| "unknown".to_string()),
        uptime_secs: System::uptime(),
    }
}
