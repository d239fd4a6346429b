use serde::{Deserialize, Serialize};
use sysinfo::{Process, ProcessRefreshKind, ProcessStatus, System, UpdateKind};

/// One row of a process-table snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessEntry {
    pub pid: u32,
    /// Full command line on POSIX (argv joined by spaces), image name on Windows.
    pub command: String,
}

/// Point-in-time view of the OS process table.
///
/// Snapshots are stale as soon as they are returned and carry no ordering.
pub trait ProcessTable: Send + Sync {
    /// Enumeration failures yield an empty list rather than an error, so a
    /// liveness check degrades to "not found".
    fn snapshot(&self) -> Vec<ProcessEntry>;
}

/// Command string recorded for `pid`, if the pid is present.
pub fn command_of(entries: &[ProcessEntry], pid: u32) -> Option<&str> {
    entries
        .iter()
        .find(|entry| entry.pid == pid)
        .map(|entry| entry.command.as_str())
}

/// `(pid, command)` identity check. A recycled pid running a different
/// command does not match, and neither does an empty command.
pub fn matches_identity(entries: &[ProcessEntry], pid: u32, command: &str) -> bool {
    !command.is_empty() && command_of(entries, pid) == Some(command)
}

/// `true` if any entry runs exactly `command`.
pub fn contains_command(entries: &[ProcessEntry], command: &str) -> bool {
    !command.is_empty() && entries.iter().any(|entry| entry.command == command)
}

/// Process table backed by `sysinfo`.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemProcessTable;

impl SystemProcessTable {
    pub fn new() -> Self {
        Self
    }
}

impl ProcessTable for SystemProcessTable {
    fn snapshot(&self) -> Vec<ProcessEntry> {
        // the default refresh kind leaves `cmd` empty
        let mut sys = System::new();
        sys.refresh_processes_specifics(ProcessRefreshKind::new().with_cmd(UpdateKind::Always));

        let entries: Vec<ProcessEntry> = sys
            .processes()
            .iter()
            // exited children awaiting reaping are not live instances
            .filter(|(_, process)| !matches!(process.status(), ProcessStatus::Zombie))
            .map(|(pid, process)| ProcessEntry {
                pid: pid.as_u32(),
                command: entry_command(process),
            })
            .collect();

        tracing::debug!("Found {} running processes", entries.len());
        entries
    }
}

#[cfg(windows)]
fn entry_command(process: &Process) -> String {
    process.name().to_string()
}

#[cfg(not(windows))]
fn entry_command(process: &Process) -> String {
    process.cmd().join(" ").trim().to_string()
}
