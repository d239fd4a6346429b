use std::process::{Command, Stdio};

use super::error::ProcessError;
use crate::config::ServiceDescriptor;
use crate::process_monitor::{self, ProcessTable, SystemProcessTable};

/// What a successful spawn hands back to the supervisor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpawnedProcess {
    pub process_id: u32,
    /// Command string seen in the process table right after spawn; empty
    /// when the re-scan raced and found nothing.
    pub process_name: String,
}

/// OS process lifecycle as seen by the supervisor.
pub trait ProcessControl: Send {
    /// Launches the service detached from the supervisor's stdio, with its
    /// working directory set.
    fn spawn(&self, service: &ServiceDescriptor) -> Result<SpawnedProcess, ProcessError>;

    /// `true` iff some process in a fresh snapshot runs exactly `process_name`.
    fn is_running(&self, process_name: &str) -> bool;

    /// Best-effort forced termination of the `(pid, name)` pair. Returns
    /// `false` only when the process is still present afterwards.
    fn terminate(&self, process_id: u32, process_name: &str) -> bool;
}

/// [`ProcessControl`] over the real OS.
pub struct ProcessController<T: ProcessTable = SystemProcessTable> {
    table: T,
}

impl ProcessController<SystemProcessTable> {
    pub fn new() -> Self {
        Self::with_table(SystemProcessTable::new())
    }
}

impl Default for ProcessController<SystemProcessTable> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: ProcessTable> ProcessController<T> {
    pub fn with_table(table: T) -> Self {
        Self { table }
    }

    fn lookup_name(&self, process_id: u32) -> Option<String> {
        let snapshot = self.table.snapshot();
        process_monitor::command_of(&snapshot, process_id).map(String::from)
    }
}

impl<T: ProcessTable> ProcessControl for ProcessController<T> {
    fn spawn(&self, service: &ServiceDescriptor) -> Result<SpawnedProcess, ProcessError> {
        let command_line = service.command_line();
        tracing::debug!("try to create process with command line: {{{}}}", command_line);

        let mut cmd = Command::new(service.program_path());
        cmd.current_dir(&service.working_directory)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());
        add_arguments(&mut cmd, &service.extra_arguments);
        crate::utils::apply_window_flags(&mut cmd, service.show_window);

        let child = cmd.spawn().map_err(|source| ProcessError::Spawn {
            command: command_line.clone(),
            source,
        })?;
        let process_id = child.id();
        // Not waited on here; terminate() reaps it.
        drop(child);

        let process_name = self.lookup_name(process_id).unwrap_or_else(|| {
            tracing::error!("get process name failed for pid {}", process_id);
            String::new()
        });

        tracing::debug!(
            "create process success with command line: {{{}}} (pid {})",
            command_line,
            process_id
        );
        Ok(SpawnedProcess { process_id, process_name })
    }

    fn is_running(&self, process_name: &str) -> bool {
        process_monitor::contains_command(&self.table.snapshot(), process_name)
    }

    fn terminate(&self, process_id: u32, process_name: &str) -> bool {
        if process_id == 0 {
            return true;
        }
        if process_id == std::process::id() {
            tracing::error!(
                "kill process exception: refusing to kill the supervisor itself (pid {})",
                process_id
            );
            return true;
        }

        tracing::debug!("kill process: [{}:{}] begin", process_id, process_name);

        let terminated = if !process_monitor::matches_identity(&self.table.snapshot(), process_id, process_name) {
            tracing::debug!("process [{}:{}] is not exist", process_id, process_name);
            platform::reap_exited(process_id);
            true
        } else {
            match platform::force_kill(process_id) {
                Ok(()) => tracing::debug!("kill process {} success", process_id),
                Err(e) => tracing::error!("{}", e),
            }

            if process_monitor::matches_identity(&self.table.snapshot(), process_id, process_name) {
                tracing::warn!("process [{}:{}] is still exist", process_id, process_name);
                false
            } else {
                true
            }
        };

        tracing::debug!("kill process: [{}:{}] end", process_id, process_name);
        terminated
    }
}

#[cfg(windows)]
fn add_arguments(cmd: &mut Command, args: &[String]) {
    use std::os::windows::process::CommandExt;
    let params = args.join(" ");
    if !params.is_empty() {
        cmd.raw_arg(params);
    }
}

#[cfg(not(windows))]
fn add_arguments(cmd: &mut Command, args: &[String]) {
    cmd.args(args);
}

#[cfg(unix)]
mod platform {
    use nix::errno::Errno;
    use nix::sys::signal::{self, Signal};
    use nix::sys::wait::{waitpid, WaitPidFlag};
    use nix::unistd::Pid;

    use super::ProcessError;

    fn to_pid(process_id: u32) -> Result<Pid, ProcessError> {
        // A negative pid would address a whole process group.
        i32::try_from(process_id)
            .map(Pid::from_raw)
            .map_err(|_| ProcessError::Termination {
                pid: process_id,
                reason: "pid out of range".to_string(),
            })
    }

    /// SIGKILL, then block until the child is reaped.
    pub fn force_kill(process_id: u32) -> Result<(), ProcessError> {
        let pid = to_pid(process_id)?;

        signal::kill(pid, Signal::SIGKILL).map_err(|e| ProcessError::Termination {
            pid: process_id,
            reason: format!("kill: {}", e),
        })?;

        match waitpid(pid, None) {
            Ok(_) => Ok(()),
            // not our child, nothing to reap
            Err(Errno::ECHILD) => Ok(()),
            Err(e) => Err(ProcessError::Termination {
                pid: process_id,
                reason: format!("waitpid: {}", e),
            }),
        }
    }

    /// Collects an already exited child of ours without blocking.
    pub fn reap_exited(process_id: u32) {
        let Ok(pid) = to_pid(process_id) else {
            return;
        };
        match waitpid(pid, Some(WaitPidFlag::WNOHANG)) {
            Ok(status) => tracing::debug!("reap {}: {:?}", process_id, status),
            Err(Errno::ECHILD) => {}
            Err(e) => tracing::debug!("reap {} failed: {}", process_id, e),
        }
    }
}

#[cfg(windows)]
mod platform {
    use winapi::um::errhandlingapi::GetLastError;
    use winapi::um::handleapi::CloseHandle;
    use winapi::um::processthreadsapi::{OpenProcess, TerminateProcess};
    use winapi::um::synchapi::WaitForSingleObject;
    use winapi::um::winnt::{PROCESS_TERMINATE, SYNCHRONIZE};

    use super::ProcessError;

    const KILL_EXIT_CODE: u32 = 9;
    const REAP_TIMEOUT_MS: u32 = 5_000;

    /// TerminateProcess, then wait (bounded) for the process object to signal.
    pub fn force_kill(process_id: u32) -> Result<(), ProcessError> {
        unsafe {
            let handle = OpenProcess(PROCESS_TERMINATE | SYNCHRONIZE, 0, process_id);
            if handle.is_null() {
                return Err(ProcessError::Termination {
                    pid: process_id,
                    reason: format!("open process failed: {}", GetLastError()),
                });
            }

            let result = TerminateProcess(handle, KILL_EXIT_CODE);
            let error = GetLastError();
            if result != 0 {
                WaitForSingleObject(handle, REAP_TIMEOUT_MS);
            }
            CloseHandle(handle);

            if result == 0 {
                return Err(ProcessError::Termination {
                    pid: process_id,
                    reason: format!("TerminateProcess failed: {}", error),
                });
            }
        }
        Ok(())
    }

    /// Windows has no zombies to collect.
    pub fn reap_exited(_process_id: u32) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process_monitor::ProcessEntry;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    /// Table that counts how often it was scanned.
    #[derive(Default, Clone)]
    struct CountingTable {
        entries: Vec<ProcessEntry>,
        scans: Arc<AtomicUsize>,
    }

    impl ProcessTable for CountingTable {
        fn snapshot(&self) -> Vec<ProcessEntry> {
            self.scans.fetch_add(1, Ordering::SeqCst);
            self.entries.clone()
        }
    }

    #[test]
    fn test_terminate_zero_pid_is_noop() {
        let table = CountingTable::default();
        let controller = ProcessController::with_table(table.clone());
        assert!(controller.terminate(0, "anything"));
        assert_eq!(table.scans.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_terminate_refuses_own_pid() {
        let me = std::process::id();
        let table = CountingTable {
            entries: vec![ProcessEntry { pid: me, command: "self".into() }],
            ..Default::default()
        };
        let controller = ProcessController::with_table(table.clone());

        assert!(controller.terminate(me, "self"));
        // never even looked the pid up
        assert_eq!(table.scans.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_terminate_already_gone() {
        let table = CountingTable {
            entries: vec![ProcessEntry { pid: 4242, command: "/opt/other".into() }],
            ..Default::default()
        };
        let controller = ProcessController::with_table(table.clone());

        // pid recycled by an unrelated command: must not be touched
        assert!(controller.terminate(4242, "/opt/app/run.sh"));
        assert_eq!(table.scans.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_terminate_empty_name_never_matches() {
        let table = CountingTable {
            entries: vec![ProcessEntry { pid: 4243, command: String::new() }],
            ..Default::default()
        };
        let controller = ProcessController::with_table(table);
        assert!(controller.terminate(4243, ""));
    }

    #[test]
    fn test_is_running_matches_exact_command() {
        let table = CountingTable {
            entries: vec![ProcessEntry { pid: 10, command: "/opt/app/run.sh --port 8080".into() }],
            ..Default::default()
        };
        let controller = ProcessController::with_table(table);
        assert!(controller.is_running("/opt/app/run.sh --port 8080"));
        assert!(!controller.is_running("/opt/app/run.sh"));
        assert!(!controller.is_running(""));
    }

    #[test]
    fn test_spawn_missing_executable_fails() {
        let dir = tempfile::tempdir().unwrap();
        let service = ServiceDescriptor::new(dir.path().to_str().unwrap(), "does-not-exist").unwrap();
        let controller = ProcessController::with_table(CountingTable::default());

        let result = controller.spawn(&service);
        assert!(matches!(result, Err(ProcessError::Spawn { .. })));
    }

    #[test]
    fn test_terminate_reports_survivor() {
        // out of range for kill(2), so the kill attempt fails and the entry stays
        let table = CountingTable {
            entries: vec![ProcessEntry { pid: u32::MAX, command: "/opt/stuck".into() }],
            ..Default::default()
        };
        let controller = ProcessController::with_table(table.clone());

        assert!(!controller.terminate(u32::MAX, "/opt/stuck"));
        assert_eq!(table.scans.load(Ordering::SeqCst), 2);
    }
}
