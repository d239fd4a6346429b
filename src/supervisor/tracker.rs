use std::collections::HashMap;

use super::process::SpawnedProcess;

/// The supervisor's record of the instance it last spawned for a service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackedProcess {
    pub process_id: u32,
    /// Together with `process_id` this is the identity used for
    /// termination; a bare pid may have been recycled.
    pub process_name: String,
}

impl From<SpawnedProcess> for TrackedProcess {
    fn from(spawned: SpawnedProcess) -> Self {
        Self {
            process_id: spawned.process_id,
            process_name: spawned.process_name,
        }
    }
}

/// Tracked processes keyed by service command line.
///
/// Only the timer callback and teardown touch the table, and teardown
/// waits for the in-flight tick, so there is no lock here.
#[derive(Debug, Default)]
pub struct ProcessTracker {
    processes: HashMap<String, TrackedProcess>,
}

impl ProcessTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, command_line: &str) -> Option<&TrackedProcess> {
        self.processes.get(command_line)
    }

    pub fn is_tracked(&self, command_line: &str) -> bool {
        self.processes.contains_key(command_line)
    }

    /// Inserts or overwrites; returns the entry that was replaced.
    pub fn track(&mut self, command_line: &str, process: TrackedProcess) -> Option<TrackedProcess> {
        tracing::debug!(
            "Now tracking {{{}}} with pid: {}",
            command_line,
            process.process_id
        );
        self.processes.insert(command_line.to_string(), process)
    }

    pub fn untrack(&mut self, command_line: &str) -> Option<TrackedProcess> {
        let removed = self.processes.remove(command_line);
        if removed.is_some() {
            tracing::debug!("Stopped tracking {{{}}}", command_line);
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.processes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.processes.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &TrackedProcess)> {
        self.processes.iter().map(|(key, process)| (key.as_str(), process))
    }
}
