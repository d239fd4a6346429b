//! Error types for the supervision engine and daemon start-up.
//!
//! Only start-up errors are fatal. Everything raised inside a reconciliation
//! tick is logged at the point of use and treated as "unhealthy" or
//! "not found".

/// Failures of the OS process layer. Both are recoverable: a failed spawn
/// is retried on the next tick, a failed termination still lets the
/// replacement start.
#[derive(thiserror::Error, Debug)]
pub enum ProcessError {
    #[error("failed to spawn '{command}': {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to terminate process {pid}: {reason}")]
    Termination { pid: u32, reason: String },
}

/// Single-instance lock failures.
#[derive(thiserror::Error, Debug)]
pub enum GuardError {
    /// Expected outcome when a second instance is launched.
    #[error("another process has started")]
    AlreadyRunning,

    #[error("failed to acquire {resource}: {reason}")]
    Acquire { resource: String, reason: String },
}

/// Start-up stage failures, each mapped to its own process exit code.
#[derive(thiserror::Error, Debug)]
pub enum StartupError {
    #[error(transparent)]
    Guard(#[from] GuardError),

    #[error("get root directory failed: {0}")]
    RootDirectory(String),

    #[error("log init failed: {0}")]
    Logging(String),

    #[error("daemon init failed: {0:#}")]
    DaemonInit(#[source] anyhow::Error),
}

impl StartupError {
    pub fn exit_code(&self) -> u8 {
        match self {
            Self::Guard(GuardError::AlreadyRunning) => 1,
            Self::Guard(GuardError::Acquire { .. }) => 2,
            Self::RootDirectory(_) => 3,
            Self::Logging(_) => 4,
            Self::DaemonInit(_) => 5,
        }
    }

    /// Machine readable error code
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Guard(GuardError::AlreadyRunning) => "ALREADY_RUNNING",
            Self::Guard(GuardError::Acquire { .. }) => "LOCK_ACQUIRE_FAILED",
            Self::RootDirectory(_) => "ROOT_DIRECTORY_FAILED",
            Self::Logging(_) => "LOG_INIT_FAILED",
            Self::DaemonInit(_) => "DAEMON_INIT_FAILED",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes_are_distinct() {
        let errors = [
            StartupError::Guard(GuardError::AlreadyRunning),
            StartupError::Guard(GuardError::Acquire {
                resource: "/var/run/x.pid".into(),
                reason: "permission denied".into(),
            }),
            StartupError::RootDirectory("no parent".into()),
            StartupError::Logging("already set".into()),
            StartupError::DaemonInit(anyhow::anyhow!("bad config")),
        ];
        let mut codes: Vec<u8> = errors.iter().map(StartupError::exit_code).collect();
        assert!(codes.iter().all(|code| *code != 0));
        codes.sort_unstable();
        codes.dedup();
        assert_eq!(codes.len(), errors.len());
    }

    #[test]
    fn test_already_running_message() {
        let err: StartupError = GuardError::AlreadyRunning.into();
        assert_eq!(err.to_string(), "another process has started");
        assert_eq!(err.error_code(), "ALREADY_RUNNING");
    }
}
