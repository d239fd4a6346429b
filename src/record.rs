//! Append-only record trail of daemon and service events.

use chrono::Local;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
pub struct RecordLog {
    path: PathBuf,
}

impl RecordLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// `<root>/log/record.log`
    pub fn in_root(root: &Path) -> Self {
        Self::new(root.join("log").join("record.log"))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Writes `line` prefixed with a local timestamp. Failures are logged
    /// and otherwise ignored.
    pub fn append(&self, line: &str) {
        let stamped = format!("{} {}\n", Local::now().format("%Y-%m-%d %H:%M:%S"), line);
        if let Err(e) = self.write(&stamped) {
            tracing::warn!("write record {} failed: {}", self.path.display(), e);
        }
    }

    fn write(&self, stamped: &str) -> std::io::Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        file.write_all(stamped.as_bytes())
    }
}
