use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Configuration for direct data-directory access
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataDirConfig {
    /// Root of the data directory
    pub path: PathBuf,

    /// One sub-directory per database (default: false)
    #[serde(default)]
    pub directory_per_db: bool,

    /// Durable write-ahead journaling for writes (default: false)
    ///
    /// When enabled, databases use WAL with `synchronous=FULL`. Otherwise
    /// the rollback journal is kept in memory and syncs are skipped.
    #[serde(default)]
    pub journal: bool,

    /// Open databases read-only (default: false)
    #[serde(default)]
    pub read_only: bool,

    /// How long SQLite waits on its own file locks (default: 5000 ms)
    #[serde(default = "default_busy_timeout")]
    pub busy_timeout_ms: u64,
}

impl DataDirConfig {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            directory_per_db: false,
            journal: false,
            read_only: false,
            busy_timeout_ms: default_busy_timeout(),
        }
    }

    pub fn with_directory_per_db(mut self, enabled: bool) -> Self {
        self.directory_per_db = enabled;
        self
    }

    pub fn with_journal(mut self, enabled: bool) -> Self {
        self.journal = enabled;
        self
    }

    pub fn with_read_only(mut self, read_only: bool) -> Self {
        self.read_only = read_only;
        self
    }

    pub fn with_busy_timeout(mut self, timeout_ms: u64) -> Self {
        self.busy_timeout_ms = timeout_ms;
        self
    }
}

fn default_busy_timeout() -> u64 {
    5000
}
