use super::{ConnectionConfig, DataDirConfig};
use crate::types::{LogicalTs, NamespaceFilter};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Default number of collections processed in parallel.
pub const DEFAULT_WORKERS: usize = 4;

/// Documents per insert batch during restore.
pub const DEFAULT_BATCH_SIZE: usize = 1000;

/// Where documents are read from (dump) or written to (restore).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum StoreConfig {
    /// Live server over the network
    Remote(ConnectionConfig),

    /// Direct data-directory access
    DataDir(DataDirConfig),
}

impl StoreConfig {
    /// Human-readable location for logs and the manifest.
    pub fn location(&self) -> String {
        match self {
            StoreConfig::Remote(c) => c.endpoint.address(),
            StoreConfig::DataDir(c) => c.path.display().to_string(),
        }
    }
}

/// Options for a dump run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DumpOptions {
    /// Archive output directory (default: `dump`)
    #[serde(default = "default_archive_dir")]
    pub out: PathBuf,

    #[serde(default)]
    pub namespaces: NamespaceFilter,

    /// Capture the source operation log (default: false)
    #[serde(default)]
    pub oplog: bool,

    /// Collections dumped in parallel (default: 4)
    #[serde(default = "default_workers")]
    pub workers: usize,
}

impl Default for DumpOptions {
    fn default() -> Self {
        Self::new(default_archive_dir())
    }
}

impl DumpOptions {
    pub fn new(out: impl AsRef<Path>) -> Self {
        Self {
            out: out.as_ref().to_path_buf(),
            namespaces: NamespaceFilter::all(),
            oplog: false,
            workers: default_workers(),
        }
    }

    pub fn with_namespaces(mut self, namespaces: NamespaceFilter) -> Self {
        self.namespaces = namespaces;
        self
    }

    pub fn with_oplog(mut self, oplog: bool) -> Self {
        self.oplog = oplog;
        self
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }
}

/// Options for a restore run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RestoreOptions {
    /// Archive directory (default: `dump`)
    #[serde(default = "default_archive_dir")]
    pub archive: PathBuf,

    #[serde(default)]
    pub namespaces: NamespaceFilter,

    /// Relaxed-JSON document predicate; non-matching documents are skipped
    #[serde(default)]
    pub filter: Option<String>,

    /// Drop each selected target collection before loading
    #[serde(default)]
    pub drop: bool,

    /// Replay the captured operation log after loading
    #[serde(default)]
    pub oplog_replay: bool,

    /// Only replay records with `ts` strictly below this value
    #[serde(default)]
    pub oplog_limit: Option<LogicalTs>,

    /// Validate every record before touching the target
    #[serde(default)]
    pub objcheck: bool,

    /// Restore index versions as archived instead of upgrading them
    #[serde(default)]
    pub keep_index_version: bool,

    /// Abort on the first insert failure
    #[serde(default)]
    pub stop_on_error: bool,

    /// Collections restored in parallel (default: 4)
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Documents per insert batch (default: 1000)
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
}

impl Default for RestoreOptions {
    fn default() -> Self {
        Self::new(default_archive_dir())
    }
}

impl RestoreOptions {
    pub fn new(archive: impl AsRef<Path>) -> Self {
        Self {
            archive: archive.as_ref().to_path_buf(),
            namespaces: NamespaceFilter::all(),
            filter: None,
            drop: false,
            oplog_replay: false,
            oplog_limit: None,
            objcheck: false,
            keep_index_version: false,
            stop_on_error: false,
            workers: default_workers(),
            batch_size: default_batch_size(),
        }
    }

    pub fn with_namespaces(mut self, namespaces: NamespaceFilter) -> Self {
        self.namespaces = namespaces;
        self
    }

    pub fn with_filter(mut self, filter: impl Into<String>) -> Self {
        self.filter = Some(filter.into());
        self
    }

    pub fn with_drop(mut self, drop: bool) -> Self {
        self.drop = drop;
        self
    }

    pub fn with_oplog_replay(mut self, replay: bool) -> Self {
        self.oplog_replay = replay;
        self
    }

    pub fn with_oplog_limit(mut self, limit: Option<LogicalTs>) -> Self {
        self.oplog_limit = limit;
        self
    }

    pub fn with_objcheck(mut self, objcheck: bool) -> Self {
        self.objcheck = objcheck;
        self
    }

    pub fn with_keep_index_version(mut self, keep: bool) -> Self {
        self.keep_index_version = keep;
        self
    }

    pub fn with_stop_on_error(mut self, stop: bool) -> Self {
        self.stop_on_error = stop;
        self
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }
}

fn default_archive_dir() -> PathBuf {
    PathBuf::from("dump")
}

fn default_workers() -> usize {
    DEFAULT_WORKERS
}

fn default_batch_size() -> usize {
    DEFAULT_BATCH_SIZE
}
