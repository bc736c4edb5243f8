use crate::layout::StorageLayout;
use crate::session::DataDirSession;
use cairn_core::{
    error::{CairnError, Result},
    DataDirConfig, DocumentStore, PathLock, StoreSession,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Direct-path store over a data directory.
///
/// Holds the directory's exclusive lock for as long as the store (or any
/// of its sessions) is alive.
pub struct DataDirStore {
    shared: Arc<Shared>,
}

pub(crate) struct Shared {
    pub(crate) root: PathBuf,
    pub(crate) config: DataDirConfig,
    pub(crate) layout: StorageLayout,
    _lock: PathLock,
}

impl DataDirStore {
    /// Open a data directory.
    ///
    /// Read-only opens (dump sources) require the directory to exist and
    /// report failures as [`CairnError::SourceUnavailable`]. Writable opens
    /// (restore targets) create it and report failures as
    /// [`CairnError::TargetUnavailable`]. Lock contention is always
    /// [`CairnError::ResourceBusy`].
    pub fn open(config: DataDirConfig) -> Result<Self> {
        let root = config.path.clone();
        let unavailable = |msg: String| {
            if config.read_only {
                CairnError::SourceUnavailable(msg)
            } else {
                CairnError::TargetUnavailable(msg)
            }
        };

        if config.read_only {
            if !root.is_dir() {
                return Err(unavailable(format!(
                    "{} is not a data directory",
                    root.display()
                )));
            }
        } else {
            std::fs::create_dir_all(&root)
                .map_err(|e| unavailable(format!("{}: {}", root.display(), e)))?;
        }

        let lock = match PathLock::acquire(&root) {
            Ok(lock) => lock,
            Err(CairnError::Io(e)) => {
                return Err(unavailable(format!("{}: {}", root.display(), e)))
            }
            Err(e) => return Err(e),
        };

        let layout = match StorageLayout::load(&root)? {
            Some(existing) => {
                existing.check(config.directory_per_db)?;
                existing
            }
            None => {
                let layout = StorageLayout::new(config.directory_per_db);
                if !config.read_only {
                    layout.save(&root)?;
                }
                layout
            }
        };

        tracing::info!(
            "Opened data directory {} ({}{})",
            root.display(),
            if config.read_only { "read-only" } else { "read-write" },
            if config.journal { ", journaled" } else { "" }
        );

        Ok(Self {
            shared: Arc::new(Shared {
                root,
                config,
                layout,
                _lock: lock,
            }),
        })
    }

    pub fn path(&self) -> &Path {
        &self.shared.root
    }

    pub fn config(&self) -> &DataDirConfig {
        &self.shared.config
    }

    /// Concrete session, for callers that need more than [`StoreSession`].
    pub fn open_session(&self) -> DataDirSession {
        DataDirSession::new(self.shared.clone())
    }
}

impl DocumentStore for DataDirStore {
    fn describe(&self) -> String {
        self.shared.root.display().to_string()
    }

    fn session(&self) -> Result<Box<dyn StoreSession>> {
        Ok(Box::new(self.open_session()))
    }
}
