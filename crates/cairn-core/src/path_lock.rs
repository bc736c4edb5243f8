//! Exclusive advisory lock on a data directory.
//!
//! The lock is a non-blocking `flock` on `<dir>/cairn.lock`, held for the
//! lifetime of the returned [`PathLock`]. Contention fails fast with
//! [`CairnError::ResourceBusy`] instead of waiting.

use crate::error::{CairnError, Result};
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

/// File name of the lock inside a locked directory.
pub const LOCK_FILE_NAME: &str = "cairn.lock";

/// RAII guard for a directory lock. Dropping it releases the lock.
pub struct PathLock {
    path: PathBuf,
    #[cfg(unix)]
    _lock: nix::fcntl::Flock<File>,
    #[cfg(not(unix))]
    _file: File,
}

impl PathLock {
    /// Take the exclusive lock for `dir`, which must already exist.
    pub fn acquire(dir: &Path) -> Result<Self> {
        let path = dir.join(LOCK_FILE_NAME);
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;
        Self::lock(path, file)
    }

    #[cfg(unix)]
    fn lock(path: PathBuf, file: File) -> Result<Self> {
        use nix::errno::Errno;
        use nix::fcntl::{Flock, FlockArg};

        match Flock::lock(file, FlockArg::LockExclusiveNonblock) {
            Ok(lock) => {
                tracing::debug!("Acquired lock {}", path.display());
                Ok(Self { path, _lock: lock })
            }
            Err((_, Errno::EWOULDBLOCK)) => Err(CairnError::ResourceBusy(format!(
                "{} is locked by another process",
                path.display()
            ))),
            Err((_, errno)) => Err(CairnError::Io(std::io::Error::from(errno))),
        }
    }

    #[cfg(not(unix))]
    fn lock(path: PathBuf, _file: File) -> Result<Self> {
        let marker = path.with_extension("held");
        match OpenOptions::new().write(true).create_new(true).open(&marker) {
            Ok(file) => Ok(Self { path, _file: file }),
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => Err(
                CairnError::ResourceBusy(format!("{} is locked by another process", path.display())),
            ),
            Err(e) => Err(e.into()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl std::fmt::Debug for PathLock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PathLock").field("path", &self.path).finish()
    }
}

#[cfg(not(unix))]
impl Drop for PathLock {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(self.path.with_extension("held"));
    }
}
