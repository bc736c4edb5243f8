use crate::remote::{RemoteStore, Role};
use cairn_core::{DocumentStore, Result, SourceKind, StoreConfig};
use cairn_datadir::DataDirStore;

/// Open the store a dump reads from.
///
/// Data directories are opened read-only.
pub fn open_source(config: &StoreConfig) -> Result<Box<dyn DocumentStore>> {
    Ok(match config {
        StoreConfig::Remote(c) => Box::new(RemoteStore::connect(c.clone(), Role::Source)?),
        StoreConfig::DataDir(c) => Box::new(DataDirStore::open(c.clone().with_read_only(true))?),
    })
}

/// Open the store a restore writes to.
pub fn open_target(config: &StoreConfig) -> Result<Box<dyn DocumentStore>> {
    Ok(match config {
        StoreConfig::Remote(c) => Box::new(RemoteStore::connect(c.clone(), Role::Target)?),
        StoreConfig::DataDir(c) => Box::new(DataDirStore::open(c.clone().with_read_only(false))?),
    })
}

/// Source kind recorded in an archive manifest.
pub fn source_kind(config: &StoreConfig) -> SourceKind {
    match config {
        StoreConfig::Remote(_) => SourceKind::Remote,
        StoreConfig::DataDir(_) => SourceKind::Dbpath,
    }
}
