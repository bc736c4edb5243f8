//! Cairn: dump and restore for document database instances
//!
//! - **Dump writer**: streams every selected collection from a live server
//!   or a data directory into a self-describing archive directory, with an
//!   optional operation log capture for point-in-time consistency
//! - **Restore reader**: validates an archive, then loads it into a target
//!   through a forward-only phase machine, rebuilding indexes and replaying
//!   the captured log
//! - **Stores**: the data-directory store and the live-server client both
//!   implement [`DocumentStore`]
//!
//! # Quick Start
//!
//! ```no_run
//! use cairn::prelude::*;
//!
//! # fn main() -> Result<()> {
//! let source = StoreConfig::DataDir(DataDirConfig::new("./data"));
//! let store = open_source(&source)?;
//! let report = DumpWriter::new(store.as_ref(), source_kind(&source), DumpOptions::new("dump"))
//!     .run()?;
//! println!("{}", report);
//!
//! let target = StoreConfig::DataDir(DataDirConfig::new("./restored"));
//! let summary = RestoreReader::new(RestoreOptions::new("dump").with_drop(true))
//!     .run(|| open_target(&target))?;
//! println!("{}", summary);
//! # Ok(())
//! # }
//! ```

pub mod connect;
pub mod dump;
pub mod pool;
pub mod prelude;
pub mod remote;
pub mod replay;
pub mod restore;

// Re-export core types
pub use cairn_core::{
    config::{
        BackoffStrategy, ConnectionConfig, Credentials, DataDirConfig, DumpOptions, Endpoint,
        RestoreOptions, RetryConfig, StoreConfig,
    },
    error::{CairnError, ErrorKind, Result},
    traits::{DocumentStore, InsertOutcome, ScanControl, StoreSession},
    types::{
        ArchiveManifest, CollectionEntry, CollectionMetadata, Document, IndexSpec, LogicalTs,
        Namespace, NamespaceFilter, OplogRecord, SourceKind,
    },
    CancelToken, Predicate,
};

// Re-export storage layers
pub use cairn_archive::{ArchiveReader, ArchiveStatus, ArchiveWriter};
pub use cairn_datadir::DataDirStore;

// Re-export main types from this crate
pub use connect::{open_source, open_target, source_kind};
pub use dump::{CollectionDumpStats, DumpReport, DumpWriter};
pub use pool::{PoolOutcome, WorkerPool};
pub use remote::{RemoteSession, RemoteStore, Role};
pub use replay::{ReplayPlan, ReplayStats};
pub use restore::{
    CollectionRestoreStats, PhaseTracker, RestorePhase, RestoreReader, RestoreSummary,
};
