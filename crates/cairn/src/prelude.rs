//! Cairn Prelude
//!
//! Import this to get all commonly used types and traits:
//!
//! ```
//! use cairn::prelude::*;
//! ```

// Core types
pub use crate::{
    ArchiveManifest, CairnError, CancelToken, Document, ErrorKind, Namespace, NamespaceFilter,
    Result,
};

// Configs
pub use crate::{
    ConnectionConfig, Credentials, DataDirConfig, DumpOptions, Endpoint, RestoreOptions,
    RetryConfig, StoreConfig,
};

// Traits
pub use crate::{DocumentStore, StoreSession};

// Implementations
pub use crate::{ArchiveReader, DataDirStore, RemoteStore, Role};

// Dump and restore
pub use crate::{
    open_source, open_target, source_kind, DumpReport, DumpWriter, RestorePhase, RestoreReader,
    RestoreSummary,
};

// Re-export common external deps
pub use anyhow;
pub use serde::{Deserialize, Serialize};
pub use std::sync::Arc;
pub use tracing;
