//! Cairn Core: types, traits and error taxonomy shared by the dump writer,
//! the restore reader and their storage backends.
//!
//! - Documents, namespaces, collection metadata and operation log records
//! - Archive manifest and completion marker types
//! - Store seam traits ([`DocumentStore`], [`StoreSession`]) implemented by
//!   the data-directory store and the live-server client
//! - Structural filter predicates
//! - Configuration, cancellation and data-directory locking

pub mod cancel;
pub mod config;
pub mod error;
pub mod filter;
pub mod observe;
pub mod path_lock;
pub mod traits;
pub mod types;

pub use cancel::CancelToken;
pub use config::{
    BackoffStrategy, ConnectionConfig, Credentials, DataDirConfig, DumpOptions, Endpoint,
    RestoreOptions, RetryConfig, StoreConfig,
};
pub use error::{CairnError, ErrorKind, Result};
pub use filter::Predicate;
pub use path_lock::PathLock;
pub use traits::{DocumentStore, InsertOutcome, ScanControl, StoreSession};
pub use types::{
    ApplyOutcome, ArchiveManifest, CollectionEntry, CollectionMetadata, CompletionMarker,
    Document, IndexKey, IndexSpec, LogicalTs, Namespace, NamespaceFilter, OpKind, OplogInfo,
    OplogRecord, SourceDescriptor, SourceKind,
};
