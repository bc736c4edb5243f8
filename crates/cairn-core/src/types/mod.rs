pub mod document;
pub mod manifest;
pub mod metadata;
pub mod namespace;
pub mod oplog;

pub use document::{id_key, Document, MAX_DOCUMENT_DEPTH};
pub use manifest::{
    ArchiveManifest, CollectionEntry, CompletionMarker, OplogInfo, SourceDescriptor, SourceKind,
    ARCHIVE_FORMAT_VERSION,
};
pub use metadata::{
    CollectionMetadata, IndexKey, IndexSpec, KeyOrder, CURRENT_INDEX_VERSION, ID_INDEX_NAME,
};
pub use namespace::{Namespace, NamespaceFilter};
pub use oplog::{apply_update, ApplyOutcome, LogicalTs, OpKind, OplogRecord};
