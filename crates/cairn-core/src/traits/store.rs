use crate::error::Result;
use crate::types::{
    ApplyOutcome, CollectionMetadata, Document, IndexSpec, LogicalTs, Namespace, OplogRecord,
};
use serde_json::{Map, Value};

/// Whether a scan should keep going after a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanControl {
    Continue,
    Stop,
}

/// Per-document result of a batch insert.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted,
    /// Rejected by the target (e.g. duplicate `_id` or unique index).
    Failed(String),
}

impl InsertOutcome {
    pub fn is_inserted(&self) -> bool {
        matches!(self, InsertOutcome::Inserted)
    }
}

/// A source or target the dump/restore engine can talk to.
///
/// Implemented by the data-directory store and the live-server client.
/// Workers each open their own [`StoreSession`].
pub trait DocumentStore: Send + Sync {
    /// Location string recorded in logs and archive manifests.
    fn describe(&self) -> String;

    /// Open an independent session.
    fn session(&self) -> Result<Box<dyn StoreSession>>;
}

/// One connection to a [`DocumentStore`].
///
/// Sessions are used from a single worker thread at a time.
pub trait StoreSession: Send {
    fn list_databases(&mut self) -> Result<Vec<String>>;

    fn list_collections(&mut self, db: &str) -> Result<Vec<String>>;

    /// Creation options and index definitions of one collection.
    fn collection_metadata(&mut self, ns: &Namespace) -> Result<CollectionMetadata>;

    /// Stream every document of `ns` in storage order.
    ///
    /// Returns the number of documents handed to `visit`.
    fn scan(
        &mut self,
        ns: &Namespace,
        visit: &mut dyn FnMut(Document) -> Result<ScanControl>,
    ) -> Result<u64>;

    /// Create `ns` if it does not exist. Existing collections are kept.
    fn create_collection(&mut self, ns: &Namespace, options: &Map<String, Value>) -> Result<()>;

    /// Drop `ns` and its indexes. Returns false when it did not exist.
    fn drop_collection(&mut self, ns: &Namespace) -> Result<bool>;

    /// Insert a batch, reporting each document's outcome in order.
    ///
    /// A per-document failure never aborts the rest of the batch.
    fn insert_many(&mut self, ns: &Namespace, docs: &[Document]) -> Result<Vec<InsertOutcome>>;

    fn create_index(&mut self, ns: &Namespace, index: &IndexSpec) -> Result<()>;

    /// Apply one captured operation log record.
    fn apply_op(&mut self, record: &OplogRecord) -> Result<ApplyOutcome>;

    /// Timestamp of the newest operation log record, `None` when the
    /// store has no operation log.
    fn oplog_head(&mut self) -> Result<Option<LogicalTs>>;

    /// Stream every log record with `ts > after`, in timestamp order.
    fn oplog_since(
        &mut self,
        after: LogicalTs,
        visit: &mut dyn FnMut(OplogRecord) -> Result<()>,
    ) -> Result<u64>;
}
