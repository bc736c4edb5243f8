use crate::types::namespace::Namespace;
use crate::types::oplog::LogicalTs;
use serde::{Deserialize, Serialize};

/// Archive layout version written by this release.
pub const ARCHIVE_FORMAT_VERSION: u32 = 1;

/// Where an archive's data came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    /// Direct data-directory access
    Dbpath,
    /// Live server connection
    Remote,
}

/// Identity of the dumped instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceDescriptor {
    pub kind: SourceKind,

    /// Data directory path or `host:port`
    pub location: String,
}

/// One collection entry in the manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionEntry {
    pub db: String,
    pub name: String,

    /// Collection file, relative to the archive root
    pub data_file: String,

    /// Metadata record, relative to the archive root
    pub metadata_file: String,

    /// Documents written at dump time
    pub document_count: u64,

    /// Size of the collection file in bytes
    pub size_bytes: u64,
}

impl CollectionEntry {
    pub fn namespace(&self) -> crate::Result<Namespace> {
        Namespace::new(self.db.clone(), self.name.clone())
    }
}

/// Description of the sealed operation log segment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OplogInfo {
    /// Segment file, relative to the archive root
    pub file: String,

    /// Source log head when the dump started (exclusive lower bound)
    pub start_ts: Option<LogicalTs>,

    /// Timestamp of the last captured record
    pub end_ts: Option<LogicalTs>,

    pub record_count: u64,
}

/// Top-level archive descriptor (`manifest.json`)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArchiveManifest {
    pub format_version: u32,

    /// Unique archive identifier
    pub archive_id: String,

    /// Version of the tool that wrote the archive
    pub tool_version: String,

    /// Creation timestamp (RFC 3339)
    pub created_at: String,

    pub source: SourceDescriptor,

    pub collections: Vec<CollectionEntry>,

    #[serde(default)]
    pub oplog: Option<OplogInfo>,
}

impl ArchiveManifest {
    pub fn total_documents(&self) -> u64 {
        self.collections.iter().map(|c| c.document_count).sum()
    }

    pub fn find(&self, ns: &Namespace) -> Option<&CollectionEntry> {
        self.collections
            .iter()
            .find(|c| c.db == ns.db && c.name == ns.collection)
    }

    /// Distinct database names, in manifest order.
    pub fn databases(&self) -> Vec<&str> {
        let mut out: Vec<&str> = Vec::new();
        for c in &self.collections {
            if !out.contains(&c.db.as_str()) {
                out.push(&c.db);
            }
        }
        out
    }
}

/// Contents of the terminal `COMPLETE` marker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletionMarker {
    /// Completion timestamp (RFC 3339)
    pub completed_at: String,

    /// Hex SHA-256 of the exact `manifest.json` bytes
    pub manifest_sha256: String,
}

impl CompletionMarker {
    pub fn new(manifest_sha256: impl Into<String>) -> Self {
        Self {
            completed_at: chrono::Utc::now().to_rfc3339(),
            manifest_sha256: manifest_sha256.into(),
        }
    }
}
