use crate::collection::{CollectionFileSummary, CollectionFileWriter};
use crate::oplog::{OplogSegmentWriter, SegmentSummary};
use crate::{COMPLETE_FILE, MANIFEST_FILE, OPLOG_FILE};
use cairn_core::error::{CairnError, Result};
use cairn_core::types::{
    ArchiveManifest, CollectionEntry, CollectionMetadata, CompletionMarker, LogicalTs, Namespace,
    OplogInfo, SourceDescriptor, ARCHIVE_FORMAT_VERSION,
};
use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

/// Builds an archive directory.
///
/// Collection files may be written concurrently from several workers; the
/// manifest and the `COMPLETE` marker are only written by [`finish`].
///
/// [`finish`]: ArchiveWriter::finish
pub struct ArchiveWriter {
    root: PathBuf,
    source: SourceDescriptor,
    collections: Mutex<Vec<CollectionEntry>>,
    oplog: Mutex<Option<OplogInfo>>,
}

impl ArchiveWriter {
    /// Prepare `root` for a new archive.
    ///
    /// A stale `COMPLETE` marker from an earlier archive in the same
    /// directory is removed before anything else is written.
    pub fn create(root: impl AsRef<Path>, source: SourceDescriptor) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        std::fs::create_dir_all(&root)?;

        for stale in [COMPLETE_FILE, MANIFEST_FILE] {
            let path = root.join(stale);
            if path.exists() {
                tracing::info!("Removing stale {}", path.display());
                std::fs::remove_file(&path)?;
            }
        }
        sync_dir(&root)?;

        Ok(Self {
            root,
            source,
            collections: Mutex::new(Vec::new()),
            oplog: Mutex::new(None),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Relative path of a namespace's collection file.
    pub fn data_file(ns: &Namespace) -> String {
        format!("{}/{}.docs", ns.db, ns.collection)
    }

    /// Relative path of a namespace's metadata record.
    pub fn metadata_file(ns: &Namespace) -> String {
        format!("{}/{}.metadata.json", ns.db, ns.collection)
    }

    /// Open the collection file for `ns`, creating its database directory.
    pub fn collection_writer(&self, ns: &Namespace) -> Result<CollectionFileWriter> {
        std::fs::create_dir_all(self.root.join(&ns.db))?;
        CollectionFileWriter::create(&self.resolve(&Self::data_file(ns)))
    }

    /// Write the metadata record for a collection.
    pub fn write_metadata(&self, metadata: &CollectionMetadata) -> Result<()> {
        let ns = Namespace::new(metadata.db.clone(), metadata.collection.clone())?;
        std::fs::create_dir_all(self.root.join(&ns.db))?;
        let json = serde_json::to_vec_pretty(metadata)?;
        write_synced(&self.resolve(&Self::metadata_file(&ns)), &json)
    }

    /// Record a finished collection in the manifest.
    pub fn add_collection(&self, ns: &Namespace, summary: CollectionFileSummary) {
        self.collections.lock().push(CollectionEntry {
            db: ns.db.clone(),
            name: ns.collection.clone(),
            data_file: Self::data_file(ns),
            metadata_file: Self::metadata_file(ns),
            document_count: summary.documents,
            size_bytes: summary.size_bytes,
        });
    }

    pub fn oplog_writer(&self) -> Result<OplogSegmentWriter> {
        OplogSegmentWriter::create(&self.root.join(OPLOG_FILE))
    }

    /// Record the sealed operation log segment. `start_ts` is the source
    /// log head observed before the first collection was dumped.
    pub fn set_oplog(&self, start_ts: Option<LogicalTs>, summary: SegmentSummary) {
        *self.oplog.lock() = Some(OplogInfo {
            file: OPLOG_FILE.to_string(),
            start_ts,
            end_ts: summary.last_ts,
            record_count: summary.records,
        });
    }

    /// Write `manifest.json` and then the `COMPLETE` marker.
    pub fn finish(self) -> Result<ArchiveManifest> {
        let mut collections = self.collections.into_inner();
        collections.sort_by(|a, b| (&a.db, &a.name).cmp(&(&b.db, &b.name)));

        let manifest = ArchiveManifest {
            format_version: ARCHIVE_FORMAT_VERSION,
            archive_id: uuid::Uuid::new_v4().to_string(),
            tool_version: env!("CARGO_PKG_VERSION").to_string(),
            created_at: chrono::Utc::now().to_rfc3339(),
            source: self.source,
            collections,
            oplog: self.oplog.into_inner(),
        };

        let manifest_bytes = serde_json::to_vec_pretty(&manifest)?;
        write_synced(&self.root.join(MANIFEST_FILE), &manifest_bytes)?;

        let marker = CompletionMarker::new(sha256_hex(&manifest_bytes));
        let marker_bytes = serde_json::to_vec_pretty(&marker)?;
        let tmp = self.root.join(format!("{}.tmp", COMPLETE_FILE));
        write_synced(&tmp, &marker_bytes)?;
        std::fs::rename(&tmp, self.root.join(COMPLETE_FILE))?;
        sync_dir(&self.root)?;

        tracing::info!(
            "Archive {} complete: {} collections, {} documents",
            self.root.display(),
            manifest.collections.len(),
            manifest.total_documents()
        );
        Ok(manifest)
    }

    fn resolve(&self, relative: &str) -> PathBuf {
        relative
            .split('/')
            .fold(self.root.clone(), |path, part| path.join(part))
    }
}

pub(crate) fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

fn write_synced(path: &Path, bytes: &[u8]) -> Result<()> {
    let mut file = File::create(path)?;
    file.write_all(bytes)?;
    file.sync_all()?;
    Ok(())
}

#[cfg(unix)]
fn sync_dir(dir: &Path) -> Result<()> {
    File::open(dir).and_then(|d| d.sync_all()).map_err(|e| {
        CairnError::Io(std::io::Error::new(
            e.kind(),
            format!("{}: {}", dir.display(), e),
        ))
    })
}

#[cfg(not(unix))]
fn sync_dir(_dir: &Path) -> Result<()> {
    Ok(())
}
