use crate::collection::CollectionFileReader;
use crate::oplog::OplogSegmentReader;
use crate::writer::sha256_hex;
use crate::{COMPLETE_FILE, MANIFEST_FILE};
use cairn_core::error::{CairnError, Result};
use cairn_core::types::{
    ArchiveManifest, CollectionEntry, CollectionMetadata, CompletionMarker, NamespaceFilter,
    ARCHIVE_FORMAT_VERSION,
};
use std::path::{Component, Path, PathBuf};

/// A validated, complete archive.
#[derive(Debug)]
pub struct ArchiveReader {
    root: PathBuf,
    manifest: ArchiveManifest,
    marker: CompletionMarker,
}

/// What [`ArchiveReader::probe`] found, without failing on an incomplete
/// or corrupt archive.
#[derive(Debug)]
pub struct ArchiveStatus {
    pub root: PathBuf,
    pub complete: bool,
    pub manifest: Option<ArchiveManifest>,
    pub completed_at: Option<String>,
    /// Why the archive cannot be restored, if it cannot
    pub problem: Option<String>,
    pub total_bytes: u64,
}

impl ArchiveReader {
    /// Open and validate an archive.
    ///
    /// Checks, in order: the directory exists, the `COMPLETE` marker exists
    /// and parses, the manifest digest matches the marker, the manifest
    /// parses with a supported format version, and every file it references
    /// exists. Any failure is [`CairnError::ArchiveCorrupt`].
    pub fn open(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        if !root.is_dir() {
            return Err(CairnError::ArchiveCorrupt(format!(
                "{} is not an archive directory",
                root.display()
            )));
        }

        let marker_path = root.join(COMPLETE_FILE);
        let marker_bytes = std::fs::read(&marker_path).map_err(|_| {
            CairnError::ArchiveCorrupt(format!(
                "{} is incomplete: no {} marker",
                root.display(),
                COMPLETE_FILE
            ))
        })?;
        let marker: CompletionMarker = serde_json::from_slice(&marker_bytes).map_err(|e| {
            CairnError::ArchiveCorrupt(format!("unreadable {} marker: {}", COMPLETE_FILE, e))
        })?;

        let manifest_bytes = std::fs::read(root.join(MANIFEST_FILE)).map_err(|e| {
            CairnError::ArchiveCorrupt(format!("cannot read {}: {}", MANIFEST_FILE, e))
        })?;
        if sha256_hex(&manifest_bytes) != marker.manifest_sha256 {
            return Err(CairnError::ArchiveCorrupt(format!(
                "{} does not match the digest in {}",
                MANIFEST_FILE, COMPLETE_FILE
            )));
        }
        let manifest: ArchiveManifest = serde_json::from_slice(&manifest_bytes).map_err(|e| {
            CairnError::ArchiveCorrupt(format!("invalid {}: {}", MANIFEST_FILE, e))
        })?;
        if manifest.format_version != ARCHIVE_FORMAT_VERSION {
            return Err(CairnError::ArchiveCorrupt(format!(
                "unsupported archive format version {}",
                manifest.format_version
            )));
        }

        let reader = Self {
            root,
            manifest,
            marker,
        };
        reader.check_files()?;
        tracing::debug!(
            "Opened archive {} ({} collections)",
            reader.root.display(),
            reader.manifest.collections.len()
        );
        Ok(reader)
    }

    /// Inspect an archive without requiring it to be restorable.
    pub fn probe(root: impl AsRef<Path>) -> ArchiveStatus {
        let root = root.as_ref().to_path_buf();
        let total_bytes = directory_size(&root).unwrap_or(0);
        match Self::open(&root) {
            Ok(reader) => ArchiveStatus {
                complete: true,
                completed_at: Some(reader.marker.completed_at.clone()),
                manifest: Some(reader.manifest),
                problem: None,
                total_bytes,
                root,
            },
            Err(e) => {
                let manifest = std::fs::read(root.join(MANIFEST_FILE))
                    .ok()
                    .and_then(|bytes| serde_json::from_slice(&bytes).ok());
                ArchiveStatus {
                    complete: false,
                    completed_at: None,
                    manifest,
                    problem: Some(e.to_string()),
                    total_bytes,
                    root,
                }
            }
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn manifest(&self) -> &ArchiveManifest {
        &self.manifest
    }

    pub fn completed_at(&self) -> &str {
        &self.marker.completed_at
    }

    pub fn has_oplog(&self) -> bool {
        self.manifest.oplog.is_some()
    }

    /// Manifest entries selected by `filter`, in manifest order.
    pub fn collections<'a>(
        &'a self,
        filter: &'a NamespaceFilter,
    ) -> impl Iterator<Item = &'a CollectionEntry> + 'a {
        self.manifest.collections.iter().filter(move |c| {
            filter.includes_db(&c.db)
                && filter
                    .collection
                    .as_deref()
                    .map_or(true, |want| want == c.name)
        })
    }

    pub fn open_collection(&self, entry: &CollectionEntry) -> Result<CollectionFileReader> {
        CollectionFileReader::open(&self.resolve(&entry.data_file)?)
    }

    pub fn read_metadata(&self, entry: &CollectionEntry) -> Result<CollectionMetadata> {
        let path = self.resolve(&entry.metadata_file)?;
        let bytes = std::fs::read(&path).map_err(|e| {
            CairnError::ArchiveCorrupt(format!("cannot read {}: {}", path.display(), e))
        })?;
        serde_json::from_slice(&bytes).map_err(|e| {
            CairnError::ArchiveCorrupt(format!("invalid metadata {}: {}", path.display(), e))
        })
    }

    /// Reader over the captured segment, if the archive has one.
    pub fn open_oplog(&self) -> Result<Option<OplogSegmentReader>> {
        match &self.manifest.oplog {
            Some(info) => Ok(Some(OplogSegmentReader::open(&self.resolve(&info.file)?)?)),
            None => Ok(None),
        }
    }

    /// Total size of every file under the archive root.
    pub fn total_bytes(&self) -> Result<u64> {
        directory_size(&self.root)
    }

    fn check_files(&self) -> Result<()> {
        let oplog = self.manifest.oplog.iter().map(|o| o.file.as_str());
        let files = self
            .manifest
            .collections
            .iter()
            .flat_map(|c| [c.data_file.as_str(), c.metadata_file.as_str()])
            .chain(oplog);
        for relative in files {
            let path = self.resolve(relative)?;
            if !path.is_file() {
                return Err(CairnError::ArchiveCorrupt(format!(
                    "missing archive file {}",
                    relative
                )));
            }
        }
        Ok(())
    }

    /// Map a manifest path onto the archive root, refusing anything that
    /// would escape it.
    fn resolve(&self, relative: &str) -> Result<PathBuf> {
        let rel = Path::new(relative);
        if relative.is_empty() || !rel.components().all(|c| matches!(c, Component::Normal(_))) {
            return Err(CairnError::ArchiveCorrupt(format!(
                "invalid path in manifest: {}",
                relative
            )));
        }
        Ok(self.root.join(rel))
    }
}

fn directory_size(path: &Path) -> Result<u64> {
    let mut size = 0u64;
    for entry in walkdir::WalkDir::new(path) {
        let entry = entry.map_err(|e| CairnError::Io(std::io::Error::other(e.to_string())))?;
        if entry.file_type().is_file() {
            let metadata = entry
                .metadata()
                .map_err(|e| CairnError::Io(std::io::Error::other(e.to_string())))?;
            size += metadata.len();
        }
    }
    Ok(size)
}
