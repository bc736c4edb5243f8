//! Dump writer: source store → archive directory.

use crate::pool::WorkerPool;
use cairn_archive::ArchiveWriter;
use cairn_core::{
    observe, ArchiveManifest, CairnError, CancelToken, DocumentStore, DumpOptions, LogicalTs,
    Namespace, Result, ScanControl, SourceDescriptor, SourceKind, StoreSession,
};
use std::fmt;
use std::path::PathBuf;
use std::time::{Duration, Instant};

/// Per-collection result of a dump.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionDumpStats {
    pub namespace: Namespace,
    pub documents: u64,
    pub size_bytes: u64,
}

/// Result of a finished dump.
#[derive(Debug, Clone)]
pub struct DumpReport {
    pub archive: PathBuf,
    pub manifest: ArchiveManifest,
    pub collections: Vec<CollectionDumpStats>,
    /// Captured log records, when `--oplog` was requested
    pub oplog_records: Option<u64>,
    pub elapsed: Duration,
}

impl DumpReport {
    pub fn total_documents(&self) -> u64 {
        self.collections.iter().map(|c| c.documents).sum()
    }
}

impl fmt::Display for DumpReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "dumped {} documents from {} collections to {} in {:.2?}",
            self.total_documents(),
            self.collections.len(),
            self.archive.display(),
            self.elapsed
        )?;
        if let Some(n) = self.oplog_records {
            write!(f, ", {} oplog records", n)?;
        }
        Ok(())
    }
}

/// Writes a complete archive from a source store.
///
/// The archive's `COMPLETE` marker is written only after every selected
/// collection (and the log segment, when capturing) has been sealed. An
/// interrupted or failed run leaves a directory that restore rejects.
pub struct DumpWriter<'a> {
    source: &'a dyn DocumentStore,
    kind: SourceKind,
    options: DumpOptions,
    cancel: CancelToken,
}

impl<'a> DumpWriter<'a> {
    pub fn new(source: &'a dyn DocumentStore, kind: SourceKind, options: DumpOptions) -> Self {
        Self {
            source,
            kind,
            options,
            cancel: CancelToken::new(),
        }
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn options(&self) -> &DumpOptions {
        &self.options
    }

    pub fn run(&self) -> Result<DumpReport> {
        let started = Instant::now();
        let result = self.run_inner(started);
        observe::record_run("dump", started.elapsed(), result.is_ok());
        result
    }

    fn run_inner(&self, started: Instant) -> Result<DumpReport> {
        let location = self.source.describe();
        tracing::info!("Dumping {} to {}", location, self.options.out.display());

        let mut session = self.source.session()?;

        // The log head must be read before the first collection so that
        // every write racing with the dump lands in the captured segment.
        let head = if self.options.oplog {
            match session.oplog_head()? {
                Some(ts) => {
                    tracing::info!("Source operation log head is {}", ts);
                    Some(ts)
                }
                None => {
                    return Err(CairnError::Config(format!(
                        "{} has no operation log; --oplog requires a live server",
                        location
                    )))
                }
            }
        } else {
            None
        };

        let namespaces = self.select_namespaces(session.as_mut())?;
        let total = namespaces.len();
        if total == 0 {
            tracing::warn!("No collections selected for dump");
        }

        let archive = ArchiveWriter::create(
            &self.options.out,
            SourceDescriptor {
                kind: self.kind,
                location,
            },
        )?;

        let outcome = WorkerPool::new(self.options.workers).run(
            namespaces,
            &self.cancel,
            || self.source.session(),
            |worker, ns| self.dump_collection(worker.as_mut(), &archive, ns),
        );
        if let Some(e) = outcome.error {
            return Err(e);
        }
        let collections: Vec<CollectionDumpStats> =
            outcome.completed.into_iter().flatten().collect();
        self.check_cancelled(collections.len(), total)?;

        let oplog_records = match head {
            Some(head) => Some(self.capture_oplog(session.as_mut(), &archive, head)?),
            None => None,
        };
        self.check_cancelled(collections.len(), total)?;

        let manifest = archive.finish()?;
        let report = DumpReport {
            archive: self.options.out.clone(),
            manifest,
            collections,
            oplog_records,
            elapsed: started.elapsed(),
        };
        tracing::info!("{}", report);
        Ok(report)
    }

    fn select_namespaces(&self, session: &mut dyn StoreSession) -> Result<Vec<Namespace>> {
        let filter = &self.options.namespaces;
        let mut selected = Vec::new();
        for db in session.list_databases()? {
            if !filter.includes_db(&db) {
                continue;
            }
            for collection in session.list_collections(&db)? {
                let ns = Namespace::new(db.clone(), collection)?;
                if filter.includes(&ns) {
                    selected.push(ns);
                }
            }
        }
        Ok(selected)
    }

    /// Stream one collection into its archive file.
    ///
    /// Returns `None` when the scan was cut short by cancellation; the
    /// partial file is left unsealed and unreferenced.
    fn dump_collection(
        &self,
        session: &mut dyn StoreSession,
        archive: &ArchiveWriter,
        ns: Namespace,
    ) -> Result<Option<CollectionDumpStats>> {
        let started = Instant::now();
        let metadata = session.collection_metadata(&ns)?;
        let mut file = archive.collection_writer(&ns)?;
        let cancel = &self.cancel;

        session.scan(&ns, &mut |doc| {
            if cancel.is_cancelled() {
                return Ok(ScanControl::Stop);
            }
            file.append(&doc)?;
            Ok(ScanControl::Continue)
        })?;

        if cancel.is_cancelled() {
            tracing::debug!("Dump of {} stopped after {} documents", ns, file.documents());
            return Ok(None);
        }

        let summary = file.finish()?;
        archive.write_metadata(&metadata)?;
        archive.add_collection(&ns, summary);

        let elapsed = started.elapsed();
        observe::record_collection_dumped(summary.documents, elapsed);
        tracing::info!(
            "Dumped {} ({} documents, {} bytes) in {:.2?}",
            ns,
            summary.documents,
            summary.size_bytes,
            elapsed
        );
        Ok(Some(CollectionDumpStats {
            namespace: ns,
            documents: summary.documents,
            size_bytes: summary.size_bytes,
        }))
    }

    fn capture_oplog(
        &self,
        session: &mut dyn StoreSession,
        archive: &ArchiveWriter,
        head: LogicalTs,
    ) -> Result<u64> {
        let mut log = archive.oplog_writer()?;
        let cancel = &self.cancel;
        session.oplog_since(head, &mut |record| {
            if cancel.is_cancelled() {
                return Err(CairnError::Interrupted(
                    "operation log capture interrupted".into(),
                ));
            }
            if !record.is_idempotent() {
                tracing::warn!(
                    "Record at ts {} increments {} without pinning it; restore will skip it",
                    record.ts,
                    record.unpinned_increments().join(", ")
                );
            }
            log.append(&record)
        })?;
        let summary = log.finish()?;
        archive.set_oplog(Some(head), summary);

        observe::record_oplog("captured", summary.records);
        tracing::info!(
            "Captured {} operation log records after ts {}",
            summary.records,
            head
        );
        Ok(summary.records)
    }

    fn check_cancelled(&self, done: usize, total: usize) -> Result<()> {
        if self.cancel.is_cancelled() {
            tracing::warn!(
                "Dump interrupted; {} is incomplete and will be rejected by restore",
                self.options.out.display()
            );
            return Err(CairnError::Interrupted(format!(
                "dump stopped after {} of {} collections; no {} marker written",
                done,
                total,
                cairn_archive::COMPLETE_FILE
            )));
        }
        Ok(())
    }
}
