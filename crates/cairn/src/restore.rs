//! Restore reader: archive directory → target store.
//!
//! A restore moves forward through fixed phases:
//!
//! ```text
//! Validating → Dropping (--drop) → Loading → IndexBuilding
//!            → LogReplaying (--oplogReplay) → Done
//! ```
//!
//! Nothing touches the target until validation has passed; with `objcheck`
//! that includes a full read of every selected record.

use crate::pool::WorkerPool;
use crate::replay::{ReplayPlan, ReplayStats};
use cairn_archive::{ArchiveReader, LogEntry, Record};
use cairn_core::{
    observe, CairnError, CancelToken, CollectionEntry, Document, DocumentStore, InsertOutcome,
    Namespace, Predicate, RestoreOptions, Result, StoreSession,
};
use std::fmt;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum RestorePhase {
    Validating,
    Dropping,
    Loading,
    IndexBuilding,
    LogReplaying,
    Done,
}

impl fmt::Display for RestorePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RestorePhase::Validating => "validating",
            RestorePhase::Dropping => "dropping",
            RestorePhase::Loading => "loading",
            RestorePhase::IndexBuilding => "building indexes",
            RestorePhase::LogReplaying => "replaying oplog",
            RestorePhase::Done => "done",
        };
        f.write_str(name)
    }
}

/// Forward-only phase cursor.
#[derive(Debug)]
pub struct PhaseTracker {
    current: RestorePhase,
}

impl Default for PhaseTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl PhaseTracker {
    pub fn new() -> Self {
        Self {
            current: RestorePhase::Validating,
        }
    }

    pub fn current(&self) -> RestorePhase {
        self.current
    }

    /// Move to `next`. Staying put or going backwards is an internal error.
    pub fn advance(&mut self, next: RestorePhase) -> Result<()> {
        if next <= self.current {
            return Err(CairnError::InvalidState(format!(
                "restore cannot move from {} to {}",
                self.current, next
            )));
        }
        tracing::info!("Restore phase: {}", next);
        self.current = next;
        Ok(())
    }
}

/// Per-collection counters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionRestoreStats {
    pub namespace: Namespace,
    pub inserted: u64,
    /// Malformed records that could not be decoded
    pub skipped: u64,
    /// Documents rejected by `--filter`
    pub filtered: u64,
    /// Documents the target refused (duplicate key)
    pub failed: u64,
}

impl CollectionRestoreStats {
    pub fn new(namespace: Namespace) -> Self {
        Self {
            namespace,
            inserted: 0,
            skipped: 0,
            filtered: 0,
            failed: 0,
        }
    }
}

/// What a restore did. Returned on success and carried (as text) by
/// `Interrupted`.
#[derive(Debug, Clone)]
pub struct RestoreSummary {
    pub collections: Vec<CollectionRestoreStats>,
    pub indexes_built: u64,
    pub indexes_failed: u64,
    pub oplog: Option<ReplayStats>,
    pub phase: RestorePhase,
    pub elapsed: Duration,
}

impl Default for RestoreSummary {
    fn default() -> Self {
        Self {
            collections: Vec::new(),
            indexes_built: 0,
            indexes_failed: 0,
            oplog: None,
            phase: RestorePhase::Validating,
            elapsed: Duration::ZERO,
        }
    }
}

impl RestoreSummary {
    pub fn inserted(&self) -> u64 {
        self.collections.iter().map(|c| c.inserted).sum()
    }

    pub fn skipped(&self) -> u64 {
        self.collections.iter().map(|c| c.skipped).sum()
    }

    pub fn filtered(&self) -> u64 {
        self.collections.iter().map(|c| c.filtered).sum()
    }

    pub fn failed(&self) -> u64 {
        self.collections.iter().map(|c| c.failed).sum()
    }

    pub fn collection(&self, ns: &Namespace) -> Option<&CollectionRestoreStats> {
        self.collections.iter().find(|c| &c.namespace == ns)
    }

    /// True when the run finished but some records were not restored.
    ///
    /// Filtered documents are excluded on purpose and do not count.
    pub fn is_partial(&self) -> bool {
        self.skipped() > 0
            || self.failed() > 0
            || self.indexes_failed > 0
            || self.oplog.is_some_and(|o| o.skipped > 0)
    }
}

impl fmt::Display for RestoreSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} documents restored to {} collections ({} skipped, {} filtered, {} failed), {} indexes built",
            self.inserted(),
            self.collections.len(),
            self.skipped(),
            self.filtered(),
            self.failed(),
            self.indexes_built
        )?;
        if self.indexes_failed > 0 {
            write!(f, " ({} failed)", self.indexes_failed)?;
        }
        if let Some(oplog) = &self.oplog {
            write!(
                f,
                ", oplog {} applied / {} skipped",
                oplog.applied, oplog.skipped
            )?;
        }
        write!(f, ", phase {}", self.phase)
    }
}

/// Archive state carried from validation into the target phases.
struct Prepared {
    archive: ArchiveReader,
    selection: Vec<CollectionEntry>,
    predicate: Option<Predicate>,
}

/// Restores an archive into a target store.
pub struct RestoreReader {
    options: RestoreOptions,
    cancel: CancelToken,
}

impl RestoreReader {
    pub fn new(options: RestoreOptions) -> Self {
        Self {
            options,
            cancel: CancelToken::new(),
        }
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn options(&self) -> &RestoreOptions {
        &self.options
    }

    /// Validate the archive, then open the target and restore into it.
    ///
    /// `open_target` is only called once validation has passed, so an
    /// incomplete archive or a failed `objcheck` never reaches the target.
    pub fn run<F>(&self, open_target: F) -> Result<RestoreSummary>
    where
        F: FnOnce() -> Result<Box<dyn DocumentStore>>,
    {
        let started = Instant::now();
        let result = self.validate().and_then(|prepared| {
            let target = open_target()?;
            self.execute(prepared, target.as_ref(), started)
        });
        observe::record_run("restore", started.elapsed(), result.is_ok());
        result
    }

    /// Restore into an already open target.
    pub fn run_on(&self, target: &dyn DocumentStore) -> Result<RestoreSummary> {
        let started = Instant::now();
        let result = self
            .validate()
            .and_then(|prepared| self.execute(prepared, target, started));
        observe::record_run("restore", started.elapsed(), result.is_ok());
        result
    }

    fn validate(&self) -> Result<Prepared> {
        tracing::info!("Restore phase: {}", RestorePhase::Validating);
        let options = &self.options;

        if options.oplog_limit.is_some() && !options.oplog_replay {
            return Err(CairnError::Config(
                "--oplogLimit requires --oplogReplay".into(),
            ));
        }
        let predicate = options.filter.as_deref().map(Predicate::parse).transpose()?;

        let archive = ArchiveReader::open(&options.archive)?;
        if options.oplog_replay && !archive.has_oplog() {
            return Err(CairnError::Config(format!(
                "{} has no operation log; it was not dumped with --oplog",
                options.archive.display()
            )));
        }

        let selection: Vec<CollectionEntry> =
            archive.collections(&options.namespaces).cloned().collect();
        if selection.is_empty() {
            tracing::warn!(
                "No collections in {} match the requested namespaces",
                options.archive.display()
            );
        }

        if options.objcheck {
            self.check_records(&archive, &selection)?;
        }
        if self.cancel.is_cancelled() {
            return Err(CairnError::Interrupted(
                "restore stopped during validation; target untouched".into(),
            ));
        }

        Ok(Prepared {
            archive,
            selection,
            predicate,
        })
    }

    /// Full structural pass over every selected record (`--objcheck`).
    fn check_records(&self, archive: &ArchiveReader, selection: &[CollectionEntry]) -> Result<()> {
        let mut documents = 0u64;
        for entry in selection {
            let ns = entry.namespace()?;
            let metadata = archive.read_metadata(entry)?;
            for index in &metadata.indexes {
                index.validate().map_err(|e| invalid(&ns, e))?;
            }

            let mut seen = 0u64;
            for record in archive.open_collection(entry)? {
                match record? {
                    Record::Document(doc) => doc.validate().map_err(|e| invalid(&ns, e))?,
                    Record::Malformed { index, reason } => {
                        return Err(CairnError::ValidationFailed(format!(
                            "{} record {}: {}",
                            ns, index, reason
                        )))
                    }
                }
                seen += 1;
            }
            if seen != entry.document_count {
                return Err(CairnError::ValidationFailed(format!(
                    "{}: manifest lists {} documents but the file holds {}",
                    ns, entry.document_count, seen
                )));
            }
            documents += seen;
            if self.cancel.is_cancelled() {
                return Ok(());
            }
        }

        if self.options.oplog_replay {
            if let Some(segment) = archive.open_oplog()? {
                for entry in segment {
                    match entry? {
                        LogEntry::Record(record) => record.validate().map_err(|e| {
                            CairnError::ValidationFailed(format!("oplog: {}", detail(e)))
                        })?,
                        LogEntry::Malformed { index, reason } => {
                            return Err(CairnError::ValidationFailed(format!(
                                "oplog record {}: {}",
                                index, reason
                            )))
                        }
                    }
                }
            }
        }

        tracing::info!(
            "Validated {} documents in {} collections",
            documents,
            selection.len()
        );
        Ok(())
    }

    fn execute(
        &self,
        prepared: Prepared,
        target: &dyn DocumentStore,
        started: Instant,
    ) -> Result<RestoreSummary> {
        let Prepared {
            archive,
            selection,
            predicate,
        } = prepared;
        let options = &self.options;
        let mut tracker = PhaseTracker::new();
        let mut summary = RestoreSummary::default();

        tracing::info!(
            "Restoring {} ({} collections) into {}",
            options.archive.display(),
            selection.len(),
            target.describe()
        );
        let mut session = target.session()?;

        if options.drop {
            tracker.advance(RestorePhase::Dropping)?;
            for entry in &selection {
                let ns = entry.namespace()?;
                if session.drop_collection(&ns)? {
                    tracing::info!("Dropped {}", ns);
                }
            }
        }

        tracker.advance(RestorePhase::Loading)?;
        let outcome = WorkerPool::new(options.workers).run(
            selection.clone(),
            &self.cancel,
            || target.session(),
            |worker, entry| {
                self.load_collection(worker.as_mut(), &archive, &entry, predicate.as_ref())
            },
        );
        summary.collections = outcome.completed;
        if let Some(e) = outcome.error {
            summary.phase = tracker.current();
            tracing::error!("Restore aborted: {}", summary);
            return Err(e);
        }
        self.check_interrupted(&mut summary, &tracker, started)?;

        tracker.advance(RestorePhase::IndexBuilding)?;
        self.build_indexes(session.as_mut(), &archive, &selection, &mut summary)?;
        self.check_interrupted(&mut summary, &tracker, started)?;

        if options.oplog_replay {
            tracker.advance(RestorePhase::LogReplaying)?;
            let segment = archive.open_oplog()?.ok_or_else(|| {
                CairnError::InvalidState("operation log segment disappeared".into())
            })?;
            let plan = ReplayPlan::build(segment, &options.namespaces, options.oplog_limit)?;
            match plan.apply(session.as_mut(), &self.cancel) {
                Ok(stats) => summary.oplog = Some(stats),
                Err(CairnError::Interrupted(_)) => {
                    self.check_interrupted(&mut summary, &tracker, started)?
                }
                Err(e) => return Err(e),
            }
        }

        tracker.advance(RestorePhase::Done)?;
        summary.phase = tracker.current();
        summary.elapsed = started.elapsed();
        if summary.is_partial() {
            tracing::warn!("Restore finished with problems: {}", summary);
        } else {
            tracing::info!("Restore finished: {}", summary);
        }
        Ok(summary)
    }

    fn load_collection(
        &self,
        session: &mut dyn StoreSession,
        archive: &ArchiveReader,
        entry: &CollectionEntry,
        predicate: Option<&Predicate>,
    ) -> Result<CollectionRestoreStats> {
        let started = Instant::now();
        let ns = entry.namespace()?;
        let metadata = archive.read_metadata(entry)?;
        session.create_collection(&ns, &metadata.options)?;

        let mut stats = CollectionRestoreStats::new(ns.clone());
        let capacity = self.options.batch_size.min(entry.document_count as usize);
        let mut batch = Vec::with_capacity(capacity);
        for record in archive.open_collection(entry)? {
            match record? {
                Record::Malformed { index, reason } => {
                    tracing::warn!("Skipping malformed record {} in {}: {}", index, ns, reason);
                    stats.skipped += 1;
                }
                Record::Document(doc) => {
                    if predicate.is_some_and(|p| !p.matches(&doc)) {
                        stats.filtered += 1;
                        continue;
                    }
                    batch.push(doc);
                    if batch.len() >= self.options.batch_size {
                        self.flush(session, &ns, &mut batch, &mut stats)?;
                        if self.cancel.is_cancelled() {
                            tracing::debug!(
                                "Load of {} stopped after {} documents",
                                ns,
                                stats.inserted
                            );
                            return Ok(stats);
                        }
                    }
                }
            }
        }
        self.flush(session, &ns, &mut batch, &mut stats)?;

        observe::record_collection_restored(
            stats.inserted,
            stats.skipped,
            stats.filtered,
            stats.failed,
        );
        tracing::info!(
            "Restored {} ({} inserted, {} skipped, {} filtered, {} failed) in {:.2?}",
            ns,
            stats.inserted,
            stats.skipped,
            stats.filtered,
            stats.failed,
            started.elapsed()
        );
        Ok(stats)
    }

    fn flush(
        &self,
        session: &mut dyn StoreSession,
        ns: &Namespace,
        batch: &mut Vec<Document>,
        stats: &mut CollectionRestoreStats,
    ) -> Result<()> {
        if batch.is_empty() {
            return Ok(());
        }
        let outcomes = session.insert_many(ns, batch)?;
        for (doc, outcome) in batch.iter().zip(&outcomes) {
            match outcome {
                InsertOutcome::Inserted => stats.inserted += 1,
                InsertOutcome::Failed(reason) => {
                    stats.failed += 1;
                    tracing::warn!(
                        "Failed to insert _id {} into {}: {}",
                        doc.id_key(),
                        ns,
                        reason
                    );
                    if self.options.stop_on_error {
                        return Err(CairnError::PartialFailure(format!(
                            "insert of _id {} into {} failed: {}",
                            doc.id_key(),
                            ns,
                            reason
                        )));
                    }
                }
            }
        }
        tracing::debug!("Flushed {} documents into {}", batch.len(), ns);
        batch.clear();
        Ok(())
    }

    fn build_indexes(
        &self,
        session: &mut dyn StoreSession,
        archive: &ArchiveReader,
        selection: &[CollectionEntry],
        summary: &mut RestoreSummary,
    ) -> Result<()> {
        for entry in selection {
            if self.cancel.is_cancelled() {
                return Ok(());
            }
            let ns = entry.namespace()?;
            let metadata = archive.read_metadata(entry)?;
            for index in metadata.secondary_indexes() {
                let version = index.restored_version(self.options.keep_index_version);
                if version != index.v {
                    tracing::debug!(
                        "Upgrading index {} on {} from v{} to v{}",
                        index.name,
                        ns,
                        index.v,
                        version
                    );
                }
                let spec = index.clone().with_version(version);
                match session.create_index(&ns, &spec) {
                    Ok(()) => summary.indexes_built += 1,
                    Err(e) => {
                        summary.indexes_failed += 1;
                        tracing::warn!("Failed to build index {} on {}: {}", index.name, ns, e);
                        if self.options.stop_on_error {
                            return Err(CairnError::PartialFailure(format!(
                                "index {} on {}: {}",
                                index.name,
                                ns,
                                detail(e)
                            )));
                        }
                    }
                }
            }
        }
        Ok(())
    }

    fn check_interrupted(
        &self,
        summary: &mut RestoreSummary,
        tracker: &PhaseTracker,
        started: Instant,
    ) -> Result<()> {
        if !self.cancel.is_cancelled() {
            return Ok(());
        }
        summary.phase = tracker.current();
        summary.elapsed = started.elapsed();
        tracing::warn!("Restore interrupted: {}", summary);
        Err(CairnError::Interrupted(summary.to_string()))
    }
}

/// Message text of an error without its variant prefix.
fn detail(e: CairnError) -> String {
    match e {
        CairnError::ValidationFailed(msg) | CairnError::Storage(msg) => msg,
        other => other.to_string(),
    }
}

fn invalid(ns: &Namespace, e: CairnError) -> CairnError {
    CairnError::ValidationFailed(format!("{}: {}", ns, detail(e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phases_only_move_forward() {
        let mut tracker = PhaseTracker::new();
        assert_eq!(tracker.current(), RestorePhase::Validating);
        tracker.advance(RestorePhase::Loading).unwrap();
        tracker.advance(RestorePhase::IndexBuilding).unwrap();

        let err = tracker.advance(RestorePhase::Dropping).unwrap_err();
        assert!(matches!(err, CairnError::InvalidState(_)));
        assert!(tracker.advance(RestorePhase::IndexBuilding).is_err());
        assert_eq!(tracker.current(), RestorePhase::IndexBuilding);

        tracker.advance(RestorePhase::Done).unwrap();
    }

    #[test]
    fn test_summary_totals_and_partial() {
        let ns = |c: &str| Namespace::new("db", c).unwrap();
        let mut summary = RestoreSummary::default();
        summary.collections.push(CollectionRestoreStats {
            inserted: 10,
            filtered: 3,
            ..CollectionRestoreStats::new(ns("a"))
        });
        summary.collections.push(CollectionRestoreStats {
            inserted: 5,
            ..CollectionRestoreStats::new(ns("b"))
        });
        assert_eq!(summary.inserted(), 15);
        assert_eq!(summary.filtered(), 3);
        assert!(!summary.is_partial());
        assert_eq!(summary.collection(&ns("b")).map(|c| c.inserted), Some(5));

        summary.oplog = Some(ReplayStats {
            applied: 2,
            skipped: 1,
            excluded: 0,
        });
        assert!(summary.is_partial());
        let text = summary.to_string();
        assert!(text.contains("15 documents restored to 2 collections"));
        assert!(text.contains("oplog 2 applied / 1 skipped"));
    }

    #[test]
    fn test_detail_strips_prefix() {
        let e = CairnError::ValidationFailed("_id cannot be an array".into());
        let ns = Namespace::new("db", "c").unwrap();
        assert_eq!(
            invalid(&ns, e).to_string(),
            "Validation failed: db.c: _id cannot be an array"
        );
    }
}
