//! Operation log replay.
//!
//! Records are selected by namespace and `--oplogLimit`, stably sorted by
//! timestamp, then applied one at a time. A record whose target is missing
//! or whose precondition no longer holds is skipped, never fatal.

use cairn_archive::{LogEntry, OplogSegmentReader};
use cairn_core::{
    observe, ApplyOutcome, CairnError, CancelToken, LogicalTs, NamespaceFilter, OpKind,
    OplogRecord, Result, StoreSession,
};

/// Records chosen for replay.
#[derive(Debug, Default)]
pub struct ReplayPlan {
    /// Selected records in application order
    pub records: Vec<OplogRecord>,

    /// Records outside the selected namespaces or at/after the limit
    pub excluded: u64,

    /// Entries that could not be decoded
    pub malformed: u64,
}

/// Counters for one replay run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplayStats {
    pub applied: u64,
    /// Preconditions that no longer held, plus malformed entries
    pub skipped: u64,
    pub excluded: u64,
}

impl ReplayPlan {
    /// Read a segment and select the records to apply.
    pub fn build(
        segment: OplogSegmentReader,
        namespaces: &NamespaceFilter,
        limit: Option<LogicalTs>,
    ) -> Result<Self> {
        let mut plan = Self::default();
        for entry in segment {
            match entry? {
                LogEntry::Record(record) => plan.push(record, namespaces, limit),
                LogEntry::Malformed { index, reason } => {
                    tracing::warn!("Skipping malformed oplog entry {}: {}", index, reason);
                    plan.malformed += 1;
                }
            }
        }
        // sort_by_key is stable: records sharing a ts keep segment order
        plan.records.sort_by_key(|r| r.ts);
        Ok(plan)
    }

    fn push(
        &mut self,
        record: OplogRecord,
        namespaces: &NamespaceFilter,
        limit: Option<LogicalTs>,
    ) {
        if limit.is_some_and(|limit| record.ts >= limit) {
            self.excluded += 1;
            return;
        }
        match record.namespace() {
            Ok(ns) if namespaces.includes(&ns) => self.records.push(record),
            Ok(_) => self.excluded += 1,
            Err(e) => {
                tracing::warn!("Skipping oplog record at ts {}: {}", record.ts, e);
                self.malformed += 1;
            }
        }
    }

    /// Apply every planned record in order.
    pub fn apply(
        self,
        session: &mut dyn StoreSession,
        cancel: &CancelToken,
    ) -> Result<ReplayStats> {
        let mut stats = ReplayStats {
            skipped: self.malformed,
            excluded: self.excluded,
            ..Default::default()
        };

        for record in &self.records {
            if cancel.is_cancelled() {
                return Err(CairnError::Interrupted(format!(
                    "oplog replay stopped at ts {} ({} applied)",
                    record.ts, stats.applied
                )));
            }
            if record.op == OpKind::Noop {
                stats.skipped += 1;
                continue;
            }
            match session.apply_op(record)? {
                ApplyOutcome::Applied => stats.applied += 1,
                ApplyOutcome::Skipped(reason) => {
                    tracing::warn!(
                        "Skipped oplog record ts {} on {}: {}",
                        record.ts,
                        record.ns,
                        reason
                    );
                    stats.skipped += 1;
                }
            }
        }

        observe::record_oplog("applied", stats.applied);
        observe::record_oplog("skipped", stats.skipped);
        tracing::info!(
            "Replayed operation log: {} applied, {} skipped, {} excluded",
            stats.applied,
            stats.skipped,
            stats.excluded
        );
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cairn_archive::OplogSegmentWriter;
    use cairn_core::Namespace;
    use serde_json::json;
    use tempfile::TempDir;

    fn segment(dir: &TempDir, records: &[OplogRecord]) -> OplogSegmentReader {
        let path = dir.path().join("oplog.log");
        let mut writer = OplogSegmentWriter::create(&path).unwrap();
        for record in records {
            writer.append(record).unwrap();
        }
        writer.finish().unwrap();
        OplogSegmentReader::open(&path).unwrap()
    }

    #[test]
    fn test_plan_applies_namespace_and_limit() {
        let dir = TempDir::new().unwrap();
        let shop = Namespace::new("shop", "orders").unwrap();
        let crm = Namespace::new("crm", "people").unwrap();
        let reader = segment(
            &dir,
            &[
                OplogRecord::insert(1, &shop, json!({"_id": 1})),
                OplogRecord::insert(2, &crm, json!({"_id": 1})),
                OplogRecord::insert(3, &shop, json!({"_id": 2})),
                OplogRecord::insert(4, &shop, json!({"_id": 3})),
            ],
        );
        let filter = NamespaceFilter::new(Some("shop".into()), None).unwrap();
        let plan = ReplayPlan::build(reader, &filter, Some(4)).unwrap();
        let ts: Vec<_> = plan.records.iter().map(|r| r.ts).collect();
        assert_eq!(ts, vec![1, 3]);
        assert_eq!(plan.excluded, 2);
        assert_eq!(plan.malformed, 0);
    }

    #[test]
    fn test_plan_sorts_stably() {
        let ns = Namespace::new("db", "c").unwrap();
        let filter = NamespaceFilter::all();
        let mut plan = ReplayPlan::default();
        for (ts, id) in [(7, "a"), (3, "b"), (7, "c"), (1, "d")] {
            plan.push(OplogRecord::insert(ts, &ns, json!({"_id": id})), &filter, None);
        }
        plan.records.sort_by_key(|r| r.ts);
        let order: Vec<_> = plan.records.iter().map(|r| r.o["_id"].clone()).collect();
        assert_eq!(order, vec![json!("d"), json!("b"), json!("a"), json!("c")]);
    }

    #[test]
    fn test_invalid_namespace_counts_as_malformed() {
        let mut plan = ReplayPlan::default();
        let mut record = OplogRecord::insert(1, &Namespace::new("db", "c").unwrap(), json!({}));
        record.ns = "no-dot".into();
        plan.push(record, &NamespaceFilter::all(), None);
        assert!(plan.records.is_empty());
        assert_eq!(plan.malformed, 1);
    }
}
