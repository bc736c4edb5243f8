//! Restore validation, strictness and operation log replay.

mod common;

use cairn::prelude::*;
use cairn::{CollectionMetadata, OplogRecord, SourceKind};
use cairn_archive::frame::{self, HEADER_LEN, OPLOG_MAGIC, RECORD_OVERHEAD};
use cairn_archive::{ArchiveWriter, SegmentSummary, OPLOG_FILE};
use cairn_core::SourceDescriptor;
use common::{doc, ns, read_all, seed_datadir};
use serde_json::json;
use std::io::Write;
use std::path::Path;
use tempfile::TempDir;

fn dump_seeded(dir: &Path, orders: u64) -> Result<std::path::PathBuf> {
    let source = dir.join("source");
    let archive = dir.join("dump");
    seed_datadir(&source, orders)?;
    let store = DataDirStore::open(DataDirConfig::new(&source).with_read_only(true))?;
    DumpWriter::new(&store, SourceKind::Dbpath, DumpOptions::new(&archive)).run()?;
    Ok(archive)
}

fn restore(options: RestoreOptions, target: &Path) -> Result<RestoreSummary> {
    let config = StoreConfig::DataDir(DataDirConfig::new(target));
    RestoreReader::new(options).run(|| open_target(&config))
}

/// Flip a byte inside the first record of `shop.orders`.
fn corrupt_first_order(archive: &Path) -> Result<()> {
    let path = archive.join("shop").join("orders.docs");
    let mut bytes = std::fs::read(&path)?;
    let at = (HEADER_LEN + RECORD_OVERHEAD + 1) as usize;
    bytes[at] ^= 0x20;
    std::fs::write(&path, bytes)?;
    Ok(())
}

/// Archive holding `shop.orders` = `[{_id: 1, n: 0}]` and an operation log
/// segment written in the given (possibly unsorted) order.
fn archive_with_log(root: &Path, records: &[OplogRecord]) -> Result<()> {
    let writer = ArchiveWriter::create(
        root,
        SourceDescriptor {
            kind: SourceKind::Remote,
            location: "db.example:27017".into(),
        },
    )?;
    let orders = ns("shop", "orders");
    let mut file = writer.collection_writer(&orders)?;
    file.append(&doc(json!({"_id": 1, "n": 0})))?;
    let summary = file.finish()?;
    writer.write_metadata(&CollectionMetadata::new("shop", "orders"))?;
    writer.add_collection(&orders, summary);

    // Framed by hand: the segment writer refuses out-of-order input
    let path = root.join(OPLOG_FILE);
    let mut out = std::fs::File::create(&path)?;
    frame::write_header(&mut out, &OPLOG_MAGIC)?;
    let mut size = HEADER_LEN;
    for record in records {
        size += frame::write_record(&mut out, &serde_json::to_vec(record)?)?;
    }
    out.flush()?;
    writer.set_oplog(
        Some(0),
        SegmentSummary {
            records: records.len() as u64,
            first_ts: records.iter().map(|r| r.ts).min(),
            last_ts: records.iter().map(|r| r.ts).max(),
            size_bytes: size,
        },
    );
    writer.finish()?;
    Ok(())
}

fn shuffled_log() -> Vec<OplogRecord> {
    let orders = ns("shop", "orders");
    vec![
        OplogRecord::update(30, &orders, json!({"_id": 1}), json!({"$set": {"n": 3}})),
        OplogRecord::delete(25, &orders, json!({"_id": 2})),
        OplogRecord::update(10, &orders, json!({"_id": 1}), json!({"$set": {"n": 1}})),
        OplogRecord::insert(15, &orders, json!({"_id": 2, "n": 0})),
        OplogRecord::update(20, &orders, json!({"_id": 1, "n": 1}), json!({"$inc": {"n": 1}})),
        OplogRecord::insert(12, &ns("crm", "people"), json!({"_id": "x"})),
    ]
}

#[test]
fn test_objcheck_rejects_corrupt_record_before_target() -> Result<()> {
    let dir = TempDir::new()?;
    let archive = dump_seeded(dir.path(), 10)?;
    corrupt_first_order(&archive)?;
    let target = dir.path().join("target");

    let err = restore(RestoreOptions::new(&archive).with_objcheck(true), &target).unwrap_err();
    assert!(matches!(err, CairnError::ValidationFailed(_)));
    assert_eq!(err.exit_code(), 5);
    assert!(err.to_string().contains("shop.orders record 0"));
    // Zero documents committed: the target was never opened
    assert!(!target.exists());
    Ok(())
}

#[test]
fn test_lenient_restore_skips_exactly_one() -> Result<()> {
    let dir = TempDir::new()?;
    let archive = dump_seeded(dir.path(), 10)?;
    corrupt_first_order(&archive)?;
    let target = dir.path().join("target");

    let summary = restore(RestoreOptions::new(&archive), &target)?;
    assert_eq!(summary.skipped(), 1);
    assert_eq!(summary.inserted(), 10 - 1 + 5 + 3);
    assert!(summary.is_partial());
    let orders = summary.collection(&ns("shop", "orders")).expect("orders stats");
    assert_eq!((orders.inserted, orders.skipped), (9, 1));

    let store = DataDirStore::open(DataDirConfig::new(&target))?;
    let restored = read_all(&mut store.open_session(), &ns("shop", "orders"))?;
    assert_eq!(restored.len(), 9);
    assert!(restored.iter().all(|d| d.id() != &json!(0)));
    Ok(())
}

#[test]
fn test_objcheck_passes_clean_archive() -> Result<()> {
    let dir = TempDir::new()?;
    let archive = dump_seeded(dir.path(), 6)?;
    let summary = restore(
        RestoreOptions::new(&archive).with_objcheck(true),
        &dir.path().join("target"),
    )?;
    assert_eq!(summary.inserted(), 6 + 5 + 3);
    assert!(!summary.is_partial());
    Ok(())
}

#[test]
fn test_replay_applies_in_timestamp_order() -> Result<()> {
    let dir = TempDir::new()?;
    let archive = dir.path().join("dump");
    archive_with_log(&archive, &shuffled_log())?;
    let target = dir.path().join("target");

    let summary = restore(
        RestoreOptions::new(&archive)
            .with_namespaces(NamespaceFilter::new(Some("shop".into()), None)?)
            .with_oplog_replay(true),
        &target,
    )?;
    let oplog = summary.oplog.expect("replay stats");
    assert_eq!(oplog.applied, 5);
    assert_eq!(oplog.skipped, 0);
    assert_eq!(oplog.excluded, 1);
    assert_eq!(summary.phase, RestorePhase::Done);

    let store = DataDirStore::open(DataDirConfig::new(&target))?;
    let docs = read_all(&mut store.open_session(), &ns("shop", "orders"))?;
    assert_eq!(docs, vec![doc(json!({"_id": 1, "n": 3}))]);
    Ok(())
}

#[test]
fn test_replay_stops_at_limit() -> Result<()> {
    let dir = TempDir::new()?;
    let archive = dir.path().join("dump");
    archive_with_log(&archive, &shuffled_log())?;
    let target = dir.path().join("target");

    let summary = restore(
        RestoreOptions::new(&archive)
            .with_oplog_replay(true)
            .with_oplog_limit(Some(25)),
        &target,
    )?;
    let oplog = summary.oplog.expect("replay stats");
    // ts 10, 12, 15, 20 apply; 25 and 30 are at or past the limit
    assert_eq!(oplog.applied, 4);
    assert_eq!(oplog.excluded, 2);

    let store = DataDirStore::open(DataDirConfig::new(&target))?;
    let mut session = store.open_session();
    let docs = read_all(&mut session, &ns("shop", "orders"))?;
    assert_eq!(
        docs,
        vec![doc(json!({"_id": 1, "n": 2})), doc(json!({"_id": 2, "n": 0}))]
    );
    assert_eq!(read_all(&mut session, &ns("crm", "people"))?.len(), 1);
    Ok(())
}

#[test]
fn test_replay_skips_stale_preconditions() -> Result<()> {
    let dir = TempDir::new()?;
    let archive = dir.path().join("dump");
    let orders = ns("shop", "orders");
    archive_with_log(
        &archive,
        &[
            OplogRecord::update(1, &orders, json!({"_id": 99}), json!({"$set": {"n": 1}})),
            OplogRecord::delete(2, &orders, json!({"_id": 1, "n": 7})),
            OplogRecord::update(3, &orders, json!({"_id": 1, "n": 0}), json!({"$set": {"n": 5}})),
        ],
    )?;
    let target = dir.path().join("target");

    let summary = restore(RestoreOptions::new(&archive).with_oplog_replay(true), &target)?;
    let oplog = summary.oplog.expect("replay stats");
    assert_eq!((oplog.applied, oplog.skipped), (1, 2));
    assert!(summary.is_partial());

    let store = DataDirStore::open(DataDirConfig::new(&target))?;
    let docs = read_all(&mut store.open_session(), &orders)?;
    assert_eq!(docs, vec![doc(json!({"_id": 1, "n": 5}))]);
    Ok(())
}

#[test]
fn test_replay_requires_captured_log() -> Result<()> {
    let dir = TempDir::new()?;
    let archive = dump_seeded(dir.path(), 2)?;
    let target = dir.path().join("target");

    let err = restore(RestoreOptions::new(&archive).with_oplog_replay(true), &target).unwrap_err();
    assert!(matches!(err, CairnError::Config(_)));
    assert!(!target.exists());

    let err =
        restore(RestoreOptions::new(&archive).with_oplog_limit(Some(5)), &target).unwrap_err();
    assert!(matches!(err, CairnError::Config(_)));
    Ok(())
}

#[test]
fn test_unreachable_target_is_reported() -> Result<()> {
    let dir = TempDir::new()?;
    let archive = dump_seeded(dir.path(), 2)?;

    let config = StoreConfig::Remote(common::loopback(common::closed_port()));
    let err = RestoreReader::new(RestoreOptions::new(&archive))
        .run(|| open_target(&config))
        .unwrap_err();
    assert!(matches!(err, CairnError::TargetUnavailable(_)));
    assert_eq!(err.exit_code(), 4);
    assert!(err.to_string().contains("after 3 attempts"));
    Ok(())
}
