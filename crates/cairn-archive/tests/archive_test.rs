//! Archive completeness and validation tests.

use cairn_archive::{ArchiveReader, ArchiveWriter, Record, COMPLETE_FILE, MANIFEST_FILE};
use cairn_core::types::{
    CollectionMetadata, Document, IndexKey, IndexSpec, Namespace, NamespaceFilter, OplogRecord,
    SourceDescriptor, SourceKind,
};
use cairn_core::{CairnError, Result};
use serde_json::json;
use std::path::Path;
use tempfile::TempDir;

fn source() -> SourceDescriptor {
    SourceDescriptor {
        kind: SourceKind::Dbpath,
        location: "/data/db".into(),
    }
}

fn write_archive(root: &Path, with_oplog: bool) -> Result<()> {
    let writer = ArchiveWriter::create(root, source())?;
    for (db, coll, n) in [("shop", "orders", 3), ("shop", "items", 2), ("crm", "people", 1)] {
        let ns = Namespace::new(db, coll)?;
        let mut file = writer.collection_writer(&ns)?;
        for i in 0..n {
            file.append(&Document::from_value(json!({"_id": i, "coll": coll}))?)?;
        }
        let summary = file.finish()?;
        writer.write_metadata(
            &CollectionMetadata::new(db, coll)
                .with_index(IndexSpec::new("coll_1", vec![IndexKey::ascending("coll")])),
        )?;
        writer.add_collection(&ns, summary);
    }
    if with_oplog {
        let ns = Namespace::new("shop", "orders")?;
        let mut log = writer.oplog_writer()?;
        log.append(&OplogRecord::insert(11, &ns, json!({"_id": 99})))?;
        let summary = log.finish()?;
        writer.set_oplog(Some(10), summary);
    }
    writer.finish()?;
    Ok(())
}

#[test]
fn test_complete_archive_opens() -> Result<()> {
    let dir = TempDir::new()?;
    write_archive(dir.path(), true)?;

    let reader = ArchiveReader::open(dir.path())?;
    let manifest = reader.manifest();
    assert_eq!(manifest.total_documents(), 6);
    assert_eq!(manifest.databases(), vec!["crm", "shop"]);
    let oplog = manifest.oplog.as_ref().expect("oplog info");
    assert_eq!((oplog.start_ts, oplog.end_ts, oplog.record_count), (Some(10), Some(11), 1));
    assert!(reader.total_bytes()? > 0);

    let filter = NamespaceFilter::new(Some("shop".into()), Some("orders".into()))?;
    let selected: Vec<_> = reader.collections(&filter).collect();
    assert_eq!(selected.len(), 1);
    let docs = reader
        .open_collection(selected[0])?
        .filter(|r| matches!(r, Ok(Record::Document(_))))
        .count();
    assert_eq!(docs, 3);

    let meta = reader.read_metadata(selected[0])?;
    assert_eq!(meta.indexes[0].name, "coll_1");
    assert_eq!(reader.open_oplog()?.map(|r| r.count()), Some(1));
    Ok(())
}

#[test]
fn test_missing_marker_is_rejected() -> Result<()> {
    let dir = TempDir::new()?;
    write_archive(dir.path(), false)?;
    std::fs::remove_file(dir.path().join(COMPLETE_FILE))?;

    let err = ArchiveReader::open(dir.path()).unwrap_err();
    assert!(matches!(err, CairnError::ArchiveCorrupt(_)));
    assert_eq!(err.exit_code(), 3);
    Ok(())
}

#[test]
fn test_tampered_manifest_is_rejected() -> Result<()> {
    let dir = TempDir::new()?;
    write_archive(dir.path(), false)?;
    let path = dir.path().join(MANIFEST_FILE);
    let mut text = std::fs::read_to_string(&path)?;
    text.push('\n');
    std::fs::write(&path, text)?;

    assert!(matches!(
        ArchiveReader::open(dir.path()),
        Err(CairnError::ArchiveCorrupt(_))
    ));
    Ok(())
}

#[test]
fn test_missing_collection_file_is_rejected() -> Result<()> {
    let dir = TempDir::new()?;
    write_archive(dir.path(), false)?;
    std::fs::remove_file(dir.path().join("crm").join("people.docs"))?;

    let err = ArchiveReader::open(dir.path()).unwrap_err();
    assert!(err.to_string().contains("crm/people.docs"));
    Ok(())
}

#[test]
fn test_nonexistent_directory_is_rejected() {
    let dir = TempDir::new().unwrap();
    assert!(matches!(
        ArchiveReader::open(dir.path().join("nope")),
        Err(CairnError::ArchiveCorrupt(_))
    ));
}

#[test]
fn test_rewrite_clears_stale_marker() -> Result<()> {
    let dir = TempDir::new()?;
    write_archive(dir.path(), false)?;
    assert!(dir.path().join(COMPLETE_FILE).exists());

    // A second dump into the same directory that never finishes
    let writer = ArchiveWriter::create(dir.path(), source())?;
    assert!(!dir.path().join(COMPLETE_FILE).exists());
    drop(writer);

    let status = ArchiveReader::probe(dir.path());
    assert!(!status.complete);
    assert!(status.problem.is_some());
    Ok(())
}

#[test]
fn test_probe_reports_complete_archive() -> Result<()> {
    let dir = TempDir::new()?;
    write_archive(dir.path(), false)?;
    let status = ArchiveReader::probe(dir.path());
    assert!(status.complete);
    assert!(status.completed_at.is_some());
    assert_eq!(status.manifest.map(|m| m.collections.len()), Some(3));
    Ok(())
}
