//! Inspect command implementation

use super::args::InspectArgs;
use anyhow::Result;
use cairn::prelude::*;

pub fn execute(args: InspectArgs) -> Result<()> {
    let status = ArchiveReader::probe(&args.path);

    if args.json {
        let manifest = status.manifest.as_ref().map(serde_json::to_value).transpose()?;
        let report = serde_json::json!({
            "path": status.root,
            "complete": status.complete,
            "completedAt": status.completed_at,
            "problem": status.problem,
            "totalBytes": status.total_bytes,
            "manifest": manifest,
        });
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_status(&status);
    }

    match status.problem {
        Some(problem) if !status.complete => Err(CairnError::ArchiveCorrupt(problem).into()),
        _ => Ok(()),
    }
}

fn print_status(status: &cairn::ArchiveStatus) {
    println!("\nArchive Status");
    println!("{}", "=".repeat(60));
    println!("Path: {}", status.root.display());
    println!("Size: {} bytes", status.total_bytes);

    let Some(manifest) = &status.manifest else {
        println!("\nNo readable manifest");
        print_completeness(status);
        return;
    };

    println!("Archive ID: {}", manifest.archive_id);
    println!("Format Version: {}", manifest.format_version);
    println!("Written By: cairn {}", manifest.tool_version);
    println!("Created: {}", manifest.created_at);
    println!(
        "Source: {} ({:?})",
        manifest.source.location, manifest.source.kind
    );

    println!("\n{:<40} {:>10} {:>12}", "Collection", "Documents", "Bytes");
    for entry in &manifest.collections {
        println!(
            "{:<40} {:>10} {:>12}",
            format!("{}.{}", entry.db, entry.name),
            entry.document_count,
            entry.size_bytes
        );
    }
    let documents: u64 = manifest.collections.iter().map(|c| c.document_count).sum();
    println!(
        "\nTotal: {} document(s) in {} collection(s)",
        documents,
        manifest.collections.len()
    );

    match &manifest.oplog {
        Some(oplog) => println!(
            "Oplog: {} record(s), ts {} to {}",
            oplog.record_count,
            oplog.start_ts.map_or_else(|| "-".into(), |t| t.to_string()),
            oplog.end_ts.map_or_else(|| "-".into(), |t| t.to_string())
        ),
        None => println!("Oplog: not captured"),
    }

    print_completeness(status);
}

fn print_completeness(status: &cairn::ArchiveStatus) {
    match (&status.completed_at, &status.problem) {
        (Some(at), _) if status.complete => println!("\n✓ Complete (sealed {})", at),
        (_, Some(problem)) => println!("\n⚠️  Not restorable: {}", problem),
        _ => println!("\n⚠️  Not restorable"),
    }
}
