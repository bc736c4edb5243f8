//! Dump command implementation

use super::args::DumpArgs;
use anyhow::Result;
use cairn::prelude::*;
use cairn::LogicalTs;

pub fn execute(args: DumpArgs, cancel: CancelToken) -> Result<()> {
    let options = args.options()?;
    let config = args.store.store_config(false)?;
    tracing::info!("Dumping {} to {}", config.location(), options.out.display());

    let source = open_source(&config)?;
    let report = DumpWriter::new(source.as_ref(), source_kind(&config), options)
        .with_cancel(cancel)
        .run()?;

    println!("\nDump Complete");
    println!("{}", "=".repeat(60));
    println!("Archive: {}", report.archive.display());
    println!("Source:  {}", report.manifest.source.location);
    println!("\n{:<40} {:>10} {:>12}", "Collection", "Documents", "Bytes");
    for collection in &report.collections {
        println!(
            "{:<40} {:>10} {:>12}",
            collection.namespace.to_string(),
            collection.documents,
            collection.size_bytes
        );
    }
    if let Some(oplog) = &report.manifest.oplog {
        println!(
            "\nOplog: {} records (ts {} to {})",
            oplog.record_count,
            ts_or_dash(oplog.start_ts),
            ts_or_dash(oplog.end_ts)
        );
    }
    println!("\n✓ {}", report);
    Ok(())
}

fn ts_or_dash(ts: Option<LogicalTs>) -> String {
    ts.map_or_else(|| "-".to_string(), |t| t.to_string())
}
