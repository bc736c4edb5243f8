//! Restore command implementation

use super::args::RestoreArgs;
use anyhow::Result;
use cairn::prelude::*;

pub fn execute(args: RestoreArgs, cancel: CancelToken) -> Result<()> {
    let options = args.options()?;
    let config = args.store_config()?;
    tracing::info!("Restoring {} to {}", options.archive.display(), config.location());

    // The target is only opened once the archive has been validated
    let summary = RestoreReader::new(options)
        .with_cancel(cancel)
        .run(|| open_target(&config))?;

    println!("\nRestore Complete");
    println!("{}", "=".repeat(60));
    println!(
        "{:<40} {:>9} {:>8} {:>9} {:>7}",
        "Collection", "Inserted", "Skipped", "Filtered", "Failed"
    );
    for c in &summary.collections {
        println!(
            "{:<40} {:>9} {:>8} {:>9} {:>7}",
            c.namespace.to_string(),
            c.inserted,
            c.skipped,
            c.filtered,
            c.failed
        );
    }
    if let Some(oplog) = &summary.oplog {
        println!(
            "\nOplog: {} applied, {} skipped, {} outside the selection or limit",
            oplog.applied, oplog.skipped, oplog.excluded
        );
    }

    if summary.is_partial() {
        println!("\n⚠️  {}", summary);
        println!("Some records were not restored; see the warnings above");
    } else {
        println!("\n✓ {}", summary);
    }
    Ok(())
}
