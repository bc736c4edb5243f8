//! Cairn CLI - dump, restore and inspect document database archives

use anyhow::Result;
use cairn::prelude::*;
use clap::{ArgAction, Parser, Subcommand};
use std::process::ExitCode;

mod commands;

use commands::args::{DumpArgs, InspectArgs, RestoreArgs};

#[derive(Parser)]
#[command(name = "cairn")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Increase log detail (-v debug, -vv trace)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write an archive of a server or data directory
    Dump(DumpArgs),

    /// Load an archive into a server or data directory
    Restore(RestoreArgs),

    /// Show an archive's manifest and completeness
    Inspect(InspectArgs),
}

fn init_tracing(verbose: u8) {
    let level = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level)),
        )
        .init();
}

/// Exit code for a failed command: the first [`CairnError`] in the chain
/// decides, anything else is internal.
fn exit_code(err: &anyhow::Error) -> u8 {
    err.chain()
        .find_map(|cause| cause.downcast_ref::<CairnError>())
        .map_or(1, CairnError::exit_code)
}

fn execute(command: Commands, cancel: CancelToken) -> Result<()> {
    match command {
        Commands::Dump(args) => commands::dump::execute(args, cancel),
        Commands::Restore(args) => commands::restore::execute(args, cancel),
        Commands::Inspect(args) => commands::inspect::execute(args),
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let cancel = CancelToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupt received, stopping at the next batch boundary");
            on_interrupt.cancel();
        }
    });

    // The dump and restore engines block; keep them off the async workers
    let outcome = tokio::task::spawn_blocking(move || execute(cli.command, cancel)).await;

    match outcome {
        Ok(Ok(())) => ExitCode::SUCCESS,
        Ok(Err(err)) => {
            eprintln!("Error: {:#}", err);
            ExitCode::from(exit_code(&err))
        }
        Err(join) => {
            eprintln!("Error: command panicked: {}", join);
            ExitCode::from(1)
        }
    }
}
