//! Flags shared by the commands and their translation into options

use anyhow::{Context, Result};
use cairn::prelude::*;
use cairn::LogicalTs;
use cairn_core::config::DEFAULT_WORKERS;
use clap::Args;
use std::io::{self, BufRead, Write};
use std::path::PathBuf;

/// Where to read from or write to: a live server or a data directory.
#[derive(Args, Debug)]
pub struct StoreArgs {
    /// Server to connect to, as host, host:port, [v6] or [v6]:port
    #[arg(long)]
    pub host: Option<String>,

    /// Server port, instead of embedding it in --host
    #[arg(long)]
    pub port: Option<u16>,

    /// Allow IPv6 addresses
    #[arg(long)]
    pub ipv6: bool,

    /// User to authenticate as
    #[arg(short, long)]
    pub username: Option<String>,

    /// Password; prompted for when --username is given without it
    #[arg(short, long)]
    pub password: Option<String>,

    /// Work on a data directory directly instead of a server
    #[arg(long, conflicts_with_all = ["host", "port"])]
    pub dbpath: Option<PathBuf>,

    /// Each database lives in its own sub-directory
    #[arg(long, requires = "dbpath")]
    pub directoryperdb: bool,
}

impl StoreArgs {
    pub fn store_config(&self, journal: bool) -> Result<StoreConfig> {
        if let Some(path) = &self.dbpath {
            if self.username.is_some() {
                tracing::warn!("--username is ignored with --dbpath");
            }
            return Ok(StoreConfig::DataDir(
                DataDirConfig::new(path)
                    .with_directory_per_db(self.directoryperdb)
                    .with_journal(journal),
            ));
        }

        let endpoint = Endpoint::parse(self.host.as_deref(), self.port)?;
        let credentials = match (&self.username, &self.password) {
            (Some(user), Some(password)) => Some(Credentials::new(user, password)),
            (Some(user), None) => Some(Credentials::new(user, prompt_password(user)?)),
            (None, Some(_)) => {
                return Err(CairnError::Config("--password requires --username".into()).into())
            }
            (None, None) => None,
        };
        Ok(StoreConfig::Remote(
            ConnectionConfig::new(endpoint)
                .with_credentials(credentials)
                .with_ipv6(self.ipv6),
        ))
    }
}

/// Restrict a run to one database, or one collection of it.
#[derive(Args, Debug)]
pub struct NamespaceArgs {
    /// Database to process
    #[arg(short, long)]
    pub db: Option<String>,

    /// Collection to process
    #[arg(short, long, requires = "db")]
    pub collection: Option<String>,
}

impl NamespaceArgs {
    pub fn filter(&self) -> Result<NamespaceFilter> {
        Ok(NamespaceFilter::new(self.db.clone(), self.collection.clone())?)
    }
}

#[derive(Args, Debug)]
pub struct DumpArgs {
    #[command(flatten)]
    pub store: StoreArgs,

    #[command(flatten)]
    pub namespaces: NamespaceArgs,

    /// Archive directory to create
    #[arg(short, long, default_value = "dump")]
    pub out: PathBuf,

    /// Capture writes made while the dump runs
    #[arg(long)]
    pub oplog: bool,

    /// Collections dumped in parallel
    #[arg(
        short = 'j',
        long = "numParallelCollections",
        default_value_t = DEFAULT_WORKERS,
        value_parser = parse_workers
    )]
    pub workers: usize,
}

impl DumpArgs {
    pub fn options(&self) -> Result<DumpOptions> {
        Ok(DumpOptions::new(&self.out)
            .with_namespaces(self.namespaces.filter()?)
            .with_oplog(self.oplog)
            .with_workers(self.workers))
    }
}

#[derive(Args, Debug)]
pub struct RestoreArgs {
    #[command(flatten)]
    pub store: StoreArgs,

    #[command(flatten)]
    pub namespaces: NamespaceArgs,

    /// Durable write-ahead journal for the data directory
    #[arg(long, requires = "dbpath")]
    pub journal: bool,

    /// Validate every archived record before writing anything
    #[arg(long)]
    pub objcheck: bool,

    /// Only restore documents matching this predicate
    #[arg(long)]
    pub filter: Option<String>,

    /// Drop each collection before restoring it
    #[arg(long)]
    pub drop: bool,

    /// Replay the captured operation log after loading
    #[arg(long = "oplogReplay")]
    pub oplog_replay: bool,

    /// Only replay log records with a timestamp below this one
    #[arg(long = "oplogLimit", value_name = "TS")]
    pub oplog_limit: Option<LogicalTs>,

    /// Keep archived index versions instead of upgrading them
    #[arg(long = "keepIndexVersion")]
    pub keep_index_version: bool,

    /// Abort on the first document the target rejects
    #[arg(long = "stopOnError")]
    pub stop_on_error: bool,

    /// Collections restored in parallel
    #[arg(
        short = 'j',
        long = "numParallelCollections",
        default_value_t = DEFAULT_WORKERS,
        value_parser = parse_workers
    )]
    pub workers: usize,

    /// Archive directory to restore from
    #[arg(default_value = "dump")]
    pub path: PathBuf,
}

impl RestoreArgs {
    pub fn store_config(&self) -> Result<StoreConfig> {
        self.store.store_config(self.journal)
    }

    pub fn options(&self) -> Result<RestoreOptions> {
        let mut options = RestoreOptions::new(&self.path)
            .with_namespaces(self.namespaces.filter()?)
            .with_drop(self.drop)
            .with_oplog_replay(self.oplog_replay)
            .with_oplog_limit(self.oplog_limit)
            .with_objcheck(self.objcheck)
            .with_keep_index_version(self.keep_index_version)
            .with_stop_on_error(self.stop_on_error)
            .with_workers(self.workers);
        if let Some(filter) = &self.filter {
            options = options.with_filter(filter);
        }
        Ok(options)
    }
}

#[derive(Args, Debug)]
pub struct InspectArgs {
    /// Archive directory to inspect
    #[arg(default_value = "dump")]
    pub path: PathBuf,

    /// Print the manifest as JSON
    #[arg(long)]
    pub json: bool,
}

fn parse_workers(text: &str) -> std::result::Result<usize, String> {
    match text.parse::<usize>() {
        Ok(0) => Err("must be at least 1".into()),
        Ok(n) => Ok(n),
        Err(e) => Err(e.to_string()),
    }
}

fn prompt_password(username: &str) -> Result<String> {
    eprint!("Enter password for {}: ", username);
    io::stderr().flush()?;

    let mut line = String::new();
    let read = io::stdin()
        .lock()
        .read_line(&mut line)
        .context("Failed to read password")?;
    if read == 0 {
        return Err(CairnError::Config(format!("No password given for {}", username)).into());
    }
    Ok(line.trim_end_matches(['\r', '\n']).to_string())
}
