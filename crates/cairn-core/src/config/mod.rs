pub mod connection;
pub mod datadir;
pub mod options;

pub use connection::{
    BackoffStrategy, ConnectionConfig, Credentials, Endpoint, RetryConfig, DEFAULT_HOST,
    DEFAULT_PORT,
};
pub use datadir::DataDirConfig;
pub use options::{DumpOptions, RestoreOptions, StoreConfig, DEFAULT_BATCH_SIZE, DEFAULT_WORKERS};
