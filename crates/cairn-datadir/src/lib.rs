//! Direct-path data directory store
//!
//! A data directory holds one SQLite database file per logical database,
//! an exclusive lock file and a layout descriptor:
//!
//! ```text
//! <root>/cairn.lock        exclusive advisory lock, held while open
//! <root>/storage.json      layout descriptor
//! <root>/<db>.sqlite       flat layout
//! <root>/<db>/data.sqlite  per-database directories (--directoryperdb)
//! ```
//!
//! Each database keeps a small catalog of collections and index
//! definitions next to one table per collection. Documents are stored as
//! JSON text in insertion order.

mod layout;
mod session;
mod sql;
mod store;

pub use layout::{StorageLayout, LAYOUT_FILE, STORAGE_FORMAT_VERSION};
pub use session::DataDirSession;
pub use store::DataDirStore;
