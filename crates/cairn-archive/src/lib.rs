//! On-disk archive format
//!
//! An archive is a directory:
//!
//! ```text
//! manifest.json                    archive descriptor
//! <db>/<collection>.docs           framed documents, in storage order
//! <db>/<collection>.metadata.json  options and index definitions
//! oplog.log                        framed operation log segment (optional)
//! COMPLETE                         written last; carries the manifest digest
//! ```
//!
//! Archives are written once and never modified. An archive without a
//! valid `COMPLETE` marker is rejected by [`ArchiveReader::open`].

mod collection;
pub mod frame;
mod oplog;
mod reader;
mod writer;

pub use collection::{CollectionFileReader, CollectionFileSummary, CollectionFileWriter, Record};
pub use oplog::{LogEntry, OplogSegmentReader, OplogSegmentWriter, SegmentSummary};
pub use reader::{ArchiveReader, ArchiveStatus};
pub use writer::ArchiveWriter;

pub const MANIFEST_FILE: &str = "manifest.json";
pub const COMPLETE_FILE: &str = "COMPLETE";
pub const OPLOG_FILE: &str = "oplog.log";
