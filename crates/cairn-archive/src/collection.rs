use crate::frame::{self, Frame, FrameReader, DOCS_MAGIC, HEADER_LEN};
use cairn_core::error::{CairnError, Result};
use cairn_core::types::Document;
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

const WRITE_BUFFER_SIZE: usize = 256 * 1024;
const READ_BUFFER_SIZE: usize = 128 * 1024;

/// One entry read back from a collection file.
#[derive(Debug, Clone, PartialEq)]
pub enum Record {
    Document(Document),
    /// A record that could not be decoded into a document.
    Malformed { index: u64, reason: String },
}

/// Summary of a finished collection file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CollectionFileSummary {
    pub documents: u64,
    pub size_bytes: u64,
}

/// Streaming writer for one collection file.
pub struct CollectionFileWriter {
    path: PathBuf,
    writer: BufWriter<File>,
    documents: u64,
    bytes: u64,
}

impl CollectionFileWriter {
    pub fn create(path: &Path) -> Result<Self> {
        let file = File::create(path)?;
        let mut writer = BufWriter::with_capacity(WRITE_BUFFER_SIZE, file);
        frame::write_header(&mut writer, &DOCS_MAGIC)?;
        Ok(Self {
            path: path.to_path_buf(),
            writer,
            documents: 0,
            bytes: HEADER_LEN,
        })
    }

    pub fn append(&mut self, doc: &Document) -> Result<()> {
        let payload = doc.to_vec()?;
        self.bytes += frame::write_record(&mut self.writer, &payload)?;
        self.documents += 1;
        Ok(())
    }

    pub fn documents(&self) -> u64 {
        self.documents
    }

    /// Flush and fsync the file.
    pub fn finish(mut self) -> Result<CollectionFileSummary> {
        self.writer.flush()?;
        self.writer.get_ref().sync_all()?;
        tracing::debug!(
            "Sealed {} ({} documents, {} bytes)",
            self.path.display(),
            self.documents,
            self.bytes
        );
        Ok(CollectionFileSummary {
            documents: self.documents,
            size_bytes: self.bytes,
        })
    }
}

/// Sequential reader over one collection file.
///
/// Yields [`Record::Malformed`] for records that fail their checksum or do
/// not decode to a document, and keeps going. A truncated record is
/// reported once and ends the iteration.
pub struct CollectionFileReader {
    frames: FrameReader<BufReader<File>>,
    index: u64,
}

impl CollectionFileReader {
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path).map_err(|e| {
            CairnError::ArchiveCorrupt(format!("cannot open {}: {}", path.display(), e))
        })?;
        let mut reader = BufReader::with_capacity(READ_BUFFER_SIZE, file);
        frame::read_header(&mut reader, &DOCS_MAGIC, &path.display().to_string())?;
        Ok(Self {
            frames: FrameReader::new(reader, HEADER_LEN),
            index: 0,
        })
    }

    fn read_next(&mut self) -> Result<Option<Record>> {
        let Some(frame) = self.frames.next_frame()? else {
            return Ok(None);
        };
        let index = self.index;
        self.index += 1;

        let record = match frame {
            Frame::Intact(payload) => match Document::from_slice(&payload) {
                Ok(doc) => Record::Document(doc),
                Err(e) => Record::Malformed {
                    index,
                    reason: e.to_string(),
                },
            },
            Frame::ChecksumMismatch { len } => Record::Malformed {
                index,
                reason: format!("checksum mismatch on {} byte record", len),
            },
            Frame::Truncated(reason) => Record::Malformed { index, reason },
        };
        Ok(Some(record))
    }
}

impl Iterator for CollectionFileReader {
    type Item = Result<Record>;

    fn next(&mut self) -> Option<Self::Item> {
        self.read_next().transpose()
    }
}
