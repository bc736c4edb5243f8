use crate::frame::{self, Frame, FrameReader, HEADER_LEN, OPLOG_MAGIC};
use cairn_core::error::{CairnError, Result};
use cairn_core::types::{LogicalTs, OplogRecord};
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

/// One entry read back from an operation log segment.
#[derive(Debug, Clone, PartialEq)]
pub enum LogEntry {
    Record(OplogRecord),
    Malformed { index: u64, reason: String },
}

/// Summary of a sealed segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentSummary {
    pub records: u64,
    pub first_ts: Option<LogicalTs>,
    pub last_ts: Option<LogicalTs>,
    pub size_bytes: u64,
}

/// Append-only writer for an operation log segment.
///
/// Timestamps must be strictly increasing.
pub struct OplogSegmentWriter {
    path: PathBuf,
    writer: BufWriter<File>,
    summary: SegmentSummary,
}

impl OplogSegmentWriter {
    pub fn create(path: &Path) -> Result<Self> {
        let file = File::create(path)?;
        let mut writer = BufWriter::new(file);
        frame::write_header(&mut writer, &OPLOG_MAGIC)?;
        Ok(Self {
            path: path.to_path_buf(),
            writer,
            summary: SegmentSummary {
                records: 0,
                first_ts: None,
                last_ts: None,
                size_bytes: HEADER_LEN,
            },
        })
    }

    pub fn append(&mut self, record: &OplogRecord) -> Result<()> {
        if let Some(last) = self.summary.last_ts {
            if record.ts <= last {
                return Err(CairnError::InvalidState(format!(
                    "oplog timestamp {} does not follow {}",
                    record.ts, last
                )));
            }
        }
        let payload = serde_json::to_vec(record)?;
        self.summary.size_bytes += frame::write_record(&mut self.writer, &payload)?;
        self.summary.records += 1;
        self.summary.first_ts.get_or_insert(record.ts);
        self.summary.last_ts = Some(record.ts);
        Ok(())
    }

    /// Flush and fsync the segment.
    pub fn finish(mut self) -> Result<SegmentSummary> {
        self.writer.flush()?;
        self.writer.get_ref().sync_all()?;
        tracing::debug!(
            "Sealed {} ({} records)",
            self.path.display(),
            self.summary.records
        );
        Ok(self.summary)
    }
}

/// Sequential reader over an operation log segment.
pub struct OplogSegmentReader {
    frames: FrameReader<BufReader<File>>,
    index: u64,
}

impl OplogSegmentReader {
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path).map_err(|e| {
            CairnError::ArchiveCorrupt(format!("cannot open {}: {}", path.display(), e))
        })?;
        let mut reader = BufReader::new(file);
        frame::read_header(&mut reader, &OPLOG_MAGIC, &path.display().to_string())?;
        Ok(Self {
            frames: FrameReader::new(reader, HEADER_LEN),
            index: 0,
        })
    }

    fn read_next(&mut self) -> Result<Option<LogEntry>> {
        let Some(frame) = self.frames.next_frame()? else {
            return Ok(None);
        };
        let index = self.index;
        self.index += 1;

        let entry = match frame {
            Frame::Intact(payload) => match serde_json::from_slice::<OplogRecord>(&payload) {
                Ok(record) => LogEntry::Record(record),
                Err(e) => LogEntry::Malformed {
                    index,
                    reason: format!("invalid oplog record: {}", e),
                },
            },
            Frame::ChecksumMismatch { len } => LogEntry::Malformed {
                index,
                reason: format!("checksum mismatch on {} byte record", len),
            },
            Frame::Truncated(reason) => LogEntry::Malformed { index, reason },
        };
        Ok(Some(entry))
    }
}

impl Iterator for OplogSegmentReader {
    type Item = Result<LogEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        self.read_next().transpose()
    }
}
