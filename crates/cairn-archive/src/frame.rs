//! Record framing shared by collection files and operation log segments.
//!
//! File layout: `[magic: 8][version: u32 BE]` followed by records of the form
//! `[len: u32 BE][xxh3_64(payload): u64 BE][payload: len bytes]`.

use cairn_core::error::{CairnError, Result};
use std::io::{self, Read, Write};
use xxhash_rust::xxh3::xxh3_64;

/// Magic for collection files.
pub const DOCS_MAGIC: [u8; 8] = *b"CAIRNDOC";

/// Magic for operation log segments.
pub const OPLOG_MAGIC: [u8; 8] = *b"CAIRNLOG";

/// Framing version written by this release.
pub const FRAME_VERSION: u32 = 1;

/// File header size in bytes.
pub const HEADER_LEN: u64 = 12;

/// Per-record overhead: length prefix plus checksum.
pub const RECORD_OVERHEAD: u64 = 12;

/// Largest payload a single record may carry (16 MiB).
pub const MAX_RECORD_SIZE: usize = 16 * 1024 * 1024;

pub fn write_header<W: Write>(w: &mut W, magic: &[u8; 8]) -> Result<()> {
    w.write_all(magic)?;
    w.write_all(&FRAME_VERSION.to_be_bytes())?;
    Ok(())
}

/// Read and check a file header. `what` names the file in errors.
pub fn read_header<R: Read>(r: &mut R, magic: &[u8; 8], what: &str) -> Result<()> {
    let mut header = [0u8; HEADER_LEN as usize];
    let n = read_full(r, &mut header)?;
    if n < header.len() {
        return Err(CairnError::ArchiveCorrupt(format!(
            "{}: missing file header",
            what
        )));
    }
    if header[..8] != magic[..] {
        return Err(CairnError::ArchiveCorrupt(format!("{}: bad magic", what)));
    }
    let version = u32::from_be_bytes([header[8], header[9], header[10], header[11]]);
    if version != FRAME_VERSION {
        return Err(CairnError::ArchiveCorrupt(format!(
            "{}: unsupported framing version {}",
            what, version
        )));
    }
    Ok(())
}

/// Write one framed record, returning the bytes written.
pub fn write_record<W: Write>(w: &mut W, payload: &[u8]) -> Result<u64> {
    if payload.len() > MAX_RECORD_SIZE {
        return Err(CairnError::ValidationFailed(format!(
            "record size {} exceeds the {} byte limit",
            payload.len(),
            MAX_RECORD_SIZE
        )));
    }
    let len = payload.len() as u32;
    w.write_all(&len.to_be_bytes())?;
    w.write_all(&xxh3_64(payload).to_be_bytes())?;
    w.write_all(payload)?;
    Ok(RECORD_OVERHEAD + payload.len() as u64)
}

/// Outcome of reading one frame.
#[derive(Debug, PartialEq, Eq)]
pub enum Frame {
    /// Framing and checksum intact.
    Intact(Vec<u8>),
    /// Framing intact but the payload does not match its checksum.
    ChecksumMismatch { len: usize },
    /// EOF inside a frame or an impossible length. Nothing after this
    /// point can be trusted.
    Truncated(String),
}

/// Sequential frame reader over a file body (after the header).
pub struct FrameReader<R> {
    inner: R,
    offset: u64,
    done: bool,
}

impl<R: Read> FrameReader<R> {
    /// `offset` is the byte position of `inner` within its file, for
    /// error messages.
    pub fn new(inner: R, offset: u64) -> Self {
        Self {
            inner,
            offset,
            done: false,
        }
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Next frame, or `None` at a clean end of file or after truncation.
    pub fn next_frame(&mut self) -> Result<Option<Frame>> {
        if self.done {
            return Ok(None);
        }

        let start = self.offset;
        let mut prefix = [0u8; RECORD_OVERHEAD as usize];
        let n = read_full(&mut self.inner, &mut prefix)?;
        if n == 0 {
            self.done = true;
            return Ok(None);
        }
        if n < prefix.len() {
            self.done = true;
            return Ok(Some(Frame::Truncated(format!(
                "record header cut short at offset {}",
                start
            ))));
        }

        let len = u32::from_be_bytes([prefix[0], prefix[1], prefix[2], prefix[3]]) as usize;
        let mut sum = [0u8; 8];
        sum.copy_from_slice(&prefix[4..12]);
        let checksum = u64::from_be_bytes(sum);

        if len > MAX_RECORD_SIZE {
            self.done = true;
            return Ok(Some(Frame::Truncated(format!(
                "record length {} at offset {} exceeds the limit",
                len, start
            ))));
        }

        let mut payload = vec![0u8; len];
        let got = read_full(&mut self.inner, &mut payload)?;
        if got < len {
            self.done = true;
            return Ok(Some(Frame::Truncated(format!(
                "record at offset {} has {} of {} payload bytes",
                start, got, len
            ))));
        }
        self.offset += RECORD_OVERHEAD + len as u64;

        if xxh3_64(&payload) != checksum {
            return Ok(Some(Frame::ChecksumMismatch { len }));
        }
        Ok(Some(Frame::Intact(payload)))
    }
}

/// Fill `buf` as far as the reader allows, returning the bytes read.
fn read_full<R: Read>(r: &mut R, buf: &mut [u8]) -> Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match r.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }
    Ok(filled)
}
