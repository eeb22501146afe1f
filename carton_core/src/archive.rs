//! Binary archive slice format.
//!
//! Every slice starts with a 16-byte header followed by `record_count` records:
//!
//! ```text
//! 0x00  4   "CART" magic
//! 0x04  1   version (u8) = 1
//! 0x05  3   reserved (must be 0)
//! 0x08  8   record_count (u64 LE)
//! 0x10  ... records
//! ```
//!
//! Record:
//! ```text
//!       1   kind: 1=file segment, 2=directory
//!       4   path_len (u32 LE)
//!       n   path (UTF-8, '/'-separated, relative)
//!       8   offset of the segment within its file (u64 LE)
//!       8   data_len (u64 LE)
//!       m   data
//! ```

use crate::error::{Error, Result};
use std::fs::File;
use std::io::{self, BufReader, Read};
use std::path::{Component, Path, PathBuf};

/// Magic bytes at the start of every archive slice.
pub const MAGIC: &[u8; 4] = b"CART";

/// Current archive format version.
pub const VERSION: u8 = 1;

/// Size of the archive header in bytes.
pub const HEADER_SIZE: usize = 16;

/// Longest record path accepted, in bytes.
pub const MAX_PATH_LEN: usize = 4096;

/// Record kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordKind {
    /// A byte range of a regular file.
    File = 1,
    /// A directory (no data).
    Dir = 2,
}

impl RecordKind {
    /// Convert to byte representation.
    pub fn to_u8(self) -> u8 {
        self as u8
    }

    /// Parse from byte representation.
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(RecordKind::File),
            2 => Some(RecordKind::Dir),
            _ => None,
        }
    }
}

/// The 16-byte archive header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveHeader {
    pub version: u8,
    pub record_count: u64,
}

impl ArchiveHeader {
    /// Create a header for the current version.
    pub fn new(record_count: u64) -> Self {
        Self {
            version: VERSION,
            record_count,
        }
    }

    /// Encode the header to a 16-byte array.
    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        buf[0..4].copy_from_slice(MAGIC);
        buf[4] = self.version;
        buf[8..16].copy_from_slice(&self.record_count.to_le_bytes());
        buf
    }

    /// Decode a header. `path` is only used for error reporting.
    pub fn decode(buf: &[u8], path: &Path) -> Result<Self> {
        if buf.len() < HEADER_SIZE {
            return Err(Error::archive(
                path,
                format!("header too short: {} bytes", buf.len()),
            ));
        }
        if &buf[0..4] != MAGIC {
            return Err(Error::archive(
                path,
                format!("invalid magic: {:?}", &buf[0..4]),
            ));
        }
        if buf[4] != VERSION {
            return Err(Error::archive(
                path,
                format!("unsupported version: {}", buf[4]),
            ));
        }
        if buf[5..8] != [0, 0, 0] {
            return Err(Error::archive(path, "reserved header bytes must be 0"));
        }

        let mut count = [0u8; 8];
        count.copy_from_slice(&buf[8..16]);
        Ok(Self {
            version: buf[4],
            record_count: u64::from_le_bytes(count),
        })
    }
}

/// Header of one record; the record's data follows it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordHeader {
    pub kind: RecordKind,
    pub path: String,
    pub offset: u64,
    pub len: u64,
}

impl RecordHeader {
    /// Encode the record header (without data).
    pub fn encode(&self) -> Vec<u8> {
        let path = self.path.as_bytes();
        let mut buf = Vec::with_capacity(1 + 4 + path.len() + 16);
        buf.push(self.kind.to_u8());
        buf.extend_from_slice(&(path.len() as u32).to_le_bytes());
        buf.extend_from_slice(path);
        buf.extend_from_slice(&self.offset.to_le_bytes());
        buf.extend_from_slice(&self.len.to_le_bytes());
        buf
    }

    fn read_from<R: Read>(reader: &mut R, archive: &Path) -> Result<Self> {
        let truncated = |e: io::Error| Error::archive(archive, format!("truncated record: {}", e));

        let mut kind = [0u8; 1];
        reader.read_exact(&mut kind).map_err(truncated)?;
        let kind = RecordKind::from_u8(kind[0])
            .ok_or_else(|| Error::archive(archive, format!("invalid record kind: {}", kind[0])))?;

        let mut word = [0u8; 4];
        reader.read_exact(&mut word).map_err(truncated)?;
        let path_len = u32::from_le_bytes(word) as usize;
        if path_len > MAX_PATH_LEN {
            return Err(Error::archive(
                archive,
                format!("record path length {} exceeds {}", path_len, MAX_PATH_LEN),
            ));
        }
        let mut path = vec![0u8; path_len];
        reader.read_exact(&mut path).map_err(truncated)?;
        let path = String::from_utf8(path)
            .map_err(|_| Error::archive(archive, "record path is not valid UTF-8"))?;

        let mut long = [0u8; 8];
        reader.read_exact(&mut long).map_err(truncated)?;
        let offset = u64::from_le_bytes(long);
        reader.read_exact(&mut long).map_err(truncated)?;
        let len = u64::from_le_bytes(long);

        if kind == RecordKind::Dir && len != 0 {
            return Err(Error::archive(archive, "directory record carries data"));
        }

        Ok(Self {
            kind,
            path,
            offset,
            len,
        })
    }
}

/// Visit every record of the archive at `path`.
///
/// The visitor receives the record header and a reader limited to the
/// record's data. Data the visitor leaves unread is skipped.
pub fn read_archive<F>(path: &Path, mut visit: F) -> Result<u64>
where
    F: FnMut(&RecordHeader, &mut dyn Read) -> Result<()>,
{
    let file = File::open(path).map_err(|e| Error::io_at(path, e))?;
    let mut reader = BufReader::new(file);

    let mut header = [0u8; HEADER_SIZE];
    reader
        .read_exact(&mut header)
        .map_err(|e| Error::archive(path, format!("cannot read header: {}", e)))?;
    let header = ArchiveHeader::decode(&header, path)?;

    for _ in 0..header.record_count {
        let record = RecordHeader::read_from(&mut reader, path)?;
        let mut data = (&mut reader).take(record.len);
        visit(&record, &mut data)?;
        io::copy(&mut data, &mut io::sink())?;
        if data.limit() != 0 {
            return Err(Error::archive(
                path,
                format!("record {} is truncated", record.path),
            ));
        }
    }

    Ok(header.record_count)
}

/// Convert a record path into a relative filesystem path.
///
/// Returns `None` for absolute paths, empty segments and `.`/`..`.
pub fn safe_relative(path: &str) -> Option<PathBuf> {
    if path.is_empty() {
        return None;
    }

    let mut out = PathBuf::new();
    for part in path.split('/') {
        if part.is_empty() || part == "." || part == ".." || part.contains('\\') {
            return None;
        }
        out.push(part);
    }

    // Catches drive prefixes and anything else the platform treats specially
    if out.components().all(|c| matches!(c, Component::Normal(_))) {
        Some(out)
    } else {
        None
    }
}
