//! Journal file header, descriptors and naming.

use crate::error::{JournalError, JournalResult};
use bytes::{BufMut, BytesMut};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Current journal format version.
pub const FORMAT_VERSION: i32 = 2;

/// Size of the file header: format version, user version, file id.
pub const HEADER_SIZE: usize = 16;

/// Extension of files written by an in-flight compaction.
pub const COMPACTING_EXTENSION: &str = "cmp";

/// Extensions the journal uses for its own bookkeeping files.
pub const RESERVED_EXTENSIONS: [&str; 3] = [COMPACTING_EXTENSION, "ctr", "tmp"];

/// Header written at offset 0 of every journal file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JournalFileHeader {
    /// Journal format version.
    pub format_version: i32,
    /// Application version.
    pub user_version: i32,
    /// Ordering id of the file.
    pub file_id: i64,
}

impl JournalFileHeader {
    /// Creates a header for the current format version.
    #[must_use]
    pub const fn new(user_version: i32, file_id: i64) -> Self {
        Self {
            format_version: FORMAT_VERSION,
            user_version,
            file_id,
        }
    }

    /// Appends the encoded header to `buf`.
    pub fn encode(&self, buf: &mut BytesMut) {
        buf.put_i32_le(self.format_version);
        buf.put_i32_le(self.user_version);
        buf.put_i64_le(self.file_id);
    }

    /// Decodes a header from the start of `data`.
    ///
    /// # Errors
    ///
    /// Returns [`JournalError::InvalidFormat`] if `data` is shorter than a
    /// header or the format version is not supported.
    pub fn decode(data: &[u8]) -> JournalResult<Self> {
        if data.len() < HEADER_SIZE {
            return Err(JournalError::invalid_format(format!(
                "file header needs {HEADER_SIZE} bytes, got {}",
                data.len()
            )));
        }

        let mut i32_bytes = [0u8; 4];
        let mut i64_bytes = [0u8; 8];

        i32_bytes.copy_from_slice(&data[0..4]);
        let format_version = i32::from_le_bytes(i32_bytes);
        i32_bytes.copy_from_slice(&data[4..8]);
        let user_version = i32::from_le_bytes(i32_bytes);
        i64_bytes.copy_from_slice(&data[8..16]);
        let file_id = i64::from_le_bytes(i64_bytes);

        if format_version != FORMAT_VERSION {
            return Err(JournalError::invalid_format(format!(
                "unsupported format version {format_version}, expected {FORMAT_VERSION}"
            )));
        }

        Ok(Self {
            format_version,
            user_version,
            file_id,
        })
    }
}

/// A closed or open journal data file.
///
/// The name and the ordering id are independent: compaction reuses ordering
/// ids of the files it replaces while always writing under fresh names.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JournalFile {
    /// File name inside the journal directory.
    pub name: String,
    /// Position of the file in replay order.
    pub ordering_id: i64,
    /// Number of records written to the file.
    pub records: u64,
}

impl JournalFile {
    /// Creates a descriptor.
    pub fn new(name: impl Into<String>, ordering_id: i64) -> Self {
        Self {
            name: name.into(),
            ordering_id,
            records: 0,
        }
    }
}

impl fmt::Display for JournalFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}(ord:{})", self.name, self.ordering_id)
    }
}

/// Allocates data file names of the form `{prefix}-{n}.{extension}`.
///
/// `n` only ever grows, so a freshly allocated name never collides with a
/// file still on disk.
#[derive(Debug)]
pub struct FileNamer {
    prefix: String,
    extension: String,
    next: AtomicU64,
}

impl FileNamer {
    /// Creates a namer whose first allocation is `first`.
    pub fn new(prefix: impl Into<String>, extension: impl Into<String>, first: u64) -> Self {
        Self {
            prefix: prefix.into(),
            extension: extension.into(),
            next: AtomicU64::new(first),
        }
    }

    /// Returns the data file extension.
    #[must_use]
    pub fn extension(&self) -> &str {
        &self.extension
    }

    /// Reserves the next sequence number.
    pub fn allocate(&self) -> u64 {
        self.next.fetch_add(1, Ordering::Relaxed)
    }

    /// Makes sure future allocations are above `sequence`.
    pub fn observe(&self, sequence: u64) {
        self.next.fetch_max(sequence + 1, Ordering::Relaxed);
    }

    /// Name of the data file with this sequence number.
    #[must_use]
    pub fn data_name(&self, sequence: u64) -> String {
        format!("{}-{sequence}.{}", self.prefix, self.extension)
    }

    /// Name of the compaction output that becomes `data_name(sequence)`.
    #[must_use]
    pub fn compacting_name(&self, sequence: u64) -> String {
        format!("{}-{sequence}.{COMPACTING_EXTENSION}", self.prefix)
    }

    /// Extracts the sequence number from a data or compaction file name.
    #[must_use]
    pub fn parse_sequence(&self, name: &str) -> Option<u64> {
        let stem = name
            .strip_suffix(self.extension.as_str())
            .or_else(|| name.strip_suffix(COMPACTING_EXTENSION))?
            .strip_suffix('.')?;
        let number = stem.strip_prefix(self.prefix.as_str())?.strip_prefix('-')?;
        number.parse().ok()
    }
}
