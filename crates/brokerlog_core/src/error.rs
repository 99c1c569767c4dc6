//! Error types for the journal.

use thiserror::Error;

/// Result type for journal operations.
pub type JournalResult<T> = Result<T, JournalError>;

/// Errors that can occur in journal operations.
#[derive(Debug, Error)]
pub enum JournalError {
    /// File I/O collaborator error.
    #[error("storage error: {0}")]
    Storage(#[from] brokerlog_storage::StorageError),

    /// Index construction error.
    #[error("index error: {0}")]
    Collection(#[from] brokerlog_collections::CollectionError),

    /// A journal file holds bytes that cannot be a record.
    #[error("journal corruption: {message}")]
    Corruption {
        /// Description of the corruption.
        message: String,
    },

    /// A file header or payload does not follow the journal format.
    #[error("invalid journal format: {message}")]
    InvalidFormat {
        /// Description of the format issue.
        message: String,
    },

    /// Checksum mismatch detected.
    #[error("checksum mismatch at offset {offset}: expected {expected:08x}, got {actual:08x}")]
    ChecksumMismatch {
        /// Offset of the record inside its file.
        offset: u64,
        /// Checksum stored in the record.
        expected: u32,
        /// Checksum computed over the record.
        actual: u32,
    },

    /// Operation not permitted in the current state.
    #[error("invalid operation: {message}")]
    InvalidOperation {
        /// Description of why the operation is invalid.
        message: String,
    },

    /// The compaction control file cannot be written or replayed.
    #[error("control file error: {message}")]
    ControlFile {
        /// Description of the failure.
        message: String,
    },

    /// The journal has been closed.
    #[error("journal is closed")]
    Closed,

    /// An update or delete names a record that is not live.
    #[error("record not found: {id}")]
    RecordNotFound {
        /// The record id.
        id: i64,
    },

    /// A record does not fit in one journal file.
    #[error("record too large: {size} bytes exceeds the {max} bytes available per file")]
    RecordTooLarge {
        /// Encoded record size.
        size: usize,
        /// Space available after the file header.
        max: usize,
    },
}

impl JournalError {
    /// Creates a corruption error.
    pub fn corruption(message: impl Into<String>) -> Self {
        Self::Corruption {
            message: message.into(),
        }
    }

    /// Creates an invalid format error.
    pub fn invalid_format(message: impl Into<String>) -> Self {
        Self::InvalidFormat {
            message: message.into(),
        }
    }

    /// Creates an invalid operation error.
    pub fn invalid_operation(message: impl Into<String>) -> Self {
        Self::InvalidOperation {
            message: message.into(),
        }
    }

    /// Creates a control file error.
    pub fn control_file(message: impl Into<String>) -> Self {
        Self::ControlFile {
            message: message.into(),
        }
    }

    /// Returns true if the error comes from undecodable file contents.
    #[must_use]
    pub fn is_corruption(&self) -> bool {
        matches!(
            self,
            Self::Corruption { .. } | Self::InvalidFormat { .. } | Self::ChecksumMismatch { .. }
        )
    }
}
