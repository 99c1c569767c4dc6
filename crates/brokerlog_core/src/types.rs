//! Core type definitions for the journal.

use bytes::Bytes;
use std::fmt;

/// Kind of a journal record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum RecordKind {
    /// A new record id.
    Add = 1,
    /// New content for a live record id.
    Update = 2,
    /// Removal of a live record id. Carries an empty body.
    Delete = 3,
}

impl RecordKind {
    /// Converts a byte to a record kind.
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            1 => Some(Self::Add),
            2 => Some(Self::Update),
            3 => Some(Self::Delete),
            _ => None,
        }
    }

    /// Converts the record kind to a byte.
    #[must_use]
    pub const fn as_byte(self) -> u8 {
        self as u8
    }
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Add => f.write_str("add"),
            Self::Update => f.write_str("update"),
            Self::Delete => f.write_str("delete"),
        }
    }
}

/// A journal record.
///
/// The id is the record's identity; the body is opaque to the journal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    /// Record identifier. Must be non-negative.
    pub id: i64,
    /// Application-defined record type.
    pub record_type: u8,
    /// Opaque payload.
    pub body: Bytes,
    /// Transaction the record belongs to, if any.
    pub tx_id: Option<i64>,
}

impl Record {
    /// Creates a non-transactional record.
    pub fn new(id: i64, record_type: u8, body: impl Into<Bytes>) -> Self {
        Self {
            id,
            record_type,
            body: body.into(),
            tx_id: None,
        }
    }

    /// Creates the body-less record appended for a delete.
    #[must_use]
    pub fn tombstone(id: i64) -> Self {
        Self::new(id, 0, Bytes::new())
    }

    /// Attaches a transaction id.
    #[must_use]
    pub fn with_tx(mut self, tx_id: i64) -> Self {
        self.tx_id = Some(tx_id);
        self
    }
}

/// A record as decoded from a journal file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordInfo {
    /// Kind of the record.
    pub kind: RecordKind,
    /// The record itself. The body shares the file's read buffer.
    pub record: Record,
    /// Ordering id of the file the record was read from.
    pub file_ordering_id: i64,
    /// Offset of the record inside its file.
    pub offset: u64,
}

impl RecordInfo {
    /// Returns the record id.
    #[must_use]
    pub fn id(&self) -> i64 {
        self.record.id
    }
}
