//! # brokerlog core
//!
//! Append-only record journal for a message broker, with online compaction
//! and crash recovery.
//!
//! This crate provides:
//! - Fixed-size journal files with a versioned header and CRC-checked records
//! - A sequential reader that dispatches records to a callback
//! - The [`Journal`] facade: append, replay on open, live-record tracking
//! - Compaction that rewrites closed files without dead records, committed
//!   through a control file
//! - Recovery that finishes a compaction interrupted by a crash
//!
//! ## Example
//!
//! ```rust
//! use brokerlog_core::{Journal, JournalConfig, Record};
//! use brokerlog_storage::InMemoryFactory;
//! use std::sync::Arc;
//!
//! let journal = Journal::open(
//!     Arc::new(InMemoryFactory::new()),
//!     JournalConfig::new().file_size(4096).compact_min_files(1),
//! )
//! .unwrap();
//!
//! for id in 0..100 {
//!     journal.append_add(Record::new(id, 0, vec![0u8; 32])).unwrap();
//! }
//! for id in 0..90 {
//!     journal.append_delete(id).unwrap();
//! }
//!
//! let result = journal.compact().unwrap();
//! assert_eq!(result.records_kept, 10);
//! assert_eq!(journal.live_records(), 10);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod compaction;
mod config;
mod error;
mod file;
mod journal;
mod reader;
mod record;
mod snapshot;
mod stats;
mod types;
mod writer;

pub use compaction::{
    recover, CompactionResult, CompactionState, CompactionTask, ControlFileRecord,
    RecoveryOutcome,
};
pub use config::{JournalConfig, MIN_FILE_SIZE};
pub use error::{JournalError, JournalResult};
pub use file::{
    FileNamer, JournalFile, JournalFileHeader, COMPACTING_EXTENSION, FORMAT_VERSION, HEADER_SIZE,
};
pub use journal::Journal;
pub use reader::{JournalReader, JournalReaderCallback, ReadEnd, ReadSummary, RecordCollector};
pub use record::{compute_crc32, decode_record, encode_record, encoded_len, Decoded, RECORD_OVERHEAD};
pub use snapshot::LivenessSnapshot;
pub use stats::{JournalStats, StatsSnapshot};
pub use types::{Record, RecordInfo, RecordKind};
pub use writer::BufferedFileWriter;
