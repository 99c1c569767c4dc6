//! # brokerlog storage
//!
//! Sequential file abstraction for the brokerlog journal.
//!
//! This crate is the lowest layer of the journal. Files are **opaque byte
//! stores** addressed by name inside a single directory; the crate knows
//! nothing about journal headers, records or control files.
//!
//! ## Design Principles
//!
//! - A [`FileFactory`] owns a flat namespace of files (open, exists, delete,
//!   rename, list)
//! - A [`SequentialFile`] is a positioned byte store (read, write, append,
//!   flush, sync)
//! - Both must be `Send + Sync`
//! - The journal owns all format interpretation
//!
//! ## Available Factories
//!
//! - [`InMemoryFactory`] - For testing and crash simulation
//! - [`FileSystemFactory`] - For persistent storage in one directory
//!
//! ## Example
//!
//! ```rust
//! use brokerlog_storage::{FileFactory, InMemoryFactory};
//!
//! let factory = InMemoryFactory::new();
//! let mut file = factory.open("journal-1.jrn").unwrap();
//! let offset = file.append(b"hello world").unwrap();
//! assert_eq!(file.read_at(offset, 11).unwrap(), b"hello world");
//! assert!(factory.exists("journal-1.jrn").unwrap());
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod factory;
mod file;
mod memory;

pub use error::{StorageError, StorageResult};
pub use factory::{FileFactory, SequentialFile};
pub use file::{FileSystemFactory, FsFile};
pub use memory::{InMemoryFactory, InMemoryFile};
