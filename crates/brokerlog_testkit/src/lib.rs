//! # brokerlog testkit
//!
//! Test utilities for the brokerlog journal.
//!
//! This crate provides:
//! - Journal fixtures over in-memory and on-disk factories
//! - Property-based generators for journal operations using proptest
//! - A fault-injecting file factory and crash recovery harness
//! - Stress runners for the concurrent index and the journal
//! - Cross-crate integration scenarios checked against a model
//!
//! ## Usage
//!
//! ```rust,ignore
//! use brokerlog_testkit::prelude::*;
//!
//! #[test]
//! fn test_with_journal() {
//!     with_temp_journal(|journal| {
//!         journal.append_add(Record::new(1, 0, b"x".to_vec())).unwrap();
//!     });
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod crash;
pub mod fixtures;
pub mod generators;
pub mod integration;
pub mod stress;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::crash::*;
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::integration::*;
    pub use crate::stress::*;
    pub use brokerlog_core::{Journal, JournalConfig, Record, RecordKind};
}

pub use crash::*;
pub use fixtures::*;
pub use generators::*;
pub use integration::*;
pub use stress::*;
