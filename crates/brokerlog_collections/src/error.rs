//! Error types for index construction.

use thiserror::Error;

/// Result type for collection operations.
pub type CollectionResult<T> = Result<T, CollectionError>;

/// Errors returned when an index cannot be constructed.
///
/// Lookups, inserts and removals never fail: absence is reported through
/// `Option`/`bool` and contention is handled internally.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CollectionError {
    /// The section count is zero or not a power of two.
    #[error("invalid section count {sections}: must be a non-zero power of two")]
    InvalidSectionCount {
        /// The rejected section count.
        sections: usize,
    },
}
