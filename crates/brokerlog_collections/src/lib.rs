//! # brokerlog collections
//!
//! Concurrent hash map and set keyed by 64-bit integers, used by the journal
//! to track which records are live.
//!
//! ## Structure
//!
//! Both collections split their keys over a power-of-two number of
//! sections. A 64-bit multiplicative hash picks the section from its high
//! half and the first bucket from its low half. Each section is an
//! open-addressing table with linear probing and its own lock, so writers to
//! different sections never contend.
//!
//! ## Reads
//!
//! Lookups and scans are optimistic: they read the bucket atomics, then
//! check that the section's sequence stamp did not move. Only a lookup that
//! raced with a writer retries under the section lock.
//!
//! ## Example
//!
//! ```rust
//! use brokerlog_collections::{ConcurrentLongHashMap, ConcurrentLongHashSet};
//!
//! let live: ConcurrentLongHashMap<i64> = ConcurrentLongHashMap::new();
//! live.put(100, 3);
//! live.put(101, 4);
//!
//! let snapshot: ConcurrentLongHashSet = live.keys_set();
//! live.remove(100);
//!
//! assert!(snapshot.contains(100));
//! assert_eq!(live.len(), 1);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod error;
pub mod hash;
mod map;
mod section;
mod set;

pub use error::{CollectionError, CollectionResult};
pub use map::{ConcurrentLongHashMap, LongValue};
pub use set::ConcurrentLongHashSet;
