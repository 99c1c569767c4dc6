//! Journal statistics.
//!
//! # Usage
//!
//! ```rust,ignore
//! let journal = Journal::open(factory, JournalConfig::default())?;
//! journal.append_add(Record::new(1, 0, b"payload".to_vec()))?;
//!
//! let stats = journal.stats();
//! println!("Appended: {}", stats.records_appended);
//! println!("Compactions: {}", stats.compactions);
//! ```

use std::sync::atomic::{AtomicU64, Ordering};

/// Journal counters.
///
/// All counters are atomic and can be read while operations are in progress.
/// Values only ever grow.
#[derive(Debug, Default)]
pub struct JournalStats {
    // Append counters
    /// Records appended.
    records_appended: AtomicU64,
    /// Encoded bytes appended.
    bytes_appended: AtomicU64,
    /// Data files created by appends.
    files_created: AtomicU64,

    // Compaction counters
    /// Compactions completed.
    compactions: AtomicU64,
    /// Records carried over by compaction.
    records_kept: AtomicU64,
    /// Records dropped by compaction.
    records_dropped: AtomicU64,

    /// Interrupted compactions finished from a control file.
    recoveries: AtomicU64,
}

impl JournalStats {
    /// Creates a zeroed stats instance.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records an append.
    pub(crate) fn record_append(&self, bytes: u64) {
        self.records_appended.fetch_add(1, Ordering::Relaxed);
        self.bytes_appended.fetch_add(bytes, Ordering::Relaxed);
    }

    /// Records a new data file.
    pub(crate) fn record_file_created(&self) {
        self.files_created.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a finished compaction.
    pub(crate) fn record_compaction(&self, kept: u64, dropped: u64) {
        self.compactions.fetch_add(1, Ordering::Relaxed);
        self.records_kept.fetch_add(kept, Ordering::Relaxed);
        self.records_dropped.fetch_add(dropped, Ordering::Relaxed);
    }

    /// Records a replayed control file.
    pub(crate) fn record_recovery(&self) {
        self.recoveries.fetch_add(1, Ordering::Relaxed);
    }

    /// Returns the number of records appended.
    pub fn records_appended(&self) -> u64 {
        self.records_appended.load(Ordering::Relaxed)
    }

    /// Returns the number of bytes appended.
    pub fn bytes_appended(&self) -> u64 {
        self.bytes_appended.load(Ordering::Relaxed)
    }

    /// Returns the number of data files created by appends.
    pub fn files_created(&self) -> u64 {
        self.files_created.load(Ordering::Relaxed)
    }

    /// Returns the number of compactions completed.
    pub fn compactions(&self) -> u64 {
        self.compactions.load(Ordering::Relaxed)
    }

    /// Returns the number of records kept by compaction.
    pub fn records_kept(&self) -> u64 {
        self.records_kept.load(Ordering::Relaxed)
    }

    /// Returns the number of records dropped by compaction.
    pub fn records_dropped(&self) -> u64 {
        self.records_dropped.load(Ordering::Relaxed)
    }

    /// Returns the number of recoveries performed.
    pub fn recoveries(&self) -> u64 {
        self.recoveries.load(Ordering::Relaxed)
    }

    /// Returns a snapshot of all counters.
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            records_appended: self.records_appended(),
            bytes_appended: self.bytes_appended(),
            files_created: self.files_created(),
            compactions: self.compactions(),
            records_kept: self.records_kept(),
            records_dropped: self.records_dropped(),
            recoveries: self.recoveries(),
        }
    }
}

/// A point-in-time copy of [`JournalStats`].
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct StatsSnapshot {
    /// Records appended.
    pub records_appended: u64,
    /// Encoded bytes appended.
    pub bytes_appended: u64,
    /// Data files created by appends.
    pub files_created: u64,
    /// Compactions completed.
    pub compactions: u64,
    /// Records kept by compaction.
    pub records_kept: u64,
    /// Records dropped by compaction.
    pub records_dropped: u64,
    /// Recoveries performed.
    pub recoveries: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_stats_are_zero() {
        assert_eq!(JournalStats::new().snapshot(), StatsSnapshot::default());
    }

    #[test]
    fn record_operations() {
        let stats = JournalStats::new();

        stats.record_append(100);
        stats.record_append(50);
        stats.record_file_created();
        stats.record_compaction(7, 3);
        stats.record_recovery();

        let snap = stats.snapshot();
        assert_eq!(snap.records_appended, 2);
        assert_eq!(snap.bytes_appended, 150);
        assert_eq!(snap.files_created, 1);
        assert_eq!(snap.compactions, 1);
        assert_eq!(snap.records_kept, 7);
        assert_eq!(snap.records_dropped, 3);
        assert_eq!(snap.recoveries, 1);
    }

    #[test]
    fn concurrent_updates() {
        use std::sync::Arc;
        use std::thread;

        let stats = Arc::new(JournalStats::new());
        let mut handles = vec![];

        for _ in 0..8 {
            let s = Arc::clone(&stats);
            handles.push(thread::spawn(move || {
                for _ in 0..100 {
                    s.record_append(2);
                }
            }));
        }

        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(stats.records_appended(), 800);
        assert_eq!(stats.bytes_appended(), 1600);
    }
}
