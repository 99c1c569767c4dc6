//! Point-in-time copy of the live record ids.

use brokerlog_collections::{ConcurrentLongHashMap, ConcurrentLongHashSet, LongValue};

/// Immutable set of record ids that were live when the snapshot was taken.
///
/// Compaction keeps exactly the records whose id is in the snapshot. Later
/// changes to the journal do not affect it.
#[derive(Debug)]
pub struct LivenessSnapshot {
    ids: ConcurrentLongHashSet,
}

impl LivenessSnapshot {
    /// Builds a snapshot from a list of ids. Negative ids are ignored.
    pub fn from_ids(ids: impl IntoIterator<Item = i64>) -> Self {
        Self {
            ids: ids.into_iter().collect(),
        }
    }

    /// Copies the keys of a live-record map.
    #[must_use]
    pub fn from_map<V: LongValue>(map: &ConcurrentLongHashMap<V>) -> Self {
        Self {
            ids: map.keys_set(),
        }
    }

    /// Returns true if the record was live.
    #[must_use]
    pub fn contains_record(&self, id: i64) -> bool {
        self.ids.contains(id)
    }

    /// Number of live ids.
    #[must_use]
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    /// Returns true if nothing was live.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}
