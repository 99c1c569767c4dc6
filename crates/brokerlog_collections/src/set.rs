//! Concurrent set of non-negative `i64` values.

use crate::error::CollectionResult;
use crate::hash::{
    check_sections, hash, section_capacity, section_index, DEFAULT_EXPECTED_ITEMS,
    DEFAULT_SECTIONS,
};
use crate::section::{PutOutcome, Section};
use std::fmt;

/// Concurrent hash set of non-negative `i64` values.
///
/// Shares the map's sections and probing but stores no value words. Negative
/// values are reserved: they are logged and ignored, never stored.
///
/// # Example
///
/// ```rust
/// use brokerlog_collections::ConcurrentLongHashSet;
///
/// let set = ConcurrentLongHashSet::new();
/// assert!(set.add(7));
/// assert!(!set.add(7));
/// assert!(set.contains(7));
/// assert!(!set.add(-1));
/// ```
pub struct ConcurrentLongHashSet {
    sections: Box<[Section]>,
}

impl ConcurrentLongHashSet {
    /// Creates a set sized for 256 items over 16 sections.
    #[must_use]
    pub fn new() -> Self {
        Self::with_expected_items(DEFAULT_EXPECTED_ITEMS)
    }

    /// Creates a set sized for `expected_items` over 16 sections.
    #[must_use]
    pub fn with_expected_items(expected_items: usize) -> Self {
        Self::build(expected_items, DEFAULT_SECTIONS)
    }

    /// Creates a set with an explicit section count.
    ///
    /// # Errors
    ///
    /// Returns [`crate::CollectionError::InvalidSectionCount`] if `sections`
    /// is zero or not a power of two.
    pub fn with_sections(expected_items: usize, sections: usize) -> CollectionResult<Self> {
        check_sections(sections)?;
        Ok(Self::build(expected_items, sections))
    }

    fn build(expected_items: usize, sections: usize) -> Self {
        let capacity = section_capacity(expected_items, sections);
        Self {
            sections: (0..sections)
                .map(|_| Section::new(capacity, false))
                .collect(),
        }
    }

    #[inline]
    fn section(&self, key_hash: u64) -> &Section {
        &self.sections[section_index(key_hash, self.sections.len())]
    }

    fn accepts(item: i64, operation: &'static str) -> bool {
        if item < 0 {
            tracing::warn!(item, operation, "negative value rejected by long hash set");
            return false;
        }
        true
    }

    /// Returns true if `item` is in the set.
    pub fn contains(&self, item: i64) -> bool {
        if !Self::accepts(item, "contains") {
            return false;
        }
        let h = hash(item);
        self.section(h).get(item, h).is_some()
    }

    /// Adds `item`. Returns true if it was not already present.
    pub fn add(&self, item: i64) -> bool {
        if !Self::accepts(item, "add") {
            return false;
        }
        let h = hash(item);
        matches!(
            self.section(h).put(item, h, true, |_| 0),
            PutOutcome::Inserted(_)
        )
    }

    /// Removes `item`. Returns true if it was present.
    pub fn remove(&self, item: i64) -> bool {
        if !Self::accepts(item, "remove") {
            return false;
        }
        let h = hash(item);
        self.section(h).remove(item, h, None).is_some()
    }

    /// Removes all items. Section capacities are kept.
    pub fn clear(&self) {
        for section in self.sections.iter() {
            section.clear();
        }
    }

    /// Calls `f` for every item, one section at a time.
    pub fn for_each(&self, mut f: impl FnMut(i64)) {
        for section in self.sections.iter() {
            for (item, _) in section.entries() {
                f(item);
            }
        }
    }

    /// Returns a copy of all items.
    #[must_use]
    pub fn items(&self) -> Vec<i64> {
        let mut items = Vec::with_capacity(self.len());
        self.for_each(|item| items.push(item));
        items
    }

    /// Number of items. Best effort while writers are active.
    #[must_use]
    pub fn len(&self) -> usize {
        self.sections.iter().map(Section::len).sum()
    }

    /// Returns true if no section holds an item.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sections.iter().all(|section| section.len() == 0)
    }

    /// Total number of buckets across sections.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.sections.iter().map(Section::capacity).sum()
    }

    /// Occupied plus tombstoned buckets across sections.
    #[must_use]
    pub fn used_bucket_count(&self) -> usize {
        self.sections.iter().map(Section::used_buckets).sum()
    }
}

impl Default for ConcurrentLongHashSet {
    fn default() -> Self {
        Self::new()
    }
}

impl FromIterator<i64> for ConcurrentLongHashSet {
    fn from_iter<I: IntoIterator<Item = i64>>(iter: I) -> Self {
        let iter = iter.into_iter();
        let set = Self::with_expected_items(iter.size_hint().0);
        for item in iter {
            set.add(item);
        }
        set
    }
}

impl fmt::Debug for ConcurrentLongHashSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConcurrentLongHashSet")
            .field("sections", &self.sections.len())
            .field("len", &self.len())
            .field("capacity", &self.capacity())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::collections::HashSet;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn add_contains_remove() {
        let set = ConcurrentLongHashSet::new();

        assert!(set.add(1));
        assert!(set.add(2));
        assert!(!set.add(1));
        assert_eq!(set.len(), 2);

        assert!(set.contains(1));
        assert!(!set.contains(3));

        assert!(set.remove(1));
        assert!(!set.remove(1));
        assert!(!set.contains(1));
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn negative_items_rejected() {
        let set = ConcurrentLongHashSet::new();

        assert!(!set.add(-1));
        assert!(!set.add(i64::MIN));
        assert!(!set.contains(-1));
        assert!(!set.remove(-1));
        assert!(set.is_empty());

        assert!(set.add(0));
        assert!(set.add(i64::MAX));
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn sixteen_section_scenario() {
        let set = ConcurrentLongHashSet::with_sections(256, 16).unwrap();

        for i in 0..1000 {
            set.add(i);
        }
        assert_eq!(set.len(), 1000);

        for i in 0..500 {
            set.remove(i);
        }
        assert_eq!(set.len(), 500);
        assert!(!set.contains(250));
        assert!(set.contains(750));
    }

    #[test]
    fn rejects_bad_section_counts() {
        assert!(ConcurrentLongHashSet::with_sections(16, 0).is_err());
        assert!(ConcurrentLongHashSet::with_sections(16, 6).is_err());
    }

    #[test]
    fn items_and_from_iter() {
        let set: ConcurrentLongHashSet = (0..100).collect();

        let mut items = set.items();
        items.sort_unstable();
        assert_eq!(items, (0..100).collect::<Vec<_>>());

        set.clear();
        assert!(set.items().is_empty());
    }

    #[test]
    fn concurrent_adds_are_counted_once() {
        let set = Arc::new(ConcurrentLongHashSet::with_expected_items(8));

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let set = Arc::clone(&set);
                thread::spawn(move || (0..5000).filter(|&i| set.add(i)).count())
            })
            .collect();

        let added: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();

        assert_eq!(added, 5000);
        assert_eq!(set.len(), 5000);
    }

    proptest! {
        #[test]
        fn behaves_like_hashset(ops in prop::collection::vec((any::<bool>(), 0i64..128), 0..400)) {
            let set = ConcurrentLongHashSet::with_sections(1, 2).unwrap();
            let mut model = HashSet::new();

            for (insert, item) in ops {
                if insert {
                    prop_assert_eq!(set.add(item), model.insert(item));
                } else {
                    prop_assert_eq!(set.remove(item), model.remove(&item));
                }
            }

            prop_assert_eq!(set.len(), model.len());
            for item in model {
                prop_assert!(set.contains(item));
            }
        }
    }
}
