//! One independently locked shard of a concurrent long-keyed index.
//!
//! A section owns an open-addressing table with linear probing. Every bucket
//! is a key word, a state tag and (for maps) a value word, each stored in an
//! atomic so optimistic readers can load them without `unsafe`.
//!
//! ## Locking
//!
//! - Writers (`put`, `remove`, `clear`) hold the table's upgradable read
//!   lock. It is exclusive among writers but shared with readers, so the
//!   table itself can only change in place. Every in-place mutation is
//!   bracketed by the stamp going odd and back to even.
//! - Rehash upgrades the writer's guard to the write lock and swaps in a new
//!   table. Readers never observe a table being replaced.
//! - Readers hold the shared read lock, capture the stamp, scan, and
//!   re-validate. A changed or odd stamp drops the read guard and redoes the
//!   scan under the upgradable lock.

use crate::hash::{bucket_index, hash, resize_threshold};
use parking_lot::{RwLock, RwLockUpgradableReadGuard, RwLockWriteGuard};
use std::sync::atomic::{AtomicI64, AtomicU64, AtomicU8, AtomicUsize, Ordering};

/// State tag of a bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub(crate) enum BucketState {
    /// Never used since the last clear or rehash. Ends a lookup.
    Empty = 0,
    /// Held a key that was removed. Lookups continue past it.
    Tombstone = 1,
    /// Holds a live key.
    Occupied = 2,
}

impl BucketState {
    fn from_tag(tag: u8) -> Self {
        match tag {
            1 => Self::Tombstone,
            2 => Self::Occupied,
            _ => Self::Empty,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Slot {
    state: BucketState,
    key: i64,
    value: u64,
}

/// Bucket arrays of one section.
#[derive(Debug)]
struct Table {
    keys: Box<[AtomicI64]>,
    states: Box<[AtomicU8]>,
    /// Empty for sets.
    values: Box<[AtomicU64]>,
    resize_threshold: usize,
}

impl Table {
    fn new(capacity: usize, with_values: bool) -> Self {
        Self {
            keys: (0..capacity).map(|_| AtomicI64::new(0)).collect(),
            states: (0..capacity)
                .map(|_| AtomicU8::new(BucketState::Empty as u8))
                .collect(),
            values: if with_values {
                (0..capacity).map(|_| AtomicU64::new(0)).collect()
            } else {
                Box::default()
            },
            resize_threshold: resize_threshold(capacity),
        }
    }

    #[inline]
    fn capacity(&self) -> usize {
        self.keys.len()
    }

    #[inline]
    fn next(&self, bucket: usize) -> usize {
        (bucket + 1) & (self.capacity() - 1)
    }

    #[inline]
    fn state(&self, bucket: usize) -> BucketState {
        BucketState::from_tag(self.states[bucket].load(Ordering::Acquire))
    }

    #[inline]
    fn key(&self, bucket: usize) -> i64 {
        self.keys[bucket].load(Ordering::Acquire)
    }

    #[inline]
    fn value(&self, bucket: usize) -> u64 {
        self.values
            .get(bucket)
            .map_or(0, |value| value.load(Ordering::Acquire))
    }

    #[inline]
    fn slot(&self, bucket: usize) -> Slot {
        Slot {
            state: self.state(bucket),
            key: self.key(bucket),
            value: self.value(bucket),
        }
    }

    fn set_state(&self, bucket: usize, state: BucketState) {
        self.states[bucket].store(state as u8, Ordering::Release);
    }

    fn set_value(&self, bucket: usize, value: u64) {
        if let Some(slot) = self.values.get(bucket) {
            slot.store(value, Ordering::Release);
        }
    }

    /// Fills a bucket. The state is published last.
    fn occupy(&self, bucket: usize, key: i64, value: u64) {
        self.keys[bucket].store(key, Ordering::Release);
        self.set_value(bucket, value);
        self.set_state(bucket, BucketState::Occupied);
    }

    /// Finds the bucket holding `key`, stopping at the first empty bucket.
    fn find(&self, key: i64, key_hash: u64) -> Option<(usize, u64)> {
        let capacity = self.capacity();
        let mut bucket = bucket_index(key_hash, capacity);

        for _ in 0..capacity {
            match self.state(bucket) {
                BucketState::Occupied if self.key(bucket) == key => {
                    return Some((bucket, self.value(bucket)));
                }
                BucketState::Empty => return None,
                _ => {}
            }
            bucket = self.next(bucket);
        }

        None
    }

    /// Locates `key` or the bucket a new entry for it should go into.
    /// Returns `None` if the table has neither a match nor a free bucket.
    fn insert_target(&self, key: i64, key_hash: u64) -> Option<InsertTarget> {
        let capacity = self.capacity();
        let mut bucket = bucket_index(key_hash, capacity);
        let mut first_tombstone = None;

        for _ in 0..capacity {
            match self.state(bucket) {
                BucketState::Occupied if self.key(bucket) == key => {
                    return Some(InsertTarget::Existing(bucket));
                }
                BucketState::Occupied => {}
                BucketState::Tombstone => {
                    first_tombstone.get_or_insert(bucket);
                }
                BucketState::Empty => {
                    return Some(match first_tombstone {
                        Some(reused) => InsertTarget::Vacant {
                            bucket: reused,
                            fresh: false,
                        },
                        None => InsertTarget::Vacant {
                            bucket,
                            fresh: true,
                        },
                    });
                }
            }
            bucket = self.next(bucket);
        }

        first_tombstone.map(|reused| InsertTarget::Vacant {
            bucket: reused,
            fresh: false,
        })
    }

    /// Inserts into a table no reader can see yet.
    fn insert_unpublished(&self, key: i64, value: u64) {
        let capacity = self.capacity();
        let mut bucket = bucket_index(hash(key), capacity);

        for _ in 0..capacity {
            if self.state(bucket) == BucketState::Empty {
                self.occupy(bucket, key, value);
                return;
            }
            bucket = self.next(bucket);
        }
    }
}

/// Where an insert lands.
#[derive(Debug, PartialEq, Eq)]
enum InsertTarget {
    Existing(usize),
    Vacant { bucket: usize, fresh: bool },
}

/// Result of an insert attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PutOutcome {
    /// The key was absent and now maps to this value.
    Inserted(u64),
    /// The key was present with this value.
    Present(u64),
}

/// Keeps the stamp odd for as long as it lives.
struct WriteStamp<'a> {
    stamp: &'a AtomicU64,
}

impl<'a> WriteStamp<'a> {
    fn begin(stamp: &'a AtomicU64) -> Self {
        stamp.fetch_add(1, Ordering::Release); // even -> odd
        Self { stamp }
    }
}

impl Drop for WriteStamp<'_> {
    fn drop(&mut self) {
        self.stamp.fetch_add(1, Ordering::Release); // odd -> even
    }
}

/// A shard of the index with its own lock, stamp and counters.
#[derive(Debug)]
pub(crate) struct Section {
    table: RwLock<Table>,
    stamp: AtomicU64,
    capacity: AtomicUsize,
    size: AtomicUsize,
    used_buckets: AtomicUsize,
    with_values: bool,
}

impl Section {
    /// Creates a section. `capacity` must be a power of two of at least 2.
    pub(crate) fn new(capacity: usize, with_values: bool) -> Self {
        Self {
            table: RwLock::new(Table::new(capacity, with_values)),
            stamp: AtomicU64::new(0),
            capacity: AtomicUsize::new(capacity),
            size: AtomicUsize::new(0),
            used_buckets: AtomicUsize::new(0),
            with_values,
        }
    }

    /// Runs a read-only lookup optimistically, then under the writer lock
    /// if a write raced with it.
    fn read<R>(&self, op: impl Fn(&Table) -> R) -> R {
        {
            let table = self.table.read();
            let before = self.stamp.load(Ordering::Acquire);
            if before & 1 == 0 {
                let result = op(&table);
                if self.stamp.load(Ordering::Acquire) == before {
                    return result;
                }
            }
            // The read guard must go before taking the upgradable lock: a
            // writer waiting to upgrade would otherwise wait on us forever.
        }

        let table = self.table.upgradable_read();
        op(&table)
    }

    /// Returns the value stored for `key`.
    pub(crate) fn get(&self, key: i64, key_hash: u64) -> Option<u64> {
        self.read(|table| table.find(key, key_hash).map(|(_, value)| value))
    }

    /// Inserts or overwrites `key`.
    ///
    /// `value` is called at most once, under the section lock, and only if
    /// the stored value changes.
    pub(crate) fn put(
        &self,
        key: i64,
        key_hash: u64,
        only_if_absent: bool,
        value: impl FnOnce(i64) -> u64,
    ) -> PutOutcome {
        let mut table = self.table.upgradable_read();

        let target = loop {
            match table.insert_target(key, key_hash) {
                Some(target) => break target,
                None => table = self.rehash(table),
            }
        };

        let outcome = match target {
            InsertTarget::Existing(bucket) => {
                let previous = table.value(bucket);
                if !only_if_absent {
                    let new_value = value(key);
                    let _stamp = WriteStamp::begin(&self.stamp);
                    table.set_value(bucket, new_value);
                }
                return PutOutcome::Present(previous);
            }
            InsertTarget::Vacant { bucket, fresh } => {
                let new_value = value(key);
                let _stamp = WriteStamp::begin(&self.stamp);
                table.occupy(bucket, key, new_value);
                self.size.fetch_add(1, Ordering::Release);
                if fresh {
                    self.used_buckets.fetch_add(1, Ordering::Release);
                }
                PutOutcome::Inserted(new_value)
            }
        };

        if self.used_buckets.load(Ordering::Acquire) > table.resize_threshold {
            drop(self.rehash(table));
        }

        outcome
    }

    /// Removes `key` if present and, when `expected` is given, only if its
    /// value matches. Returns the removed value.
    pub(crate) fn remove(&self, key: i64, key_hash: u64, expected: Option<u64>) -> Option<u64> {
        let table = self.table.upgradable_read();
        let (bucket, stored) = table.find(key, key_hash)?;

        if expected.is_some_and(|expected| expected != stored) {
            return None;
        }

        let _stamp = WriteStamp::begin(&self.stamp);
        self.size.fetch_sub(1, Ordering::Release);

        // A removal at the end of a collision chain leaves no tombstone
        if table.state(table.next(bucket)) == BucketState::Empty {
            table.set_state(bucket, BucketState::Empty);
            self.used_buckets.fetch_sub(1, Ordering::Release);
        } else {
            table.set_state(bucket, BucketState::Tombstone);
        }

        Some(stored)
    }

    /// Empties the section, keeping its capacity.
    pub(crate) fn clear(&self) {
        let table = self.table.upgradable_read();
        let _stamp = WriteStamp::begin(&self.stamp);

        for state in table.states.iter() {
            state.store(BucketState::Empty as u8, Ordering::Release);
        }
        self.size.store(0, Ordering::Release);
        self.used_buckets.store(0, Ordering::Release);
    }

    /// Copies all live entries.
    ///
    /// The optimistic scan validates the stamp after every bucket; once a
    /// write is detected the section is rescanned under the writer lock.
    pub(crate) fn entries(&self) -> Vec<(i64, u64)> {
        {
            let table = self.table.read();
            let before = self.stamp.load(Ordering::Acquire);
            if before & 1 == 0 {
                let mut entries = Vec::with_capacity(self.len());
                let mut valid = true;
                for bucket in 0..table.capacity() {
                    let slot = table.slot(bucket);
                    if self.stamp.load(Ordering::Acquire) != before {
                        valid = false;
                        break;
                    }
                    if slot.state == BucketState::Occupied {
                        entries.push((slot.key, slot.value));
                    }
                }
                if valid {
                    return entries;
                }
            }
        }

        let table = self.table.upgradable_read();
        (0..table.capacity())
            .map(|bucket| table.slot(bucket))
            .filter(|slot| slot.state == BucketState::Occupied)
            .map(|slot| (slot.key, slot.value))
            .collect()
    }

    /// Doubles the table and reinserts all live entries.
    fn rehash<'a>(
        &'a self,
        table: RwLockUpgradableReadGuard<'a, Table>,
    ) -> RwLockUpgradableReadGuard<'a, Table> {
        let mut table = RwLockUpgradableReadGuard::upgrade(table);
        {
            let _stamp = WriteStamp::begin(&self.stamp);
            let new_capacity = table.capacity() * 2;
            let grown = Table::new(new_capacity, self.with_values);

            for bucket in 0..table.capacity() {
                let slot = table.slot(bucket);
                if slot.state == BucketState::Occupied {
                    grown.insert_unpublished(slot.key, slot.value);
                }
            }

            *table = grown;
            self.used_buckets
                .store(self.size.load(Ordering::Acquire), Ordering::Release);
            self.capacity.store(new_capacity, Ordering::Release);
        }
        tracing::trace!(capacity = table.capacity(), "section rehashed");
        RwLockWriteGuard::downgrade_to_upgradable(table)
    }

    /// Number of live entries.
    pub(crate) fn len(&self) -> usize {
        self.size.load(Ordering::Acquire)
    }

    /// Number of buckets.
    pub(crate) fn capacity(&self) -> usize {
        self.capacity.load(Ordering::Acquire)
    }

    /// Number of occupied plus tombstoned buckets.
    pub(crate) fn used_buckets(&self) -> usize {
        self.used_buckets.load(Ordering::Acquire)
    }

    #[cfg(test)]
    pub(crate) fn stamp(&self) -> u64 {
        self.stamp.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn put(section: &Section, key: i64, value: u64) -> PutOutcome {
        section.put(key, hash(key), false, |_| value)
    }

    fn get(section: &Section, key: i64) -> Option<u64> {
        section.get(key, hash(key))
    }

    fn remove(section: &Section, key: i64) -> Option<u64> {
        section.remove(key, hash(key), None)
    }

    #[test]
    fn put_get_overwrite() {
        let section = Section::new(4, true);

        assert_eq!(put(&section, 7, 70), PutOutcome::Inserted(70));
        assert_eq!(get(&section, 7), Some(70));
        assert_eq!(put(&section, 7, 71), PutOutcome::Present(70));
        assert_eq!(get(&section, 7), Some(71));
        assert_eq!(section.len(), 1);
        assert_eq!(get(&section, 8), None);
    }

    #[test]
    fn only_if_absent_keeps_value() {
        let section = Section::new(4, true);
        put(&section, 1, 10);

        let outcome = section.put(1, hash(1), true, |_| 99);
        assert_eq!(outcome, PutOutcome::Present(10));
        assert_eq!(get(&section, 1), Some(10));
    }

    #[test]
    fn provider_not_called_when_present() {
        let section = Section::new(4, true);
        put(&section, 1, 10);

        let outcome = section.put(1, hash(1), true, |_| panic!("provider called"));
        assert_eq!(outcome, PutOutcome::Present(10));
    }

    #[test]
    fn writes_leave_stamp_even() {
        let section = Section::new(4, true);
        assert_eq!(section.stamp(), 0);

        put(&section, 1, 1);
        assert_eq!(section.stamp(), 2);
        remove(&section, 1);
        assert_eq!(section.stamp(), 4);

        // Misses do not write
        remove(&section, 1);
        get(&section, 1);
        assert_eq!(section.stamp(), 4);
    }

    #[test]
    fn rehash_doubles_and_keeps_entries() {
        let section = Section::new(2, true);

        for key in 0..100 {
            put(&section, key, key as u64 * 3);
        }

        assert_eq!(section.len(), 100);
        assert!(section.capacity() >= 128);
        assert!(section.capacity().is_power_of_two());
        assert!(section.used_buckets() <= resize_threshold(section.capacity()));
        for key in 0..100 {
            assert_eq!(get(&section, key), Some(key as u64 * 3));
        }
    }

    #[test]
    fn rehash_drops_tombstones() {
        let section = Section::new(64, true);

        for key in 0..40 {
            put(&section, key, 1);
        }
        for key in 0..30 {
            remove(&section, key);
        }
        assert!(section.used_buckets() >= section.len());

        // Grow until a rehash happens
        let before = section.capacity();
        let mut key = 1000;
        while section.capacity() == before {
            put(&section, key, 1);
            key += 1;
        }
        assert_eq!(section.used_buckets(), section.len());
    }

    #[test]
    fn insert_target_on_full_table() {
        let table = Table::new(4, true);
        for key in 0..4 {
            table.insert_unpublished(key, key as u64);
        }

        assert_eq!(table.insert_target(100, hash(100)), None);
        let existing = table.insert_target(2, hash(2));
        assert!(matches!(existing, Some(InsertTarget::Existing(bucket)) if table.key(bucket) == 2));

        // A tombstone is the only place left for a new key
        let bucket = (0..4).find(|b| table.key(*b) == 1).unwrap();
        table.set_state(bucket, BucketState::Tombstone);
        assert_eq!(
            table.insert_target(100, hash(100)),
            Some(InsertTarget::Vacant { bucket, fresh: false })
        );
    }

    #[test]
    fn put_grows_a_full_section() {
        let section = Section::new(4, true);
        for key in 0..64 {
            assert_eq!(put(&section, key, 7), PutOutcome::Inserted(7));
        }
        assert_eq!(put(&section, 63, 8), PutOutcome::Present(7));
        assert_eq!(section.len(), 64);
        assert!((0..64).all(|key| get(&section, key).is_some()));
    }

    #[test]
    fn tombstone_reused_without_new_bucket() {
        let section = Section::new(16, true);

        // Find two keys that collide on their first bucket
        let first = 0i64;
        let start = bucket_index(hash(first), 16);
        let second = (1..10_000i64)
            .find(|k| bucket_index(hash(*k), 16) == start)
            .unwrap();

        put(&section, first, 1);
        put(&section, second, 2);
        assert_eq!(section.used_buckets(), 2);

        // `first` is followed by `second`, so it becomes a tombstone
        assert_eq!(remove(&section, first), Some(1));
        assert_eq!(section.used_buckets(), 2);
        assert_eq!(get(&section, second), Some(2));

        // A new colliding key reuses the tombstone
        let third = (second + 1..20_000i64)
            .find(|k| bucket_index(hash(*k), 16) == start)
            .unwrap();
        put(&section, third, 3);
        assert_eq!(section.used_buckets(), 2);
        assert_eq!(section.len(), 2);
    }

    #[test]
    fn remove_with_expected_value() {
        let section = Section::new(4, true);
        put(&section, 5, 50);

        assert_eq!(section.remove(5, hash(5), Some(49)), None);
        assert_eq!(get(&section, 5), Some(50));
        assert_eq!(section.remove(5, hash(5), Some(50)), Some(50));
        assert_eq!(get(&section, 5), None);
    }

    #[test]
    fn clear_resets_counters() {
        let section = Section::new(8, true);
        for key in 0..5 {
            put(&section, key, 1);
        }
        let capacity = section.capacity();

        section.clear();

        assert_eq!(section.len(), 0);
        assert_eq!(section.used_buckets(), 0);
        assert_eq!(section.capacity(), capacity);
        assert!(section.entries().is_empty());
        assert_eq!(get(&section, 1), None);
    }

    #[test]
    fn entries_skip_dead_buckets() {
        let section = Section::new(16, true);
        for key in 0..8 {
            put(&section, key, key as u64);
        }
        for key in 0..4 {
            remove(&section, key);
        }

        let mut entries = section.entries();
        entries.sort_unstable();
        assert_eq!(entries, vec![(4, 4), (5, 5), (6, 6), (7, 7)]);
    }

    #[test]
    fn keys_only_section() {
        let section = Section::new(4, false);

        assert_eq!(put(&section, 3, 0), PutOutcome::Inserted(0));
        assert_eq!(get(&section, 3), Some(0));
        assert_eq!(put(&section, 3, 0), PutOutcome::Present(0));
        assert_eq!(remove(&section, 3), Some(0));
        assert_eq!(get(&section, 3), None);
    }
}
