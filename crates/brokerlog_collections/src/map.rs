//! Concurrent map from `i64` keys to word-sized values.

use crate::error::CollectionResult;
use crate::hash::{
    check_sections, hash, section_capacity, section_index, DEFAULT_EXPECTED_ITEMS,
    DEFAULT_SECTIONS,
};
use crate::section::{PutOutcome, Section};
use crate::set::ConcurrentLongHashSet;
use std::fmt;
use std::marker::PhantomData;

/// A value that fits in one 64-bit word.
///
/// Map buckets store values in atomics so that readers can load them
/// optimistically; any `Copy` type with a lossless word encoding can be
/// stored.
pub trait LongValue: Copy + Send + Sync + 'static {
    /// Encodes the value as a word.
    fn into_word(self) -> u64;

    /// Decodes a word produced by [`LongValue::into_word`].
    fn from_word(word: u64) -> Self;
}

macro_rules! impl_long_value {
    ($($ty:ty),* $(,)?) => {
        $(
            impl LongValue for $ty {
                #[inline]
                fn into_word(self) -> u64 {
                    self as u64
                }

                #[inline]
                fn from_word(word: u64) -> Self {
                    word as $ty
                }
            }
        )*
    };
}

impl_long_value!(u64, i64, u32, i32, u16, i16, u8, i8, usize, isize);

/// Map from `i64` to a word-sized value.
///
/// Provides the usual concurrent map operations with two differences from a
/// `Mutex<HashMap<i64, V>>`:
/// - No per-entry allocation: open addressing with linear probing
/// - Lock striping: keys are spread over independently locked sections, and
///   lookups validate an optimistic read instead of blocking writers
///
/// Every `i64` is a valid key; bucket state is tracked separately from the
/// key.
///
/// # Example
///
/// ```rust
/// use brokerlog_collections::ConcurrentLongHashMap;
///
/// let map: ConcurrentLongHashMap<u64> = ConcurrentLongHashMap::new();
/// assert_eq!(map.put(1, 10), None);
/// assert_eq!(map.put(1, 11), Some(10));
/// assert_eq!(map.get(1), Some(11));
/// assert_eq!(map.remove(1), Some(11));
/// assert!(map.is_empty());
/// ```
pub struct ConcurrentLongHashMap<V> {
    sections: Box<[Section]>,
    _value: PhantomData<fn() -> V>,
}

impl<V: LongValue> ConcurrentLongHashMap<V> {
    /// Creates a map sized for 256 items over 16 sections.
    #[must_use]
    pub fn new() -> Self {
        Self::with_expected_items(DEFAULT_EXPECTED_ITEMS)
    }

    /// Creates a map sized for `expected_items` over 16 sections.
    #[must_use]
    pub fn with_expected_items(expected_items: usize) -> Self {
        Self::build(expected_items, DEFAULT_SECTIONS)
    }

    /// Creates a map with an explicit section count.
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
                .map(|_| Section::new(capacity, true))
                .collect(),
            _value: PhantomData,
        }
    }

    #[inline]
    fn section(&self, key_hash: u64) -> &Section {
        &self.sections[section_index(key_hash, self.sections.len())]
    }

    /// Returns the value for `key`.
    pub fn get(&self, key: i64) -> Option<V> {
        let h = hash(key);
        self.section(h).get(key, h).map(V::from_word)
    }

    /// Returns true if `key` is present.
    pub fn contains_key(&self, key: i64) -> bool {
        self.get(key).is_some()
    }

    /// Stores `value` for `key` and returns the previous value.
    pub fn put(&self, key: i64, value: V) -> Option<V> {
        let h = hash(key);
        match self.section(h).put(key, h, false, |_| value.into_word()) {
            PutOutcome::Inserted(_) => None,
            PutOutcome::Present(previous) => Some(V::from_word(previous)),
        }
    }

    /// Stores `value` only if `key` is absent. Returns the value already
    /// present, or `None` if `value` was stored.
    pub fn put_if_absent(&self, key: i64, value: V) -> Option<V> {
        let h = hash(key);
        match self.section(h).put(key, h, true, |_| value.into_word()) {
            PutOutcome::Inserted(_) => None,
            PutOutcome::Present(existing) => Some(V::from_word(existing)),
        }
    }

    /// Returns the value for `key`, inserting `provider(key)` if absent.
    ///
    /// `provider` runs while the key's section is locked and must not access
    /// this map.
    pub fn compute_if_absent(&self, key: i64, provider: impl FnOnce(i64) -> V) -> V {
        let h = hash(key);
        match self
            .section(h)
            .put(key, h, true, |key| provider(key).into_word())
        {
            PutOutcome::Inserted(word) | PutOutcome::Present(word) => V::from_word(word),
        }
    }

    /// Removes `key` and returns its value.
    pub fn remove(&self, key: i64) -> Option<V> {
        let h = hash(key);
        self.section(h).remove(key, h, None).map(V::from_word)
    }

    /// Removes `key` only if it maps to `expected`.
    pub fn remove_if(&self, key: i64, expected: V) -> bool {
        let h = hash(key);
        self.section(h)
            .remove(key, h, Some(expected.into_word()))
            .is_some()
    }

    /// Removes all entries. Section capacities are kept.
    pub fn clear(&self) {
        for section in self.sections.iter() {
            section.clear();
        }
    }

    /// Calls `f` for every entry.
    ///
    /// Each section is copied consistently before `f` runs for its entries,
    /// so `f` may modify the map. Sections are visited one after another;
    /// the whole map is not a single snapshot.
    pub fn for_each(&self, mut f: impl FnMut(i64, V)) {
        for section in self.sections.iter() {
            for (key, word) in section.entries() {
                f(key, V::from_word(word));
            }
        }
    }

    /// Returns a copy of all keys.
    #[must_use]
    pub fn keys(&self) -> Vec<i64> {
        let mut keys = Vec::with_capacity(self.len());
        self.for_each(|key, _| keys.push(key));
        keys
    }

    /// Returns a copy of all values.
    #[must_use]
    pub fn values(&self) -> Vec<V> {
        let mut values = Vec::with_capacity(self.len());
        self.for_each(|_, value| values.push(value));
        values
    }

    /// Copies the non-negative keys into a new set.
    #[must_use]
    pub fn keys_set(&self) -> ConcurrentLongHashSet {
        let set = ConcurrentLongHashSet::with_expected_items(self.len());
        self.for_each(|key, _| {
            set.add(key);
        });
        set
    }

    /// Number of entries. Best effort while writers are active.
    #[must_use]
    pub fn len(&self) -> usize {
        self.sections.iter().map(Section::len).sum()
    }

    /// Returns true if no section holds an entry.
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

    /// Number of sections.
    #[must_use]
    pub fn section_count(&self) -> usize {
        self.sections.len()
    }
}

impl<V: LongValue> Default for ConcurrentLongHashMap<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V: LongValue> fmt::Debug for ConcurrentLongHashMap<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConcurrentLongHashMap")
            .field("sections", &self.sections.len())
            .field("len", &self.len())
            .field("capacity", &self.capacity())
            .finish_non_exhaustive()
    }
}
