//! Key hashing and sizing helpers shared by the map and the set.

use crate::error::{CollectionError, CollectionResult};

/// Multiplier of the 64-bit mixing function.
pub const HASH_MIXER: u64 = 0xc6a4_a793_5bd1_e995;

/// Shift of the 64-bit mixing function.
const HASH_SHIFT: u32 = 47;

/// Fraction of a section's buckets that may be used before it doubles.
pub const FILL_FACTOR: f64 = 0.66;

/// Expected item count used by the default constructors.
pub const DEFAULT_EXPECTED_ITEMS: usize = 256;

/// Section count used by the default constructors.
pub const DEFAULT_SECTIONS: usize = 16;

/// Smallest bucket array a section will allocate.
pub const MIN_SECTION_CAPACITY: usize = 2;

/// Mixes a key into a 64-bit hash.
///
/// The high 32 bits pick the section and the low 32 bits pick the first
/// bucket, so both halves must be well distributed.
#[inline]
#[must_use]
pub fn hash(key: i64) -> u64 {
    let mut h = (key as u64).wrapping_mul(HASH_MIXER);
    h ^= h >> HASH_SHIFT;
    h.wrapping_mul(HASH_MIXER)
}

/// Returns the section a hash belongs to. `sections` is a power of two.
#[inline]
#[must_use]
pub fn section_index(hash: u64, sections: usize) -> usize {
    ((hash >> 32) as usize) & (sections - 1)
}

/// Returns the first bucket to inspect. `capacity` is a power of two.
#[inline]
#[must_use]
pub fn bucket_index(hash: u64, capacity: usize) -> usize {
    (hash as u32 as usize) & (capacity - 1)
}

/// Rounds `n` up to a power of two, never below [`MIN_SECTION_CAPACITY`].
#[must_use]
pub fn align_to_power_of_two(n: usize) -> usize {
    n.max(MIN_SECTION_CAPACITY).next_power_of_two()
}

/// Number of used buckets that triggers a rehash for `capacity`.
#[must_use]
pub fn resize_threshold(capacity: usize) -> usize {
    (capacity as f64 * FILL_FACTOR) as usize
}

/// Checks that `sections` can be used to mask a hash.
///
/// # Errors
///
/// Returns [`CollectionError::InvalidSectionCount`] if `sections` is zero or
/// not a power of two.
pub fn check_sections(sections: usize) -> CollectionResult<()> {
    if sections == 0 || !sections.is_power_of_two() {
        return Err(CollectionError::InvalidSectionCount { sections });
    }
    Ok(())
}

/// Computes the initial per-section capacity for an index.
///
/// Fewer expected items than sections still reserves one item per section.
#[must_use]
pub fn section_capacity(expected_items: usize, sections: usize) -> usize {
    let expected_items = expected_items.max(sections).max(1);
    let per_section = expected_items / sections.max(1);
    align_to_power_of_two((per_section as f64 / FILL_FACTOR) as usize)
}
