//! Bucket slots and neighborhood bitmaps.
//!
//! Every field is atomic so optimistic readers can scan buckets while a
//! writer holding the segment lock rearranges them. Writers publish a slot by
//! storing hash and value before the key; readers load the key first and
//! treat a null key as a free slot.

use core::ptr;
use core::sync::atomic::AtomicPtr;
use core::sync::atomic::AtomicU64;
use core::sync::atomic::Ordering;

/// Neighborhood bitmap of a base bucket.
///
/// Bit `i` (least significant first) is set when the bucket `i` slots after
/// the base, within the same segment, holds an entry whose base is this
/// bucket. Bit 0 is the base bucket itself.
pub(crate) struct HopInfo {
    neighbors: AtomicU64,
}

impl HopInfo {
    const fn new() -> Self {
        Self {
            neighbors: AtomicU64::new(0),
        }
    }

    /// Snapshot of the occupied offsets.
    #[inline(always)]
    pub(crate) fn candidates(&self) -> u64 {
        self.neighbors.load(Ordering::Acquire)
    }

    /// Marks offset `n_index` as owned by this base. Caller holds the segment
    /// lock.
    #[inline(always)]
    pub(crate) fn set(&self, n_index: usize) {
        debug_assert!(n_index < u64::BITS as usize);
        let prev = self.neighbors.fetch_or(1 << n_index, Ordering::Release);
        debug_assert!(prev & (1 << n_index) == 0);
    }

    /// Clears offset `n_index`. Caller holds the segment lock.
    #[inline(always)]
    pub(crate) fn clear(&self, n_index: usize) {
        debug_assert!(n_index < u64::BITS as usize);
        let prev = self.neighbors.fetch_and(!(1 << n_index), Ordering::Release);
        debug_assert!(prev & (1 << n_index) != 0);
    }

    /// Whether every offset of a `hop_range` wide neighborhood is taken.
    #[inline]
    pub(crate) fn is_full(&self, hop_range: usize) -> bool {
        self.candidates() == neighborhood_mask(hop_range)
    }
}

/// Bitmap with the low `hop_range` bits set.
#[inline(always)]
pub(crate) fn neighborhood_mask(hop_range: usize) -> u64 {
    debug_assert!(hop_range >= 1 && hop_range <= u64::BITS as usize);
    u64::MAX >> (u64::BITS as usize - hop_range)
}

/// Offsets strictly below `limit`.
#[inline(always)]
pub(crate) fn offsets_below(limit: usize) -> u64 {
    if limit >= u64::BITS as usize {
        u64::MAX
    } else {
        (1u64 << limit) - 1
    }
}

/// One slot of the bucket pool.
///
/// The key and value pointers always come from shared references whose
/// referents outlive the owning table; the table never writes through them or
/// frees them.
pub(crate) struct Bucket<K, V> {
    pub(crate) hop_info: HopInfo,
    hash: AtomicU64,
    key: AtomicPtr<K>,
    value: AtomicPtr<V>,
}

impl<K, V> Bucket<K, V> {
    pub(crate) const fn new() -> Self {
        Self {
            hop_info: HopInfo::new(),
            hash: AtomicU64::new(0),
            key: AtomicPtr::new(ptr::null_mut()),
            value: AtomicPtr::new(ptr::null_mut()),
        }
    }

    /// Key pointer of the occupant, null when the bucket is free.
    #[inline(always)]
    pub(crate) fn key(&self) -> *const K {
        self.key.load(Ordering::Acquire)
    }

    #[inline(always)]
    pub(crate) fn value(&self) -> *const V {
        self.value.load(Ordering::Acquire)
    }

    #[inline(always)]
    pub(crate) fn hash(&self) -> u64 {
        self.hash.load(Ordering::Acquire)
    }

    #[inline(always)]
    pub(crate) fn is_occupied(&self) -> bool {
        !self.key().is_null()
    }

    /// Publishes an occupant. The key is stored last so a reader that sees it
    /// also sees the matching hash and value.
    #[inline]
    pub(crate) fn fill(&self, hash: u64, key: *const K, value: *const V) {
        debug_assert!(!key.is_null() && !value.is_null());
        self.hash.store(hash, Ordering::Release);
        self.value.store(value.cast_mut(), Ordering::Release);
        self.key.store(key.cast_mut(), Ordering::Release);
    }

    /// Copies the occupant of `src` into this (free) bucket.
    #[inline]
    pub(crate) fn fill_from(&self, src: &Bucket<K, V>) {
        self.fill(src.hash(), src.key(), src.value());
    }

    /// Marks the bucket free. The key goes first so the slot reads as free
    /// before its value disappears.
    #[inline]
    pub(crate) fn vacate(&self) {
        self.key.store(ptr::null_mut(), Ordering::Release);
        self.value.store(ptr::null_mut(), Ordering::Release);
        self.hash.store(0, Ordering::Release);
    }
}
