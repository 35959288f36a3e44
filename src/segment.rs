//! Segments and the bucket pool they partition.
//!
//! A [`Pool`] owns one contiguous run of buckets split into equally sized,
//! circularly addressed segments. Each segment carries its own lock, a
//! mutation timestamp and a live-entry counter. Writers serialize on the
//! segment lock; readers never take it and instead validate their scan
//! against the timestamp.
//!
//! Pools only ever hold key and value pointers taken from shared references
//! that outlive the owning table, so dereferencing a non-null pointer read
//! from any bucket is sound for as long as the table is borrowed.

use alloc::boxed::Box;
use alloc::vec::Vec;
use core::sync::atomic::AtomicU64;
use core::sync::atomic::AtomicUsize;
use core::sync::atomic::Ordering;

use parking_lot::Mutex;
use tracing::trace;

use crate::bucket::Bucket;
use crate::bucket::offsets_below;
use crate::config::TableConfig;
use crate::error::ConstructionError;
use crate::hashing::KeyEquivalent;

/// Why an insert did not place its entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum InsertFailure {
    /// The key is already present.
    Duplicate,
    /// No bucket inside the neighborhood could be freed. Growing may help.
    Exhausted,
    /// The neighborhood is full of entries sharing the key's exact hash.
    /// No amount of growth separates them.
    Saturated,
}

/// Per-segment synchronization state.
pub(crate) struct Segment {
    lock: Mutex<()>,
    timestamp: AtomicU64,
    live: AtomicUsize,
}

impl Segment {
    fn new() -> Self {
        Self {
            lock: Mutex::new(()),
            timestamp: AtomicU64::new(0),
            live: AtomicUsize::new(0),
        }
    }

    #[inline]
    pub(crate) fn live(&self) -> usize {
        self.live.load(Ordering::Relaxed)
    }

    #[inline]
    pub(crate) fn timestamp(&self) -> u64 {
        self.timestamp.load(Ordering::Acquire)
    }

    /// Announces that an entry is about to leave its bucket. Must happen
    /// before the bucket is vacated so a reader that sees the empty bucket
    /// also sees the new timestamp.
    #[inline(always)]
    fn bump(&self) {
        self.timestamp.fetch_add(1, Ordering::Release);
    }
}

/// Shape of a pool: how hashes map onto segments and base buckets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Geometry {
    pub(crate) n_segments: usize,
    pub(crate) buckets_per_segment: usize,
    segment_shift: u32,
}

impl Geometry {
    /// Both counts must be powers of two.
    pub(crate) fn new(n_segments: usize, buckets_per_segment: usize) -> Self {
        debug_assert!(n_segments.is_power_of_two());
        debug_assert!(buckets_per_segment.is_power_of_two());
        Self {
            n_segments,
            buckets_per_segment,
            segment_shift: u64::BITS - n_segments.trailing_zeros(),
        }
    }

    /// The top `log2(n_segments)` bits of the hash. A single segment would
    /// need a 64-bit shift, which `checked_shr` turns into index 0.
    #[inline(always)]
    pub(crate) fn segment_index(&self, hash: u64) -> usize {
        hash.checked_shr(self.segment_shift).unwrap_or(0) as usize
    }

    #[inline(always)]
    pub(crate) fn base_index(&self, hash: u64) -> usize {
        (hash as usize) & (self.buckets_per_segment - 1)
    }

    #[inline]
    pub(crate) fn total_buckets(&self) -> usize {
        self.n_segments * self.buckets_per_segment
    }
}

/// One segment's view of the pool.
pub(crate) struct SegmentRef<'p, K, V> {
    meta: &'p Segment,
    buckets: &'p [Bucket<K, V>],
    mask: usize,
}

impl<'p, K, V> SegmentRef<'p, K, V> {
    /// Bucket at a segment-relative index, wrapping around the segment end.
    #[inline(always)]
    fn bucket(&self, index: usize) -> &'p Bucket<K, V> {
        &self.buckets[index & self.mask]
    }

    /// Circular distance from `from` to `to`.
    #[inline(always)]
    fn distance(&self, from: usize, to: usize) -> usize {
        to.wrapping_sub(from) & self.mask
    }

    /// Neighborhood Search: scans the bitmap of `base` and returns the
    /// segment-relative index of the bucket holding `key`.
    fn search<E>(&self, base: usize, hash: u64, key: &K, eq: &E) -> Option<usize>
    where
        E: KeyEquivalent<K>,
    {
        let mut neighborhood = self.bucket(base).hop_info.candidates();
        while neighborhood != 0 {
            let n_index = neighborhood.trailing_zeros() as usize;
            neighborhood &= neighborhood - 1;

            let slot = (base + n_index) & self.mask;
            let bucket = self.bucket(slot);
            let stored = bucket.key();
            if stored.is_null() || bucket.hash() != hash {
                continue;
            }

            // SAFETY: non-null keys come from references that outlive the
            // pool (see module docs).
            if eq.equivalent(unsafe { &*stored }, key) {
                return Some(slot);
            }
        }

        None
    }

    /// Linear scan for the first free bucket at most `add_range - 1` slots
    /// after `base`. Returns its distance from `base`.
    fn find_free(&self, base: usize, add_range: usize) -> Option<usize> {
        (0..add_range).find(|&dist| !self.bucket(base + dist).is_occupied())
    }

    /// Put under the segment lock.
    fn insert<E>(
        &self,
        base: usize,
        hash: u64,
        key: &K,
        value: *const V,
        eq: &E,
        config: &TableConfig,
    ) -> Result<(), InsertFailure>
    where
        E: KeyEquivalent<K>,
    {
        let hop_range = config.hop_range;
        let add_range = config.effective_add_range(self.buckets.len());
        let _guard = self.meta.lock.lock();

        if self.search(base, hash, key, eq).is_some() {
            return Err(InsertFailure::Duplicate);
        }

        let Some(mut dist) = self.find_free(base, add_range) else {
            trace!(base, add_range, "no free bucket within add range");
            return Err(self.exhaustion(base, hash, hop_range));
        };

        while dist >= hop_range {
            match self.displace(base, dist, hop_range) {
                Some(closer) => dist = closer,
                None => {
                    trace!(base, dist, "no displaceable entry in front of free bucket");
                    return Err(self.exhaustion(base, hash, hop_range));
                }
            }
        }

        self.bucket(base + dist).fill(hash, key, value);
        self.bucket(base).hop_info.set(dist);
        self.meta.live.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn exhaustion(&self, base: usize, hash: u64, hop_range: usize) -> InsertFailure {
        let info = &self.bucket(base).hop_info;
        if !info.is_full(hop_range) {
            return InsertFailure::Exhausted;
        }

        let mut neighborhood = info.candidates();
        while neighborhood != 0 {
            let n_index = neighborhood.trailing_zeros() as usize;
            neighborhood &= neighborhood - 1;
            if self.bucket(base + n_index).hash() != hash {
                return InsertFailure::Exhausted;
            }
        }
        InsertFailure::Saturated
    }

    /// Displacement Engine.
    ///
    /// The free bucket sits `dist >= hop_range` slots after `base`. Looks at
    /// the `hop_range - 1` buckets in front of it, starting with the one
    /// closest to `base`, for an owner with an entry between itself and the
    /// free bucket. The first such entry is moved into the free bucket, and
    /// the distance of the bucket it vacated is returned.
    fn displace(&self, base: usize, dist: usize, hop_range: usize) -> Option<usize> {
        debug_assert!(dist >= hop_range);
        let free = base + dist;

        for gap in (1..hop_range).rev() {
            let owner_dist = dist - gap;
            let owner = self.bucket(base + owner_dist);

            let movable = owner.hop_info.candidates() & offsets_below(gap);
            if movable == 0 {
                continue;
            }

            let n_index = movable.trailing_zeros() as usize;
            let from = base + owner_dist + n_index;
            let src = self.bucket(from);
            debug_assert!(src.is_occupied());
            debug_assert!(!self.bucket(free).is_occupied());
            debug_assert_eq!(self.distance(base + owner_dist, free), gap);

            self.bucket(free).fill_from(src);
            owner.hop_info.set(gap);
            self.meta.bump();
            owner.hop_info.clear(n_index);
            src.vacate();

            return Some(owner_dist + n_index);
        }

        None
    }

    /// Remove under the segment lock. The lock guard drops on every path.
    fn remove<E>(&self, base: usize, hash: u64, key: &K, eq: &E) -> Option<*const V>
    where
        E: KeyEquivalent<K>,
    {
        let _guard = self.meta.lock.lock();

        let slot = self.search(base, hash, key, eq)?;
        let bucket = self.bucket(slot);
        let value = bucket.value();

        self.meta.bump();
        self.bucket(base).hop_info.clear(self.distance(base, slot));
        bucket.vacate();
        self.meta.live.fetch_sub(1, Ordering::Relaxed);

        Some(value)
    }

    /// Optimistic lookup. Takes no lock; a scan that overlaps a displacement
    /// or removal in this segment is retried up to `max_tries` times, after
    /// which the key is reported missing.
    fn get<E>(&self, base: usize, hash: u64, key: &K, eq: &E, max_tries: usize) -> Option<*const V>
    where
        E: KeyEquivalent<K>,
    {
        for _ in 0..max_tries {
            let stamp = self.meta.timestamp();
            match self.search(base, hash, key, eq) {
                Some(slot) => {
                    let value = self.bucket(slot).value();
                    if !value.is_null() && self.meta.timestamp() == stamp {
                        return Some(value);
                    }
                }
                None => {
                    if self.meta.timestamp() == stamp {
                        return None;
                    }
                }
            }
            core::hint::spin_loop();
        }

        None
    }
}

/// The bucket pool and its segments.
pub(crate) struct Pool<K, V> {
    generation: u64,
    geometry: Geometry,
    segments: Box<[Segment]>,
    buckets: Box<[Bucket<K, V>]>,
}

impl<K, V> Pool<K, V> {
    /// Allocates a pool of empty buckets. Allocation failure is reported
    /// rather than aborting; anything allocated before the failure is freed
    /// on return.
    pub(crate) fn allocate(geometry: Geometry, generation: u64) -> Result<Self, ConstructionError> {
        let total = geometry
            .n_segments
            .checked_mul(geometry.buckets_per_segment)
            .ok_or(ConstructionError::AllocationFailed {
                buckets: usize::MAX,
            })?;

        let mut buckets = Vec::new();
        buckets
            .try_reserve_exact(total)
            .map_err(|_| ConstructionError::AllocationFailed { buckets: total })?;
        buckets.extend((0..total).map(|_| Bucket::new()));

        let mut segments = Vec::new();
        segments
            .try_reserve_exact(geometry.n_segments)
            .map_err(|_| ConstructionError::AllocationFailed { buckets: total })?;
        segments.extend((0..geometry.n_segments).map(|_| Segment::new()));

        Ok(Self {
            generation,
            geometry,
            segments: segments.into_boxed_slice(),
            buckets: buckets.into_boxed_slice(),
        })
    }

    #[inline]
    pub(crate) fn generation(&self) -> u64 {
        self.generation
    }

    #[inline]
    pub(crate) fn geometry(&self) -> Geometry {
        self.geometry
    }

    #[cfg(any(test, feature = "stats"))]
    pub(crate) fn segments(&self) -> &[Segment] {
        &self.segments
    }

    fn segment_at(&self, index: usize) -> SegmentRef<'_, K, V> {
        let len = self.geometry.buckets_per_segment;
        SegmentRef {
            meta: &self.segments[index],
            buckets: &self.buckets[index * len..(index + 1) * len],
            mask: len - 1,
        }
    }

    #[inline]
    fn locate(&self, hash: u64) -> (SegmentRef<'_, K, V>, usize) {
        (
            self.segment_at(self.geometry.segment_index(hash)),
            self.geometry.base_index(hash),
        )
    }

    pub(crate) fn insert<E>(
        &self,
        hash: u64,
        key: &K,
        value: *const V,
        eq: &E,
        config: &TableConfig,
    ) -> Result<(), InsertFailure>
    where
        E: KeyEquivalent<K>,
    {
        let (segment, base) = self.locate(hash);
        segment.insert(base, hash, key, value, eq, config)
    }

    pub(crate) fn get<E>(&self, hash: u64, key: &K, eq: &E, max_tries: usize) -> Option<*const V>
    where
        E: KeyEquivalent<K>,
    {
        let (segment, base) = self.locate(hash);
        segment.get(base, hash, key, eq, max_tries)
    }

    pub(crate) fn remove<E>(&self, hash: u64, key: &K, eq: &E) -> Option<*const V>
    where
        E: KeyEquivalent<K>,
    {
        let (segment, base) = self.locate(hash);
        segment.remove(base, hash, key, eq)
    }

    pub(crate) fn count(&self) -> usize {
        self.segments.iter().map(Segment::live).sum()
    }

    /// Re-inserts every live entry into `fresh` with the regular insert path.
    /// The caller must keep all writers of `self` out for the duration.
    /// Returns `false` if some entry did not fit, leaving `self` untouched.
    pub(crate) fn rehash_into<E>(&self, fresh: &Pool<K, V>, eq: &E, config: &TableConfig) -> bool
    where
        E: KeyEquivalent<K>,
    {
        for bucket in self.buckets.iter() {
            let key = bucket.key();
            if key.is_null() {
                continue;
            }

            // SAFETY: non-null keys come from references that outlive the
            // pool, and writers are excluded so the bucket is stable.
            let key = unsafe { &*key };
            match fresh.insert(bucket.hash(), key, bucket.value(), eq, config) {
                Ok(()) => {}
                Err(InsertFailure::Duplicate) => {
                    unreachable!("keys are unique within a pool")
                }
                Err(InsertFailure::Exhausted | InsertFailure::Saturated) => return false,
            }
        }

        debug_assert_eq!(self.count(), fresh.count());
        true
    }

    /// Number of entries living at each neighborhood offset.
    #[cfg(any(test, feature = "stats"))]
    pub(crate) fn probe_counts(&self, hop_range: usize) -> Vec<usize> {
        let mut counts = alloc::vec![0usize; hop_range];
        for bucket in self.buckets.iter() {
            let mut neighborhood = bucket.hop_info.candidates();
            while neighborhood != 0 {
                let n_index = neighborhood.trailing_zeros() as usize;
                neighborhood &= neighborhood - 1;
                counts[n_index] += 1;
            }
        }
        counts
    }

    /// Checks the structural invariants: occupancy matches bitmaps, every
    /// entry sits inside its base's neighborhood, keys are unique, and the
    /// live counters agree with the buckets.
    ///
    /// Only meaningful while no writer is active.
    #[cfg(any(test, feature = "stats"))]
    pub(crate) fn verify<E>(&self, hop_range: usize, eq: &E) -> Result<(), alloc::string::String>
    where
        E: KeyEquivalent<K>,
    {
        use alloc::format;

        use crate::bucket::neighborhood_mask;

        let len = self.geometry.buckets_per_segment;
        let mut entries: Vec<(u64, *const K)> = Vec::new();

        for index in 0..self.geometry.n_segments {
            let segment = self.segment_at(index);
            let mut claimed = alloc::vec![false; len];

            for base in 0..len {
                let neighborhood = segment.bucket(base).hop_info.candidates();
                if neighborhood & !neighborhood_mask(hop_range) != 0 {
                    return Err(format!(
                        "segment {index} bucket {base}: bitmap {neighborhood:#x} exceeds hop range {hop_range}"
                    ));
                }

                let mut bits = neighborhood;
                while bits != 0 {
                    let n_index = bits.trailing_zeros() as usize;
                    bits &= bits - 1;

                    let slot = (base + n_index) & segment.mask;
                    let bucket = segment.bucket(slot);
                    if !bucket.is_occupied() {
                        return Err(format!(
                            "segment {index} bucket {base}: offset {n_index} points at free bucket {slot}"
                        ));
                    }
                    if claimed[slot] {
                        return Err(format!(
                            "segment {index} bucket {slot} is claimed by more than one bitmap"
                        ));
                    }
                    claimed[slot] = true;

                    let hash = bucket.hash();
                    if self.geometry.base_index(hash) != base
                        || self.geometry.segment_index(hash) != index
                    {
                        return Err(format!(
                            "segment {index} bucket {slot}: entry with hash {hash:#x} is claimed by base {base}"
                        ));
                    }
                }
            }

            let mut occupied = 0;
            for (slot, &was_claimed) in claimed.iter().enumerate() {
                let bucket = segment.bucket(slot);
                if bucket.is_occupied() {
                    occupied += 1;
                    if !was_claimed {
                        return Err(format!(
                            "segment {index} bucket {slot} is occupied but unclaimed"
                        ));
                    }
                    entries.push((bucket.hash(), bucket.key()));
                }
            }

            if segment.meta.live() != occupied {
                return Err(format!(
                    "segment {index}: live count {} but {occupied} occupied buckets",
                    segment.meta.live()
                ));
            }
        }

        entries.sort_unstable_by_key(|&(hash, _)| hash);
        for group in entries.chunk_by(|a, b| a.0 == b.0) {
            for (i, &(hash, a)) in group.iter().enumerate() {
                for &(_, b) in &group[i + 1..] {
                    // SAFETY: both keys were read from occupied buckets.
                    if eq.equivalent(unsafe { &*a }, unsafe { &*b }) {
                        return Err(format!("duplicate key with hash {hash:#x}"));
                    }
                }
            }
        }

        Ok(())
    }
}
