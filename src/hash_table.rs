use core::fmt;
use core::hash::Hash;
use core::marker::PhantomData;
use core::sync::atomic::Ordering;

use crossbeam_epoch::Atomic;
use crossbeam_epoch::Guard;
use crossbeam_epoch::Owned;
use crossbeam_epoch as epoch;
use parking_lot::RwLock;
use tracing::debug;
use tracing::info;
use tracing::warn;

use crate::config::TableConfig;
use crate::error::ConstructionError;
use crate::error::TableError;
use crate::hashing::BuildKeyHasher;
use crate::hashing::DefaultHashBuilder;
use crate::hashing::KeyEq;
use crate::hashing::KeyEquivalent;
use crate::hashing::KeyHasher;
use crate::segment::Geometry;
use crate::segment::InsertFailure;
use crate::segment::Pool;

/// Snapshot of table utilization.
///
/// Available with the `stats` feature.
#[cfg(any(test, feature = "stats"))]
#[derive(Debug, Clone)]
pub struct DebugStats {
    /// Number of live entries
    pub populated: usize,
    /// Total number of buckets in the current pool
    pub total_buckets: usize,
    /// Number of segments
    pub segments: usize,
    /// Buckets in each segment
    pub buckets_per_segment: usize,
    /// Neighborhood width
    pub hop_range: usize,
    /// Fraction of buckets occupied (populated / total_buckets)
    pub load_factor: f64,
    /// Live entries per segment
    pub segment_live: alloc::vec::Vec<usize>,
    /// Mutation timestamp per segment
    pub segment_timestamps: alloc::vec::Vec<u64>,
    /// How many times the pool has been replaced by a resize
    pub generation: u64,
}

#[cfg(any(test, feature = "stats"))]
impl DebugStats {
    /// Pretty-print the statistics to stdout.
    pub fn print(&self) {
        println!("=== Hopscotch Table Statistics ===");
        println!(
            "Population: {}/{} buckets ({:.2}% load factor)",
            self.populated,
            self.total_buckets,
            self.load_factor * 100.0
        );
        println!(
            "Geometry: {} segments x {} buckets, hop range {}",
            self.segments, self.buckets_per_segment, self.hop_range
        );
        println!("Resizes: {}", self.generation);

        let busiest = self.segment_live.iter().copied().max().unwrap_or(0);
        let idlest = self.segment_live.iter().copied().min().unwrap_or(0);
        println!("Segment population: min {} / max {}", idlest, busiest);
        println!(
            "Displacements + removals: {}",
            self.segment_timestamps.iter().sum::<u64>()
        );
    }
}

/// A segment-concurrent hopscotch hash table over borrowed keys and values.
///
/// The table stores `&'a K` and `&'a V` and never copies, drops or frees
/// them, so every payload must outlive the table. `get` and `remove` return
/// the stored `&'a V`.
///
/// Keys map to one of `n_segments` segments by the high bits of their hash
/// and to a base bucket inside it by the low bits. Each entry lives within
/// `hop_range` buckets of its base. Writers lock only their segment; readers
/// take no lock and retry a bounded number of times if a writer moved
/// entries under them, so a `get` that races heavy writes to the same segment
/// may report a present key as missing.
///
/// ## Example
///
/// ```rust
/// use chop_hash::{HopscotchTable, TableConfig, TableError};
///
/// let keys = [String::from("John Doe"), String::from("Ola Normann")];
/// let values = ["v1", "v2"];
///
/// let config = TableConfig::default()
///     .with_segments(4)
///     .with_buckets_per_segment(512);
/// let table = HopscotchTable::with_config(config).unwrap();
///
/// table.put(&keys[0], &values[0]).unwrap();
/// table.put(&keys[1], &values[1]).unwrap();
/// assert_eq!(table.put(&keys[0], &values[1]), Err(TableError::DuplicateKey));
///
/// assert_eq!(table.get(&keys[0]), Some(&"v1"));
/// assert_eq!(table.remove(&keys[1]), Some(&"v2"));
/// assert_eq!(table.count(), 1);
/// ```
pub struct HopscotchTable<'a, K, V, H = BuildKeyHasher<DefaultHashBuilder>, E = KeyEq> {
    pool: Atomic<Pool<K, V>>,
    /// Held shared by writers, exclusively by resize.
    resize_lock: RwLock<()>,
    config: TableConfig,
    hasher: H,
    eq: E,
    _payload: PhantomData<(&'a K, &'a V)>,
}

impl<'a, K, V> HopscotchTable<'a, K, V>
where
    K: Hash + Eq,
{
    /// Creates a table hashing keys with [`DefaultHashBuilder`] and comparing
    /// them with [`Eq`].
    pub fn with_config(config: TableConfig) -> Result<Self, ConstructionError> {
        Self::new(config, BuildKeyHasher(DefaultHashBuilder::default()), KeyEq)
    }
}

impl<'a, K, V, H, E> HopscotchTable<'a, K, V, H, E> {
    /// Current pool. Tied to both the guard and the table so it cannot
    /// outlive either.
    #[inline]
    fn current<'g>(&'g self, guard: &'g Guard) -> &'g Pool<K, V> {
        // SAFETY: the pointer is never null, and a replaced pool is only
        // destroyed after every guard pinned before the swap is dropped.
        unsafe { self.pool.load(Ordering::Acquire, guard).deref() }
    }

    /// Returns the total number of live entries across all segments.
    ///
    /// Segments are summed one after another without a global lock, so under
    /// concurrent writes the result is a best-effort snapshot.
    pub fn count(&self) -> usize {
        let guard = &epoch::pin();
        self.current(guard).count()
    }

    /// Same as [`count`](Self::count).
    pub fn len(&self) -> usize {
        self.count()
    }

    /// Returns `true` when the table holds no entries.
    pub fn is_empty(&self) -> bool {
        self.count() == 0
    }

    /// Total number of buckets in the current pool.
    pub fn capacity(&self) -> usize {
        let guard = &epoch::pin();
        self.current(guard).geometry().total_buckets()
    }

    /// Number of segments in the current pool. Grows with resizes.
    pub fn segment_count(&self) -> usize {
        let guard = &epoch::pin();
        self.current(guard).geometry().n_segments
    }

    /// Buckets per segment in the current pool. Grows with resizes.
    pub fn buckets_per_segment(&self) -> usize {
        let guard = &epoch::pin();
        self.current(guard).geometry().buckets_per_segment
    }

    /// The configuration the table was built with. Geometry fields describe
    /// the initial pool; see [`segment_count`](Self::segment_count) and
    /// [`buckets_per_segment`](Self::buckets_per_segment) for the current one.
    pub fn config(&self) -> &TableConfig {
        &self.config
    }

    /// Next pool shape: segments double first, then buckets per segment.
    fn next_geometry(&self, current: Geometry) -> Option<Geometry> {
        if let Some(n_segments) = current.n_segments.checked_mul(2)
            && n_segments <= self.config.max_segments
        {
            return Some(Geometry::new(n_segments, current.buckets_per_segment));
        }

        current
            .buckets_per_segment
            .checked_mul(2)
            .filter(|&bps| bps <= self.config.max_buckets_per_segment)
            .map(|bps| Geometry::new(current.n_segments, bps))
    }
}

impl<'a, K, V, H, E> HopscotchTable<'a, K, V, H, E>
where
    H: KeyHasher<K>,
    E: KeyEquivalent<K>,
{
    /// Creates a table with an explicit hash function and key equality.
    ///
    /// Fails without leaking anything if the configuration is invalid or the
    /// bucket pool cannot be allocated.
    ///
    /// ```rust
    /// use chop_hash::{ConstructionError, HopscotchTable, KeyEq, TableConfig};
    ///
    /// let identity = |k: &u64| *k;
    /// let bad = TableConfig::default().with_segments(7);
    /// let result = HopscotchTable::<u64, u64, _, _>::new(bad, identity, KeyEq);
    /// assert_eq!(result.err(), Some(ConstructionError::SegmentsNotPowerOfTwo(7)));
    /// ```
    pub fn new(config: TableConfig, hasher: H, eq: E) -> Result<Self, ConstructionError> {
        config.validate()?;

        let geometry = Geometry::new(config.n_segments, config.buckets_per_segment);
        let pool = Pool::allocate(geometry, 0)?;
        debug!(
            segments = config.n_segments,
            buckets_per_segment = config.buckets_per_segment,
            hop_range = config.hop_range,
            add_range = config.add_range,
            max_tries = config.max_tries,
            "hopscotch table created"
        );

        Ok(Self {
            pool: Atomic::new(pool),
            resize_lock: RwLock::new(()),
            config,
            hasher,
            eq,
            _payload: PhantomData,
        })
    }

    /// Inserts `key` mapped to `value`.
    ///
    /// Fails with [`TableError::DuplicateKey`] if the key is present; the
    /// table is left unchanged. When no bucket within the key's neighborhood
    /// can be freed the table grows and retries, unless `auto_resize` is off
    /// or the growth limits are reached, in which case
    /// [`TableError::CapacityExhausted`] is returned.
    pub fn put(&self, key: &'a K, value: &'a V) -> Result<(), TableError> {
        let hash = self.hasher.hash_key(key);

        loop {
            let generation = {
                let _writer = self.resize_lock.read();
                let guard = &epoch::pin();
                let pool = self.current(guard);

                match pool.insert(hash, key, value, &self.eq, &self.config) {
                    Ok(()) => return Ok(()),
                    Err(InsertFailure::Duplicate) => return Err(TableError::DuplicateKey),
                    Err(InsertFailure::Saturated) => {
                        debug!(hash, "neighborhood saturated by identical hashes");
                        return Err(TableError::CapacityExhausted);
                    }
                    Err(InsertFailure::Exhausted) => pool.generation(),
                }
            };

            if !self.config.auto_resize {
                return Err(TableError::CapacityExhausted);
            }
            self.grow_from(generation)?;
        }
    }

    /// Looks up the value stored for `key`. Never blocks.
    ///
    /// Returns `None` for absent keys, and also for a present key if every
    /// one of `max_tries` attempts overlapped a displacement or removal in
    /// its segment.
    pub fn get(&self, key: &K) -> Option<&'a V> {
        let hash = self.hasher.hash_key(key);
        let guard = &epoch::pin();
        let value = self
            .current(guard)
            .get(hash, key, &self.eq, self.config.max_tries)?;

        // SAFETY: value pointers are only ever created from `&'a V`.
        Some(unsafe { &*value })
    }

    /// Returns `true` if [`get`](Self::get) finds `key`.
    pub fn contains_key(&self, key: &K) -> bool {
        self.get(key).is_some()
    }

    /// Removes `key`, handing back the value it mapped to.
    pub fn remove(&self, key: &K) -> Option<&'a V> {
        let hash = self.hasher.hash_key(key);
        let _writer = self.resize_lock.read();
        let guard = &epoch::pin();
        let value = self.current(guard).remove(hash, key, &self.eq)?;

        // SAFETY: value pointers are only ever created from `&'a V`.
        Some(unsafe { &*value })
    }

    /// Grows the table by one step, the same step `put` takes when it runs
    /// out of room.
    ///
    /// Fails with [`TableError::CapacityExhausted`] once the configured
    /// growth limits are reached, or [`TableError::ResizeFailed`] if the new
    /// pool cannot be allocated. The table is unchanged on failure.
    pub fn resize(&self) -> Result<(), TableError> {
        let generation = {
            let guard = &epoch::pin();
            self.current(guard).generation()
        };
        self.grow_from(generation)
    }

    /// Replaces the pool observed at `generation` with a larger one. Returns
    /// immediately if another thread already replaced it.
    fn grow_from(&self, generation: u64) -> Result<(), TableError> {
        let _exclusive = self.resize_lock.write();
        let guard = &epoch::pin();
        let old = self.current(guard);
        if old.generation() != generation {
            return Ok(());
        }

        let mut geometry = old.geometry();
        loop {
            let Some(next) = self.next_geometry(geometry) else {
                warn!(
                    segments = geometry.n_segments,
                    buckets_per_segment = geometry.buckets_per_segment,
                    "growth limit reached"
                );
                return Err(TableError::CapacityExhausted);
            };
            geometry = next;

            debug!(
                segments = geometry.n_segments,
                buckets_per_segment = geometry.buckets_per_segment,
                live = old.count(),
                "resizing"
            );

            let fresh = Pool::allocate(geometry, generation + 1).map_err(|_| {
                TableError::ResizeFailed {
                    requested_buckets: geometry.total_buckets(),
                }
            })?;

            if !old.rehash_into(&fresh, &self.eq, &self.config) {
                debug!("entries did not fit into resized pool, growing further");
                continue;
            }

            let retired = self.pool.swap(Owned::new(fresh), Ordering::AcqRel, guard);
            // SAFETY: the old pool is unreachable for new readers; readers
            // still pinned to it keep it alive until their guards drop.
            unsafe { guard.defer_destroy(retired) };

            info!(
                segments = geometry.n_segments,
                buckets_per_segment = geometry.buckets_per_segment,
                generation = generation + 1,
                "resize committed"
            );
            return Ok(());
        }
    }

    /// Checks the structural invariants of the current pool: bitmaps and
    /// occupancy agree, entries sit within `hop_range` of their base, keys
    /// are unique, and live counters are exact.
    ///
    /// Results are only meaningful while no writer is active.
    ///
    /// Available with the `stats` feature.
    #[cfg(any(test, feature = "stats"))]
    pub fn verify_layout(&self) -> Result<(), alloc::string::String> {
        let guard = &epoch::pin();
        self.current(guard).verify(self.config.hop_range, &self.eq)
    }
}

#[cfg(any(test, feature = "stats"))]
impl<'a, K, V, H, E> HopscotchTable<'a, K, V, H, E> {
    /// Number of entries at each neighborhood offset from their base bucket.
    /// Index 0 counts entries sitting in their base bucket.
    ///
    /// Available with the `stats` feature.
    pub fn probe_histogram(&self) -> alloc::vec::Vec<usize> {
        let guard = &epoch::pin();
        self.current(guard).probe_counts(self.config.hop_range)
    }

    /// Returns utilization statistics for the current pool.
    ///
    /// Available with the `stats` feature.
    pub fn debug_stats(&self) -> DebugStats {
        let guard = &epoch::pin();
        let pool = self.current(guard);
        let geometry = pool.geometry();

        let segment_live: alloc::vec::Vec<usize> =
            pool.segments().iter().map(|s| s.live()).collect();
        let populated = segment_live.iter().sum();
        let total_buckets = geometry.total_buckets();

        DebugStats {
            populated,
            total_buckets,
            segments: geometry.n_segments,
            buckets_per_segment: geometry.buckets_per_segment,
            hop_range: self.config.hop_range,
            load_factor: populated as f64 / total_buckets as f64,
            segment_live,
            segment_timestamps: pool.segments().iter().map(|s| s.timestamp()).collect(),
            generation: pool.generation(),
        }
    }

    /// Pretty-prints the probe-length histogram horizontally using stdout.
    ///
    /// Available with the `stats` feature.
    pub fn print_probe_histogram(&self) {
        let hist = self.probe_histogram();
        let max = hist.iter().copied().max().unwrap_or(0);
        if max == 0 {
            println!("probe histogram: empty");
            return;
        }

        let max_bar = 60usize;
        let total_units = max_bar * 8;
        println!("probe histogram ({} entries):", hist.iter().sum::<usize>());

        let make_bar = |count: usize| -> alloc::string::String {
            if count == 0 {
                return alloc::string::String::new();
            }
            let units = (count as u128 * total_units as u128).div_ceil(max as u128) as usize;
            let mut bar = "█".repeat(units / 8);
            match units % 8 {
                1 => bar.push('▏'),
                2 => bar.push('▎'),
                3 => bar.push('▍'),
                4 => bar.push('▌'),
                5 => bar.push('▋'),
                6 => bar.push('▊'),
                7 => bar.push('▉'),
                _ => {}
            }
            bar
        };

        let last = hist.iter().rposition(|&c| c != 0).unwrap_or(0);
        for (offset, &count) in hist.iter().enumerate().take(last + 1) {
            println!("{:>2} | {} ({})", offset, make_bar(count), count);
        }
    }
}

impl<K, V, H, E> fmt::Debug for HopscotchTable<'_, K, V, H, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let guard = &epoch::pin();
        let pool = self.current(guard);
        let geometry = pool.geometry();
        f.debug_struct("HopscotchTable")
            .field("segments", &geometry.n_segments)
            .field("buckets_per_segment", &geometry.buckets_per_segment)
            .field("hop_range", &self.config.hop_range)
            .field("count", &pool.count())
            .field("generation", &pool.generation())
            .finish()
    }
}

impl<K, V, H, E> Drop for HopscotchTable<'_, K, V, H, E> {
    fn drop(&mut self) {
        // SAFETY: `&mut self` means no thread can still reach the pool
        // through this table. Retired pools are owned by the epoch collector.
        unsafe {
            let pool = self.pool.load(Ordering::Relaxed, epoch::unprotected());
            if !pool.is_null() {
                drop(pool.into_owned());
            }
        }
    }
}
