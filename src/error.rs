use core::fmt;

/// Reasons a [`HopscotchTable`](crate::HopscotchTable) could not be built.
///
/// Construction is all-or-nothing: when one of these is returned every
/// buffer and lock allocated so far has already been released.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConstructionError {
    /// The segment count is not a power of two.
    SegmentsNotPowerOfTwo(usize),
    /// The number of buckets per segment is not a power of two.
    BucketsNotPowerOfTwo(usize),
    /// The neighborhood width is zero or wider than the bitmap.
    InvalidHopRange {
        /// Requested neighborhood width.
        hop_range: usize,
        /// Widest neighborhood the bitmap can describe.
        max: usize,
    },
    /// The neighborhood is wider than a segment, so offsets would alias.
    HopRangeExceedsSegment {
        /// Requested neighborhood width.
        hop_range: usize,
        /// Buckets available in each segment.
        buckets_per_segment: usize,
    },
    /// The free-bucket scan distance is zero.
    ZeroAddRange,
    /// Optimistic reads need at least one attempt.
    ZeroMaxTries,
    /// The bucket pool could not be allocated.
    AllocationFailed {
        /// Number of buckets that were requested.
        buckets: usize,
    },
}

impl fmt::Display for ConstructionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConstructionError::SegmentsNotPowerOfTwo(n) => {
                write!(f, "segment count {} is not a power of two", n)
            }
            ConstructionError::BucketsNotPowerOfTwo(n) => {
                write!(f, "buckets per segment {} is not a power of two", n)
            }
            ConstructionError::InvalidHopRange { hop_range, max } => {
                write!(f, "hop range {} must be within 1..={}", hop_range, max)
            }
            ConstructionError::HopRangeExceedsSegment {
                hop_range,
                buckets_per_segment,
            } => {
                write!(
                    f,
                    "hop range {} exceeds the {} buckets of a segment",
                    hop_range, buckets_per_segment
                )
            }
            ConstructionError::ZeroAddRange => write!(f, "add range must be at least 1"),
            ConstructionError::ZeroMaxTries => write!(f, "max tries must be at least 1"),
            ConstructionError::AllocationFailed { buckets } => {
                write!(f, "failed to allocate a pool of {} buckets", buckets)
            }
        }
    }
}

impl std::error::Error for ConstructionError {}

/// Failures reported by [`put`](crate::HopscotchTable::put) and
/// [`resize`](crate::HopscotchTable::resize).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableError {
    /// The key is already present; the table was not modified.
    DuplicateKey,
    /// No bucket within the neighborhood could be freed for the key, and the
    /// table could not (or was not allowed to) grow.
    CapacityExhausted,
    /// Growing the table failed to allocate the new bucket pool.
    ResizeFailed {
        /// Number of buckets the new pool would have held.
        requested_buckets: usize,
    },
}

impl fmt::Display for TableError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TableError::DuplicateKey => write!(f, "key is already present"),
            TableError::CapacityExhausted => {
                write!(f, "no free bucket within the neighborhood and no room to grow")
            }
            TableError::ResizeFailed { requested_buckets } => {
                write!(
                    f,
                    "failed to allocate {} buckets while resizing",
                    requested_buckets
                )
            }
        }
    }
}

impl std::error::Error for TableError {}
