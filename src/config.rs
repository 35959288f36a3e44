use crate::error::ConstructionError;

/// Widest neighborhood a bucket bitmap can describe.
pub const MAX_HOP_RANGE: usize = u64::BITS as usize;

/// Runtime configuration of a [`HopscotchTable`](crate::HopscotchTable).
///
/// The geometry fields are fixed for the lifetime of a bucket pool; only a
/// resize replaces them. Construct one with [`TableConfig::default`] and the
/// chainable `with_*` setters:
///
/// ```rust
/// use chop_hash::TableConfig;
///
/// let config = TableConfig::default()
///     .with_segments(4)
///     .with_buckets_per_segment(512)
///     .with_hop_range(32)
///     .with_add_range(512)
///     .with_max_tries(1);
/// assert!(config.validate().is_ok());
/// assert_eq!(config.concurrency_level(), 4);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TableConfig {
    /// Number of independently locked segments. Must be a power of two.
    pub n_segments: usize,
    /// Buckets in each segment. Must be a power of two, at least `hop_range`.
    pub buckets_per_segment: usize,
    /// Width of the neighborhood bitmap, the maximum distance between an
    /// entry and its base bucket.
    pub hop_range: usize,
    /// Maximum forward scan distance when looking for any free bucket.
    pub add_range: usize,
    /// Bound on optimistic read attempts.
    pub max_tries: usize,
    /// Grow and retry instead of reporting
    /// [`CapacityExhausted`](crate::TableError::CapacityExhausted).
    pub auto_resize: bool,
    /// Segment count at which growth switches to enlarging segments.
    pub max_segments: usize,
    /// Upper bound on buckets per segment; growth stops here.
    pub max_buckets_per_segment: usize,
}

impl Default for TableConfig {
    fn default() -> Self {
        Self {
            n_segments: 16,
            buckets_per_segment: 1024,
            hop_range: 32,
            add_range: 512,
            max_tries: 8,
            auto_resize: true,
            max_segments: 256,
            max_buckets_per_segment: 1 << 20,
        }
    }
}

impl TableConfig {
    /// Sets the number of segments.
    pub const fn with_segments(mut self, n_segments: usize) -> Self {
        self.n_segments = n_segments;
        self
    }

    /// Sets the number of buckets per segment.
    pub const fn with_buckets_per_segment(mut self, buckets_per_segment: usize) -> Self {
        self.buckets_per_segment = buckets_per_segment;
        self
    }

    /// Sets the neighborhood width.
    pub const fn with_hop_range(mut self, hop_range: usize) -> Self {
        self.hop_range = hop_range;
        self
    }

    /// Sets the free-bucket scan distance.
    pub const fn with_add_range(mut self, add_range: usize) -> Self {
        self.add_range = add_range;
        self
    }

    /// Sets the optimistic read retry bound.
    pub const fn with_max_tries(mut self, max_tries: usize) -> Self {
        self.max_tries = max_tries;
        self
    }

    /// Enables or disables transparent growth on capacity exhaustion.
    pub const fn with_auto_resize(mut self, auto_resize: bool) -> Self {
        self.auto_resize = auto_resize;
        self
    }

    /// Sets the growth bounds.
    pub const fn with_growth_limits(
        mut self,
        max_segments: usize,
        max_buckets_per_segment: usize,
    ) -> Self {
        self.max_segments = max_segments;
        self.max_buckets_per_segment = max_buckets_per_segment;
        self
    }

    /// Number of writers that can proceed in parallel.
    pub const fn concurrency_level(&self) -> usize {
        self.n_segments
    }

    /// Checks the configuration, reporting the first violated constraint.
    ///
    /// ```rust
    /// use chop_hash::{ConstructionError, TableConfig};
    ///
    /// let config = TableConfig::default().with_segments(7);
    /// assert_eq!(config.validate(), Err(ConstructionError::SegmentsNotPowerOfTwo(7)));
    /// ```
    pub fn validate(&self) -> Result<(), ConstructionError> {
        if !self.n_segments.is_power_of_two() {
            return Err(ConstructionError::SegmentsNotPowerOfTwo(self.n_segments));
        }
        if !self.buckets_per_segment.is_power_of_two() {
            return Err(ConstructionError::BucketsNotPowerOfTwo(
                self.buckets_per_segment,
            ));
        }
        if self.hop_range == 0 || self.hop_range > MAX_HOP_RANGE {
            return Err(ConstructionError::InvalidHopRange {
                hop_range: self.hop_range,
                max: MAX_HOP_RANGE,
            });
        }
        if self.hop_range > self.buckets_per_segment {
            return Err(ConstructionError::HopRangeExceedsSegment {
                hop_range: self.hop_range,
                buckets_per_segment: self.buckets_per_segment,
            });
        }
        if self.add_range == 0 {
            return Err(ConstructionError::ZeroAddRange);
        }
        if self.max_tries == 0 {
            return Err(ConstructionError::ZeroMaxTries);
        }
        Ok(())
    }

    /// The free-bucket scan never needs to look past one full segment.
    #[inline]
    pub(crate) fn effective_add_range(&self, buckets_per_segment: usize) -> usize {
        self.add_range.min(buckets_per_segment)
    }
}
