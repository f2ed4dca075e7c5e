//! Lock-free latency histogram and feed counter panel.
//!
//! [`LatencyHistogram::record`] is the only operation on the hot path: one
//! relaxed increment into a power-of-two bucket plus relaxed min/max/sum
//! updates, no locks anywhere. Readers (`percentile`, the accessors) see
//! an eventually consistent snapshot — each word is individually atomic
//! and nothing more is promised, which is all a once-a-second stats
//! printer needs.
//!
//! Buckets are logarithmic in microseconds: bucket 0 holds sub-microsecond
//! samples, bucket `i` holds (2^(i-1), 2^i] µs, and anything beyond the
//! last boundary accumulates in the top bucket.

use crossbeam_utils::CachePadded;
use std::sync::atomic::{AtomicU64, Ordering};

/// Number of logarithmic buckets; the top one covers everything from
/// about 2^30 µs (~18 minutes) up.
pub const NUM_BUCKETS: usize = 32;

/// Lock-free power-of-two-bucketed latency histogram.
pub struct LatencyHistogram {
    buckets: [AtomicU64; NUM_BUCKETS],
    total_count: CachePadded<AtomicU64>,
    min: CachePadded<AtomicU64>,
    max: CachePadded<AtomicU64>,
    sum: CachePadded<AtomicU64>,
}

impl LatencyHistogram {
    pub fn new() -> Self {
        Self {
            buckets: [const { AtomicU64::new(0) }; NUM_BUCKETS],
            total_count: CachePadded::new(AtomicU64::new(0)),
            min: CachePadded::new(AtomicU64::new(u64::MAX)),
            max: CachePadded::new(AtomicU64::new(0)),
            sum: CachePadded::new(AtomicU64::new(0)),
        }
    }

    /// Records one latency sample in nanoseconds. Constant time.
    #[inline(always)]
    pub fn record(&self, latency_ns: u64) {
        let bucket = Self::bucket_index(latency_ns);
        self.buckets[bucket].fetch_add(1, Ordering::Relaxed);
        self.total_count.fetch_add(1, Ordering::Relaxed);
        self.sum.fetch_add(latency_ns, Ordering::Relaxed);
        self.min.fetch_min(latency_ns, Ordering::Relaxed);
        self.max.fetch_max(latency_ns, Ordering::Relaxed);
    }

    /// Latency (in ns) below which a `percentile` fraction of samples
    /// fall, resolved to the containing bucket's upper bound.
    ///
    /// Returns 0 when nothing has been recorded.
    pub fn percentile(&self, percentile: f64) -> u64 {
        let total = self.total_count.load(Ordering::Relaxed);
        if total == 0 {
            return 0;
        }

        let target = (total as f64 * percentile) as u64;
        let mut cumulative = 0u64;

        for (i, bucket) in self.buckets.iter().enumerate() {
            cumulative += bucket.load(Ordering::Relaxed);
            if cumulative >= target {
                return Self::bucket_upper_bound(i);
            }
        }
        Self::bucket_upper_bound(NUM_BUCKETS - 1)
    }

    #[inline(always)]
    pub fn p50(&self) -> u64 {
        self.percentile(0.50)
    }

    #[inline(always)]
    pub fn p99(&self) -> u64 {
        self.percentile(0.99)
    }

    #[inline(always)]
    pub fn p999(&self) -> u64 {
        self.percentile(0.999)
    }

    #[inline(always)]
    pub fn p9999(&self) -> u64 {
        self.percentile(0.9999)
    }

    /// Smallest recorded sample; `u64::MAX` while empty.
    #[inline(always)]
    pub fn min(&self) -> u64 {
        self.min.load(Ordering::Relaxed)
    }

    /// Largest recorded sample; 0 while empty.
    #[inline(always)]
    pub fn max(&self) -> u64 {
        self.max.load(Ordering::Relaxed)
    }

    /// Arithmetic mean of all samples, 0 while empty.
    pub fn mean(&self) -> u64 {
        let total = self.total_count.load(Ordering::Relaxed);
        if total == 0 {
            return 0;
        }
        self.sum.load(Ordering::Relaxed) / total
    }

    #[inline(always)]
    pub fn count(&self) -> u64 {
        self.total_count.load(Ordering::Relaxed)
    }

    /// Clears every counter. Not a consistent snapshot: the caller must
    /// make sure no recorder runs concurrently.
    pub fn reset(&self) {
        for bucket in &self.buckets {
            bucket.store(0, Ordering::Relaxed);
        }
        self.total_count.store(0, Ordering::Relaxed);
        self.min.store(u64::MAX, Ordering::Relaxed);
        self.max.store(0, Ordering::Relaxed);
        self.sum.store(0, Ordering::Relaxed);
    }

    #[inline(always)]
    fn bucket_index(latency_ns: u64) -> usize {
        let latency_us = latency_ns / 1000;
        if latency_us == 0 {
            return 0;
        }
        // Bit width of the microsecond value: (2^(i-1), 2^i] µs lands in
        // bucket i.
        ((u64::BITS - latency_us.leading_zeros()) as usize).min(NUM_BUCKETS - 1)
    }

    #[inline(always)]
    fn bucket_upper_bound(bucket: usize) -> u64 {
        if bucket == 0 {
            return 1_000;
        }
        (1u64 << bucket) * 1_000
    }
}

impl Default for LatencyHistogram {
    fn default() -> Self {
        Self::new()
    }
}

/// Flat panel of feed counters plus the three standard latency
/// histograms.
///
/// Every counter sits on its own cache line so unrelated hot-path
/// increments never contend. The panel is composed into whatever owns the
/// feed; workers receive a shared reference explicitly.
pub struct FeedMetrics {
    pub messages_received: CachePadded<AtomicU64>,
    pub messages_processed: CachePadded<AtomicU64>,
    pub messages_dropped: CachePadded<AtomicU64>,
    pub parse_errors: CachePadded<AtomicU64>,
    pub sequence_gaps: CachePadded<AtomicU64>,
    pub queue_full_events: CachePadded<AtomicU64>,

    pub end_to_end_latency: LatencyHistogram,
    pub parse_latency: LatencyHistogram,
    pub queue_latency: LatencyHistogram,
}

impl FeedMetrics {
    pub fn new() -> Self {
        Self {
            messages_received: CachePadded::new(AtomicU64::new(0)),
            messages_processed: CachePadded::new(AtomicU64::new(0)),
            messages_dropped: CachePadded::new(AtomicU64::new(0)),
            parse_errors: CachePadded::new(AtomicU64::new(0)),
            sequence_gaps: CachePadded::new(AtomicU64::new(0)),
            queue_full_events: CachePadded::new(AtomicU64::new(0)),
            end_to_end_latency: LatencyHistogram::new(),
            parse_latency: LatencyHistogram::new(),
            queue_latency: LatencyHistogram::new(),
        }
    }

    #[inline(always)]
    pub fn record_message_received(&self) {
        self.messages_received.fetch_add(1, Ordering::Relaxed);
    }

    #[inline(always)]
    pub fn record_message_processed(&self) {
        self.messages_processed.fetch_add(1, Ordering::Relaxed);
    }

    #[inline(always)]
    pub fn record_message_dropped(&self) {
        self.messages_dropped.fetch_add(1, Ordering::Relaxed);
    }

    #[inline(always)]
    pub fn record_parse_error(&self) {
        self.parse_errors.fetch_add(1, Ordering::Relaxed);
    }

    #[inline(always)]
    pub fn record_sequence_gap(&self) {
        self.sequence_gaps.fetch_add(1, Ordering::Relaxed);
    }

    #[inline(always)]
    pub fn record_queue_full(&self) {
        self.queue_full_events.fetch_add(1, Ordering::Relaxed);
    }

    /// Clears counters and histograms. Same caveat as
    /// [`LatencyHistogram::reset`].
    pub fn reset(&self) {
        self.messages_received.store(0, Ordering::Relaxed);
        self.messages_processed.store(0, Ordering::Relaxed);
        self.messages_dropped.store(0, Ordering::Relaxed);
        self.parse_errors.store(0, Ordering::Relaxed);
        self.sequence_gaps.store(0, Ordering::Relaxed);
        self.queue_full_events.store(0, Ordering::Relaxed);

        self.end_to_end_latency.reset();
        self.parse_latency.reset();
        self.queue_latency.reset();
    }
}

impl Default for FeedMetrics {
    fn default() -> Self {
        Self::new()
    }
}
