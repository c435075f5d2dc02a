//! Lock-free metrics collection and periodic reporting
//!
//! Uses atomics for hot-path operations to avoid mutex contention.
//! All counter updates are lock-free; reporting is the only operation
//! that needs synchronization (via atomic swap).
//!
//! NOTE: All atomics use Relaxed ordering intentionally. These are statistical
//! counters only. Do NOT use these atomics for coordination or logic decisions.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tracing::info;

/// Prometheus-style exponential bucket boundaries (microseconds)
/// Buckets: ≤100, ≤200, ≤400, ≤800, ≤1600, ≤3200, ≤6400, ≤12800, ≤25600, ≤51200,
/// >51200
const BUCKET_BOUNDS: [u64; 10] = [100, 200, 400, 800, 1600, 3200, 6400, 12800, 25600, 51200];
const NUM_BUCKETS: usize = 11;

/// Compute bucket index for a latency value using binary search
#[inline]
fn bucket_index(latency_us: u64) -> usize {
    BUCKET_BOUNDS.partition_point(|&bound| bound < latency_us)
}

/// Update an atomic max value using compare-and-swap loop
#[inline]
fn update_atomic_max(atomic_max: &AtomicU64, new_value: u64) {
    let mut current_max = atomic_max.load(Ordering::Relaxed);
    while new_value > current_max {
        match atomic_max.compare_exchange_weak(
            current_max,
            new_value,
            Ordering::Relaxed,
            Ordering::Relaxed,
        ) {
            Ok(_) => break,
            Err(actual) => current_max = actual,
        }
    }
}

/// Swap all buckets to zero and return their values
#[inline]
fn swap_buckets(buckets: &[AtomicU64; NUM_BUCKETS]) -> [u64; NUM_BUCKETS] {
    let mut result = [0u64; NUM_BUCKETS];
    for (i, bucket) in buckets.iter().enumerate() {
        result[i] = bucket.swap(0, Ordering::Relaxed);
    }
    result
}

/// Load all bucket values without resetting
#[inline]
fn load_buckets(buckets: &[AtomicU64; NUM_BUCKETS]) -> [u64; NUM_BUCKETS] {
    let mut result = [0u64; NUM_BUCKETS];
    for (i, bucket) in buckets.iter().enumerate() {
        result[i] = bucket.load(Ordering::Relaxed);
    }
    result
}

/// Compute percentile from histogram buckets
/// Returns the upper bound of the bucket containing the percentile
fn percentile_from_buckets(buckets: &[u64; NUM_BUCKETS], percentile: f64) -> u64 {
    let total: u64 = buckets.iter().sum();
    if total == 0 {
        return 0;
    }

    let target = (total as f64 * percentile) as u64;
    let mut cumulative = 0u64;

    // Upper bounds for each bucket (last bucket uses 2x the previous bound)
    const BUCKET_UPPER_BOUNDS: [u64; NUM_BUCKETS] =
        [100, 200, 400, 800, 1600, 3200, 6400, 12800, 25600, 51200, 102400];

    for (i, &count) in buckets.iter().enumerate() {
        cumulative += count;
        if cumulative >= target {
            return BUCKET_UPPER_BOUNDS[i];
        }
    }
    BUCKET_UPPER_BOUNDS[NUM_BUCKETS - 1]
}

/// Lock-free metrics collector
///
/// All recording operations are lock-free using atomics.
/// The `report()` method atomically swaps counters to get a consistent snapshot.
pub struct Metrics {
    /// Total location samples received (monotonic)
    locations_total: AtomicU64,
    /// Location samples dropped as stale (monotonic)
    locations_stale: AtomicU64,
    /// Location samples arriving while updates were halted (monotonic)
    locations_halted: AtomicU64,
    /// Motion samples received (monotonic)
    motions_total: AtomicU64,
    /// Motion samples ignored for low confidence or unknown kind (monotonic)
    motions_ignored: AtomicU64,
    /// Events since last report (reset on report)
    events_since_report: AtomicU64,
    /// Sum of processing latencies in microseconds (reset on report)
    latency_sum_us: AtomicU64,
    /// Max processing latency in microseconds (reset on report)
    latency_max_us: AtomicU64,
    /// Sample processing latency histogram buckets (reset on report)
    latency_buckets: [AtomicU64; NUM_BUCKETS],
    /// Max time an event waited in the recorder queue, microseconds (reset on report)
    queue_delay_max_us: AtomicU64,
    /// Scenario transitions (monotonic)
    transitions_total: AtomicU64,
    /// Checkpoint rewrites that succeeded (monotonic)
    checkpoint_writes: AtomicU64,
    /// Checkpoint or archive writes that failed (monotonic)
    storage_failures: AtomicU64,
    /// Trips started (monotonic)
    trips_started: AtomicU64,
    /// Trips finalized into archives (monotonic)
    trips_finalized: AtomicU64,
    /// Archive files written (monotonic)
    archives_written: AtomicU64,
    /// Reconciliation passes run (monotonic)
    reconcile_passes: AtomicU64,
    /// Reconciliation passes aborted by a listing error (monotonic)
    reconcile_aborted: AtomicU64,
    /// Archives uploaded (monotonic)
    uploads_ok: AtomicU64,
    /// Archive uploads that failed (monotonic)
    uploads_failed: AtomicU64,
    /// Feed events dropped due to channel full (monotonic)
    feed_events_dropped: AtomicU64,
    /// Feed lines that failed to parse (monotonic)
    feed_parse_errors: AtomicU64,
    /// Current recorder queue depth (point-in-time)
    event_queue_depth: AtomicU64,
    /// Last report time for rate calculation
    last_report_time: Mutex<Instant>,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            locations_total: AtomicU64::new(0),
            locations_stale: AtomicU64::new(0),
            locations_halted: AtomicU64::new(0),
            motions_total: AtomicU64::new(0),
            motions_ignored: AtomicU64::new(0),
            events_since_report: AtomicU64::new(0),
            latency_sum_us: AtomicU64::new(0),
            latency_max_us: AtomicU64::new(0),
            latency_buckets: Default::default(),
            queue_delay_max_us: AtomicU64::new(0),
            transitions_total: AtomicU64::new(0),
            checkpoint_writes: AtomicU64::new(0),
            storage_failures: AtomicU64::new(0),
            trips_started: AtomicU64::new(0),
            trips_finalized: AtomicU64::new(0),
            archives_written: AtomicU64::new(0),
            reconcile_passes: AtomicU64::new(0),
            reconcile_aborted: AtomicU64::new(0),
            uploads_ok: AtomicU64::new(0),
            uploads_failed: AtomicU64::new(0),
            feed_events_dropped: AtomicU64::new(0),
            feed_parse_errors: AtomicU64::new(0),
            event_queue_depth: AtomicU64::new(0),
            last_report_time: Mutex::new(Instant::now()),
        }
    }

    /// Record a processed sensor event with its latency (lock-free)
    #[inline]
    pub fn record_event_processed(&self, latency_us: u64) {
        self.events_since_report.fetch_add(1, Ordering::Relaxed);
        self.latency_sum_us.fetch_add(latency_us, Ordering::Relaxed);

        let bucket = bucket_index(latency_us);
        self.latency_buckets[bucket].fetch_add(1, Ordering::Relaxed);

        update_atomic_max(&self.latency_max_us, latency_us);
    }

    /// Record how long an event sat in the queue before processing began
    #[inline]
    pub fn record_queue_delay(&self, delay_us: u64) {
        update_atomic_max(&self.queue_delay_max_us, delay_us);
    }

    #[inline]
    pub fn record_location(&self) {
        self.locations_total.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_location_stale(&self) {
        self.locations_stale.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_location_halted(&self) {
        self.locations_halted.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_motion(&self, applied: bool) {
        self.motions_total.fetch_add(1, Ordering::Relaxed);
        if !applied {
            self.motions_ignored.fetch_add(1, Ordering::Relaxed);
        }
    }

    #[inline]
    pub fn record_transition(&self) {
        self.transitions_total.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_checkpoint_write(&self) {
        self.checkpoint_writes.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_storage_failure(&self) {
        self.storage_failures.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_trip_started(&self) {
        self.trips_started.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a finalized trip and the number of archive files it produced
    #[inline]
    pub fn record_trip_finalized(&self, archives: usize) {
        self.trips_finalized.fetch_add(1, Ordering::Relaxed);
        self.archives_written.fetch_add(archives as u64, Ordering::Relaxed);
    }

    /// Record the outcome of one reconciliation pass
    #[inline]
    pub fn record_reconcile(&self, uploaded: usize, failed: usize) {
        self.reconcile_passes.fetch_add(1, Ordering::Relaxed);
        self.uploads_ok.fetch_add(uploaded as u64, Ordering::Relaxed);
        self.uploads_failed.fetch_add(failed as u64, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_reconcile_aborted(&self) {
        self.reconcile_passes.fetch_add(1, Ordering::Relaxed);
        self.reconcile_aborted.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a feed event dropped due to channel full (lock-free)
    #[inline]
    pub fn record_feed_event_dropped(&self) {
        self.feed_events_dropped.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_feed_parse_error(&self) {
        self.feed_parse_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Set current event queue depth (called by sampler)
    #[inline]
    pub fn set_event_queue_depth(&self, depth: u64) {
        self.event_queue_depth.store(depth, Ordering::Relaxed);
    }

    #[inline]
    pub fn locations_total(&self) -> u64 {
        self.locations_total.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn locations_stale(&self) -> u64 {
        self.locations_stale.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn motions_ignored(&self) -> u64 {
        self.motions_ignored.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn transitions_total(&self) -> u64 {
        self.transitions_total.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn storage_failures(&self) -> u64 {
        self.storage_failures.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn uploads_ok(&self) -> u64 {
        self.uploads_ok.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn uploads_failed(&self) -> u64 {
        self.uploads_failed.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn feed_events_dropped(&self) -> u64 {
        self.feed_events_dropped.load(Ordering::Relaxed)
    }

    /// Snapshot of all monotonic counters and the cumulative latency histogram,
    /// without resetting anything (used by the Prometheus endpoint)
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            locations_total: self.locations_total.load(Ordering::Relaxed),
            locations_stale: self.locations_stale.load(Ordering::Relaxed),
            locations_halted: self.locations_halted.load(Ordering::Relaxed),
            motions_total: self.motions_total.load(Ordering::Relaxed),
            motions_ignored: self.motions_ignored.load(Ordering::Relaxed),
            transitions_total: self.transitions_total.load(Ordering::Relaxed),
            checkpoint_writes: self.checkpoint_writes.load(Ordering::Relaxed),
            storage_failures: self.storage_failures.load(Ordering::Relaxed),
            trips_started: self.trips_started.load(Ordering::Relaxed),
            trips_finalized: self.trips_finalized.load(Ordering::Relaxed),
            archives_written: self.archives_written.load(Ordering::Relaxed),
            reconcile_passes: self.reconcile_passes.load(Ordering::Relaxed),
            reconcile_aborted: self.reconcile_aborted.load(Ordering::Relaxed),
            uploads_ok: self.uploads_ok.load(Ordering::Relaxed),
            uploads_failed: self.uploads_failed.load(Ordering::Relaxed),
            feed_events_dropped: self.feed_events_dropped.load(Ordering::Relaxed),
            feed_parse_errors: self.feed_parse_errors.load(Ordering::Relaxed),
            event_queue_depth: self.event_queue_depth.load(Ordering::Relaxed),
            pending_latency_buckets: load_buckets(&self.latency_buckets),
        }
    }

    /// Calculate and return metrics summary, then reset periodic counters
    ///
    /// This is the only method that resets counters. It uses atomic swap
    /// to get a consistent snapshot while allowing concurrent updates.
    pub fn report(&self) -> MetricsSummary {
        let events_count = self.events_since_report.swap(0, Ordering::Relaxed);
        let latency_sum = self.latency_sum_us.swap(0, Ordering::Relaxed);
        let max_latency = self.latency_max_us.swap(0, Ordering::Relaxed);
        let lat_buckets = swap_buckets(&self.latency_buckets);
        let max_queue_delay = self.queue_delay_max_us.swap(0, Ordering::Relaxed);

        let elapsed = {
            let mut last = self.last_report_time.lock();
            let elapsed = last.elapsed();
            *last = Instant::now();
            elapsed
        };

        let events_per_sec = if elapsed.as_secs_f64() > 0.0 {
            events_count as f64 / elapsed.as_secs_f64()
        } else {
            0.0
        };

        let avg_latency = if events_count > 0 { latency_sum / events_count } else { 0 };

        MetricsSummary {
            events_since_report: events_count,
            events_per_sec,
            avg_process_latency_us: avg_latency,
            max_process_latency_us: max_latency,
            max_queue_delay_us: max_queue_delay,
            lat_p50_us: percentile_from_buckets(&lat_buckets, 0.50),
            lat_p95_us: percentile_from_buckets(&lat_buckets, 0.95),
            lat_p99_us: percentile_from_buckets(&lat_buckets, 0.99),
            lat_buckets,
            counters: self.snapshot(),
        }
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Exported bucket bounds for Prometheus formatting
pub const METRICS_BUCKET_BOUNDS: [u64; 10] = BUCKET_BOUNDS;
pub const METRICS_NUM_BUCKETS: usize = NUM_BUCKETS;

/// Point-in-time view of the monotonic counters
#[derive(Debug, Clone, Default)]
pub struct MetricsSnapshot {
    pub locations_total: u64,
    pub locations_stale: u64,
    pub locations_halted: u64,
    pub motions_total: u64,
    pub motions_ignored: u64,
    pub transitions_total: u64,
    pub checkpoint_writes: u64,
    pub storage_failures: u64,
    pub trips_started: u64,
    pub trips_finalized: u64,
    pub archives_written: u64,
    pub reconcile_passes: u64,
    pub reconcile_aborted: u64,
    pub uploads_ok: u64,
    pub uploads_failed: u64,
    pub feed_events_dropped: u64,
    pub feed_parse_errors: u64,
    pub event_queue_depth: u64,
    /// Latency histogram accumulated since the last periodic report
    pub pending_latency_buckets: [u64; NUM_BUCKETS],
}

#[derive(Debug)]
pub struct MetricsSummary {
    pub events_since_report: u64,
    pub events_per_sec: f64,
    pub avg_process_latency_us: u64,
    pub max_process_latency_us: u64,
    pub max_queue_delay_us: u64,
    /// Sample processing latency histogram buckets
    pub lat_buckets: [u64; NUM_BUCKETS],
    pub lat_p50_us: u64,
    pub lat_p95_us: u64,
    pub lat_p99_us: u64,
    pub counters: MetricsSnapshot,
}

impl MetricsSummary {
    pub fn log(&self) {
        info!(
            events = %self.events_since_report,
            events_per_sec = format!("{:.2}", self.events_per_sec),
            avg_latency_us = %self.avg_process_latency_us,
            max_latency_us = %self.max_process_latency_us,
            p99_us = %self.lat_p99_us,
            max_queue_delay_us = %self.max_queue_delay_us,
            locations = %self.counters.locations_total,
            stale = %self.counters.locations_stale,
            transitions = %self.counters.transitions_total,
            storage_failures = %self.counters.storage_failures,
            uploads_ok = %self.counters.uploads_ok,
            uploads_failed = %self.counters.uploads_failed,
            feed_dropped = %self.counters.feed_events_dropped,
            "metrics"
        );
    }
}
