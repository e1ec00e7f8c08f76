//! Lock-free metrics collection and periodic reporting
//!
//! Uses atomics for hot-path operations to avoid mutex contention.
//! All counter updates are lock-free; reporting is the only operation
//! that needs synchronization (via atomic swap).
//!
//! NOTE: All atomics use Relaxed ordering intentionally—these are statistical
//! counters only. Do NOT use these atomics for coordination or logic decisions.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tracing::info;

/// Prometheus-style exponential bucket boundaries (microseconds)
/// Buckets: ≤100, ≤200, ≤400, ≤800, ≤1600, ≤3200, ≤6400, ≤12800, ≤25600, ≤51200, >51200
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
    /// Total observations ever processed (monotonic)
    observations_total: AtomicU64,
    /// Observations since last report (reset on report)
    observations_since_report: AtomicU64,
    /// Observations suppressed by dedup (monotonic)
    observations_suppressed: AtomicU64,
    /// Sum of processing latencies in microseconds (reset on report)
    latency_sum_us: AtomicU64,
    /// Max processing latency in microseconds (reset on report)
    latency_max_us: AtomicU64,
    /// Observation processing latency histogram buckets (reset on report)
    latency_buckets: [AtomicU64; NUM_BUCKETS],
    /// Sessions opened (monotonic)
    sessions_opened: AtomicU64,
    /// Sessions closed (monotonic)
    sessions_closed: AtomicU64,
    /// Sessions marked paid (monotonic)
    sessions_paid: AtomicU64,
    /// Total fees billed, in hundredths of the currency unit (monotonic)
    fees_billed_cents: AtomicU64,
    /// Enters rejected because the lot was full (monotonic)
    capacity_rejections: AtomicU64,
    /// Exits rejected because the count was already zero (monotonic)
    underflow_rejections: AtomicU64,
    /// Store write failures (monotonic)
    store_errors: AtomicU64,
    /// Ingest events dropped due to channel full (monotonic)
    ingest_events_dropped: AtomicU64,
    /// Egress messages dropped due to channel full (monotonic)
    egress_messages_dropped: AtomicU64,
    /// Current occupied slots (gauge, updated by the pipeline)
    occupied_slots: AtomicU64,
    /// Current open sessions (gauge, updated by the pipeline)
    open_sessions: AtomicU64,
    /// Current ingest queue depth (updated by sampler)
    event_queue_depth: AtomicU64,
    /// Plates currently tracked by the dedup map (gauge)
    dedup_tracked_plates: AtomicU64,
    /// Last report time (only accessed from reporter, not atomic)
    last_report_time: parking_lot::Mutex<Instant>,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            observations_total: AtomicU64::new(0),
            observations_since_report: AtomicU64::new(0),
            observations_suppressed: AtomicU64::new(0),
            latency_sum_us: AtomicU64::new(0),
            latency_max_us: AtomicU64::new(0),
            latency_buckets: std::array::from_fn(|_| AtomicU64::new(0)),
            sessions_opened: AtomicU64::new(0),
            sessions_closed: AtomicU64::new(0),
            sessions_paid: AtomicU64::new(0),
            fees_billed_cents: AtomicU64::new(0),
            capacity_rejections: AtomicU64::new(0),
            underflow_rejections: AtomicU64::new(0),
            store_errors: AtomicU64::new(0),
            ingest_events_dropped: AtomicU64::new(0),
            egress_messages_dropped: AtomicU64::new(0),
            occupied_slots: AtomicU64::new(0),
            open_sessions: AtomicU64::new(0),
            event_queue_depth: AtomicU64::new(0),
            dedup_tracked_plates: AtomicU64::new(0),
            last_report_time: parking_lot::Mutex::new(Instant::now()),
        }
    }

    /// Record an observation was processed with given latency (lock-free)
    #[inline]
    pub fn record_observation_processed(&self, latency_us: u64) {
        self.observations_total.fetch_add(1, Ordering::Relaxed);
        self.observations_since_report.fetch_add(1, Ordering::Relaxed);
        self.latency_sum_us.fetch_add(latency_us, Ordering::Relaxed);

        let bucket = bucket_index(latency_us);
        self.latency_buckets[bucket].fetch_add(1, Ordering::Relaxed);

        update_atomic_max(&self.latency_max_us, latency_us);
    }

    /// Record an observation suppressed by dedup (lock-free)
    #[inline]
    pub fn record_observation_suppressed(&self) {
        self.observations_suppressed.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a session opened (lock-free)
    #[inline]
    pub fn record_session_opened(&self) {
        self.sessions_opened.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a session closed with its billed fee (lock-free)
    #[inline]
    pub fn record_session_closed(&self, fee: f64) {
        self.sessions_closed.fetch_add(1, Ordering::Relaxed);
        self.fees_billed_cents.fetch_add((fee * 100.0).round() as u64, Ordering::Relaxed);
    }

    /// Record a session marked paid (lock-free)
    #[inline]
    pub fn record_session_paid(&self) {
        self.sessions_paid.fetch_add(1, Ordering::Relaxed);
    }

    /// Record an enter rejected at capacity (lock-free)
    #[inline]
    pub fn record_capacity_rejection(&self) {
        self.capacity_rejections.fetch_add(1, Ordering::Relaxed);
    }

    /// Record an exit rejected on an empty lot (lock-free)
    #[inline]
    pub fn record_underflow_rejection(&self) {
        self.underflow_rejections.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a store write failure (lock-free)
    #[inline]
    pub fn record_store_error(&self) {
        self.store_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Record an ingest event dropped due to channel full (lock-free)
    #[inline]
    pub fn record_ingest_event_dropped(&self) {
        self.ingest_events_dropped.fetch_add(1, Ordering::Relaxed);
    }

    /// Record an egress message dropped due to channel full (lock-free)
    #[inline]
    pub fn record_egress_message_dropped(&self) {
        self.egress_messages_dropped.fetch_add(1, Ordering::Relaxed);
    }

    /// Set current occupied slot count (called by the pipeline)
    #[inline]
    pub fn set_occupied_slots(&self, occupied: u64) {
        self.occupied_slots.store(occupied, Ordering::Relaxed);
    }

    /// Set current open session count (called by the pipeline)
    #[inline]
    pub fn set_open_sessions(&self, open: u64) {
        self.open_sessions.store(open, Ordering::Relaxed);
    }

    /// Set current ingest queue depth (called by sampler)
    #[inline]
    pub fn set_event_queue_depth(&self, depth: u64) {
        self.event_queue_depth.store(depth, Ordering::Relaxed);
    }

    /// Set number of plates tracked in the dedup map (called on sweep)
    #[inline]
    pub fn set_dedup_tracked_plates(&self, plates: u64) {
        self.dedup_tracked_plates.store(plates, Ordering::Relaxed);
    }

    /// Get total observations processed
    #[inline]
    pub fn observations_total(&self) -> u64 {
        self.observations_total.load(Ordering::Relaxed)
    }

    /// Get observations suppressed total
    #[inline]
    pub fn observations_suppressed(&self) -> u64 {
        self.observations_suppressed.load(Ordering::Relaxed)
    }

    /// Get ingest events dropped total
    #[inline]
    pub fn ingest_events_dropped(&self) -> u64 {
        self.ingest_events_dropped.load(Ordering::Relaxed)
    }

    /// Get current ingest queue depth
    #[inline]
    pub fn event_queue_depth(&self) -> u64 {
        self.event_queue_depth.load(Ordering::Relaxed)
    }

    /// Calculate and return metrics summary, then reset periodic counters
    ///
    /// This is the only method that resets counters. It uses atomic swap
    /// to get a consistent snapshot while allowing concurrent updates.
    pub fn report(&self) -> MetricsSummary {
        // Swap periodic counters to zero and get their values
        let observations_count = self.observations_since_report.swap(0, Ordering::Relaxed);
        let latency_sum = self.latency_sum_us.swap(0, Ordering::Relaxed);
        let max_latency = self.latency_max_us.swap(0, Ordering::Relaxed);
        let lat_buckets = swap_buckets(&self.latency_buckets);

        // Monotonic counters (don't reset)
        let observations_total = self.observations_total.load(Ordering::Relaxed);
        let observations_suppressed = self.observations_suppressed.load(Ordering::Relaxed);
        let sessions_opened = self.sessions_opened.load(Ordering::Relaxed);
        let sessions_closed = self.sessions_closed.load(Ordering::Relaxed);
        let sessions_paid = self.sessions_paid.load(Ordering::Relaxed);
        let fees_billed_cents = self.fees_billed_cents.load(Ordering::Relaxed);
        let capacity_rejections = self.capacity_rejections.load(Ordering::Relaxed);
        let underflow_rejections = self.underflow_rejections.load(Ordering::Relaxed);
        let store_errors = self.store_errors.load(Ordering::Relaxed);
        let ingest_events_dropped = self.ingest_events_dropped.load(Ordering::Relaxed);
        let egress_messages_dropped = self.egress_messages_dropped.load(Ordering::Relaxed);

        // Gauges (point-in-time, don't reset)
        let occupied_slots = self.occupied_slots.load(Ordering::Relaxed);
        let open_sessions = self.open_sessions.load(Ordering::Relaxed);
        let event_queue_depth = self.event_queue_depth.load(Ordering::Relaxed);
        let dedup_tracked_plates = self.dedup_tracked_plates.load(Ordering::Relaxed);

        // Calculate elapsed time and reset
        let elapsed = {
            let mut last = self.last_report_time.lock();
            let elapsed = last.elapsed();
            *last = Instant::now();
            elapsed
        };

        let observations_per_sec = if elapsed.as_secs_f64() > 0.0 {
            observations_count as f64 / elapsed.as_secs_f64()
        } else {
            0.0
        };

        let avg_latency =
            if observations_count > 0 { latency_sum / observations_count } else { 0 };

        let lat_p50 = percentile_from_buckets(&lat_buckets, 0.50);
        let lat_p95 = percentile_from_buckets(&lat_buckets, 0.95);
        let lat_p99 = percentile_from_buckets(&lat_buckets, 0.99);

        MetricsSummary {
            observations_total,
            observations_per_sec,
            observations_suppressed,
            avg_process_latency_us: avg_latency,
            max_process_latency_us: max_latency,
            lat_buckets,
            lat_p50_us: lat_p50,
            lat_p95_us: lat_p95,
            lat_p99_us: lat_p99,
            sessions_opened,
            sessions_closed,
            sessions_paid,
            fees_billed_cents,
            capacity_rejections,
            underflow_rejections,
            store_errors,
            ingest_events_dropped,
            egress_messages_dropped,
            occupied_slots,
            open_sessions,
            event_queue_depth,
            dedup_tracked_plates,
        }
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Number of histogram buckets (exported for egress)
pub const METRICS_NUM_BUCKETS: usize = NUM_BUCKETS;

/// Exported bucket bounds for Prometheus formatting
pub const METRICS_BUCKET_BOUNDS: [u64; 10] = BUCKET_BOUNDS;

#[derive(Debug)]
pub struct MetricsSummary {
    pub observations_total: u64,
    pub observations_per_sec: f64,
    pub observations_suppressed: u64,
    pub avg_process_latency_us: u64,
    pub max_process_latency_us: u64,
    /// Observation processing latency histogram buckets
    /// Bounds: ≤100, ≤200, ≤400, ≤800, ≤1600, ≤3200, ≤6400, ≤12800, ≤25600, ≤51200, >51200 µs
    pub lat_buckets: [u64; NUM_BUCKETS],
    /// 50th percentile latency (µs)
    pub lat_p50_us: u64,
    /// 95th percentile latency (µs)
    pub lat_p95_us: u64,
    /// 99th percentile latency (µs)
    pub lat_p99_us: u64,
    pub sessions_opened: u64,
    pub sessions_closed: u64,
    pub sessions_paid: u64,
    /// Total fees billed in hundredths of the currency unit
    pub fees_billed_cents: u64,
    /// Enters rejected because the lot was full
    pub capacity_rejections: u64,
    /// Exits rejected because the count was already zero
    pub underflow_rejections: u64,
    /// Store write failures
    pub store_errors: u64,
    /// Ingest events dropped due to channel full
    pub ingest_events_dropped: u64,
    /// Egress messages dropped due to channel full
    pub egress_messages_dropped: u64,
    /// Current occupied slots (gauge)
    pub occupied_slots: u64,
    /// Current open sessions (gauge)
    pub open_sessions: u64,
    /// Current ingest queue depth (snapshot)
    pub event_queue_depth: u64,
    /// Plates tracked in the dedup map (gauge)
    pub dedup_tracked_plates: u64,
}

impl MetricsSummary {
    pub fn log(&self) {
        info!(
            observations_total = %self.observations_total,
            observations_per_sec = format!("{:.1}", self.observations_per_sec),
            suppressed = %self.observations_suppressed,
            avg_latency_us = %self.avg_process_latency_us,
            max_latency_us = %self.max_process_latency_us,
            p50_us = %self.lat_p50_us,
            p95_us = %self.lat_p95_us,
            p99_us = %self.lat_p99_us,
            sessions_opened = %self.sessions_opened,
            sessions_closed = %self.sessions_closed,
            occupied = %self.occupied_slots,
            open_sessions = %self.open_sessions,
            "metrics"
        );
    }
}
