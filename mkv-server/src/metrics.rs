//! # Server Metrics
//!
//! Lightweight counters and a latency histogram covering the request path and
//! the snapshot loop.
//!
//! ## Design Principles
//! 1. **Accumulator Pattern**: Use atomic counters to aggregate events cheaply.
//! 2. **Fixed Buckets**: Keep histogram buckets in a contiguous array for cache locality.
//! 3. **Zero-Cost Access**: Expose snapshots as plain structs without heap work.
//! 4. **RAII Gauges**: Connection counts are tied to a guard so early returns
//!    cannot leak a gauge increment.
//!
//! ## Notes
//! - Metrics never leave the process; the snapshot loop logs a summary.
//! - Bucket boundaries are expressed in microseconds.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Default latency bucket boundaries in microseconds.
pub const DEFAULT_LATENCY_BUCKETS_US: [u64; 12] =
    [1, 2, 5, 10, 20, 50, 100, 200, 500, 1_000, 2_000, 5_000];

/// Snapshot of all server metrics at a point in time.
#[derive(Debug, Clone)]
pub struct MetricsSnapshot {
    /// Total number of requests dispatched.
    pub requests_total: u64,
    /// Requests answered with `ERR` or `UNKNOWN`.
    pub errors_total: u64,
    /// Current in-flight requests.
    pub inflight: u64,
    /// Currently open client connections.
    pub connections_active: u64,
    /// Connections accepted since startup.
    pub connections_total: u64,
    /// Latency histogram snapshot.
    pub latency: LatencySnapshot,
    /// Snapshot persistence counters.
    pub snapshots: SnapshotStats,
}

/// Counters for the persistence loop.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SnapshotStats {
    /// Saves that replaced the backing file.
    pub saved: u64,
    /// Saves that failed and left the previous file in place.
    pub failed: u64,
    /// Keys captured by the last successful save.
    pub last_keys: u64,
    /// Bytes written by the last successful save.
    pub last_bytes: u64,
    /// Duration of the last successful save in microseconds.
    pub last_duration_us: u64,
}

/// Snapshot of the latency histogram.
#[derive(Debug, Clone)]
pub struct LatencySnapshot {
    /// Bucket boundaries in microseconds.
    pub bounds_us: Vec<u64>,
    /// Bucket counts, including the overflow bucket at the end.
    pub buckets: Vec<u64>,
    /// Total number of samples.
    pub samples: u64,
    /// Sum of latencies in microseconds.
    pub sum_us: u64,
}

impl LatencySnapshot {
    /// Mean latency in microseconds, or 0 with no samples.
    pub fn mean_us(&self) -> u64 {
        self.sum_us.checked_div(self.samples).unwrap_or(0)
    }

    /// Upper bound of the bucket holding the `quantile` sample, or `None`
    /// when it falls in the overflow bucket or nothing was recorded.
    pub fn quantile_bound_us(&self, quantile: f64) -> Option<u64> {
        if self.samples == 0 {
            return None;
        }
        let rank = ((self.samples as f64) * quantile.clamp(0.0, 1.0)).ceil().max(1.0) as u64;
        let mut seen = 0;
        for (idx, count) in self.buckets.iter().enumerate() {
            seen += count;
            if seen >= rank {
                return self.bounds_us.get(idx).copied();
            }
        }
        None
    }
}

/// Thread-safe metrics aggregator for the server.
///
/// `Ordering::Relaxed` is sufficient because no reader needs cross-field
/// ordering, only eventually consistent totals.
pub struct Metrics {
    requests_total: AtomicU64,
    errors_total: AtomicU64,
    inflight: AtomicU64,
    connections_active: AtomicU64,
    connections_total: AtomicU64,
    snapshots_saved: AtomicU64,
    snapshots_failed: AtomicU64,
    last_snapshot_keys: AtomicU64,
    last_snapshot_bytes: AtomicU64,
    last_snapshot_us: AtomicU64,
    latency: LatencyHistogram,
}

impl Metrics {
    /// Creates a new metrics aggregator with the default latency buckets.
    pub fn new() -> Self {
        Metrics::with_latency_buckets(DEFAULT_LATENCY_BUCKETS_US.to_vec())
    }

    /// Creates a new metrics aggregator with custom latency bucket boundaries.
    ///
    /// The boundaries must be sorted ascending and represent microseconds.
    pub fn with_latency_buckets(bounds_us: Vec<u64>) -> Self {
        Metrics {
            requests_total: AtomicU64::new(0),
            errors_total: AtomicU64::new(0),
            inflight: AtomicU64::new(0),
            connections_active: AtomicU64::new(0),
            connections_total: AtomicU64::new(0),
            snapshots_saved: AtomicU64::new(0),
            snapshots_failed: AtomicU64::new(0),
            last_snapshot_keys: AtomicU64::new(0),
            last_snapshot_bytes: AtomicU64::new(0),
            last_snapshot_us: AtomicU64::new(0),
            latency: LatencyHistogram::new(bounds_us),
        }
    }

    /// Records the start of a request.
    pub fn record_request_start(&self) {
        self.requests_total.fetch_add(1, Ordering::Relaxed);
        self.inflight.fetch_add(1, Ordering::Relaxed);
    }

    /// Records the end of a request.
    pub fn record_request_end(&self, latency: Duration) {
        self.inflight.fetch_sub(1, Ordering::Relaxed);
        self.latency.record(latency);
    }

    /// Records an error response.
    pub fn record_error(&self) {
        self.errors_total.fetch_add(1, Ordering::Relaxed);
    }

    /// Marks a connection open until the returned guard is dropped.
    pub fn connection_opened(&self) -> ConnectionGuard<'_> {
        self.connections_total.fetch_add(1, Ordering::Relaxed);
        self.connections_active.fetch_add(1, Ordering::Relaxed);
        ConnectionGuard { metrics: self }
    }

    /// Records a successful snapshot save.
    pub fn record_snapshot_saved(&self, keys: usize, bytes: u64, elapsed: Duration) {
        self.snapshots_saved.fetch_add(1, Ordering::Relaxed);
        self.last_snapshot_keys.store(keys as u64, Ordering::Relaxed);
        self.last_snapshot_bytes.store(bytes, Ordering::Relaxed);
        self.last_snapshot_us
            .store(elapsed.as_micros() as u64, Ordering::Relaxed);
    }

    /// Records a failed snapshot save.
    pub fn record_snapshot_failed(&self) {
        self.snapshots_failed.fetch_add(1, Ordering::Relaxed);
    }

    /// Returns a snapshot of all counters and histogram buckets.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            requests_total: self.requests_total.load(Ordering::Relaxed),
            errors_total: self.errors_total.load(Ordering::Relaxed),
            inflight: self.inflight.load(Ordering::Relaxed),
            connections_active: self.connections_active.load(Ordering::Relaxed),
            connections_total: self.connections_total.load(Ordering::Relaxed),
            latency: self.latency.snapshot(),
            snapshots: SnapshotStats {
                saved: self.snapshots_saved.load(Ordering::Relaxed),
                failed: self.snapshots_failed.load(Ordering::Relaxed),
                last_keys: self.last_snapshot_keys.load(Ordering::Relaxed),
                last_bytes: self.last_snapshot_bytes.load(Ordering::Relaxed),
                last_duration_us: self.last_snapshot_us.load(Ordering::Relaxed),
            },
        }
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Metrics::new()
    }
}

/// Decrements the active-connection gauge on drop.
pub struct ConnectionGuard<'a> {
    metrics: &'a Metrics,
}

impl Drop for ConnectionGuard<'_> {
    fn drop(&mut self) {
        self.metrics
            .connections_active
            .fetch_sub(1, Ordering::Relaxed);
    }
}

/// Fixed-bucket latency histogram.
pub struct LatencyHistogram {
    bounds_us: Vec<u64>,
    buckets: Vec<AtomicU64>,
    sum_us: AtomicU64,
    samples: AtomicU64,
}

impl LatencyHistogram {
    /// Creates a histogram with explicit bucket boundaries (microseconds).
    pub fn new(bounds_us: Vec<u64>) -> Self {
        let buckets = (0..=bounds_us.len()).map(|_| AtomicU64::new(0)).collect();

        LatencyHistogram {
            bounds_us,
            buckets,
            sum_us: AtomicU64::new(0),
            samples: AtomicU64::new(0),
        }
    }

    /// Records a latency measurement into the histogram.
    pub fn record(&self, latency: Duration) {
        let micros = latency.as_micros() as u64;
        self.samples.fetch_add(1, Ordering::Relaxed);
        self.sum_us.fetch_add(micros, Ordering::Relaxed);

        // First bucket whose bound is >= the sample; past the end is overflow.
        let bucket_idx = self.bounds_us.partition_point(|&bound| bound < micros);
        self.buckets[bucket_idx].fetch_add(1, Ordering::Relaxed);
    }

    /// Returns a point-in-time snapshot of the histogram.
    pub fn snapshot(&self) -> LatencySnapshot {
        let buckets: Vec<u64> = self
            .buckets
            .iter()
            .map(|b| b.load(Ordering::Relaxed))
            .collect();

        LatencySnapshot {
            bounds_us: self.bounds_us.clone(),
            buckets,
            samples: self.samples.load(Ordering::Relaxed),
            sum_us: self.sum_us.load(Ordering::Relaxed),
        }
    }
}
