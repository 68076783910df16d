//! RBAC pipeline metrics
//!
//! Monotone counters plus a queue gauge and a validation-latency summary.
//! The counters satisfy, at any quiescent instant:
//! `processed = forwarded + rejected + timeouts + validation_errors + coordinator_errors`.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use serde::{Deserialize, Serialize};

const EMA_ALPHA: f64 = 0.2;

#[derive(Debug, Clone, Copy, Default)]
struct LatencySummary {
    count: u64,
    min_ms: f64,
    max_ms: f64,
    ema_ms: f64,
}

/// Live metrics for one interceptor
#[derive(Debug, Default)]
pub struct RbacMetrics {
    processed: AtomicU64,
    validated: AtomicU64,
    rejected: AtomicU64,
    forwarded: AtomicU64,
    timeouts: AtomicU64,
    validation_errors: AtomicU64,
    coordinator_errors: AtomicU64,
    queue_overflows: AtomicU64,
    queue_depth: AtomicUsize,
    queue_high_water: AtomicUsize,
    latency: Mutex<LatencySummary>,
}

/// Serializable snapshot published on the status topic
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RbacMetricsSnapshot {
    pub processed: u64,
    pub validated: u64,
    pub rejected: u64,
    pub forwarded: u64,
    pub timeouts: u64,
    pub validation_errors: u64,
    pub coordinator_errors: u64,
    pub queue_overflows: u64,
    pub queue_depth: usize,
    pub queue_high_water: usize,
    pub validation_count: u64,
    pub validation_min_ms: f64,
    pub validation_max_ms: f64,
    pub validation_ema_ms: f64,
}

impl RbacMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn incr_processed(&self) {
        self.processed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn incr_validated(&self) {
        self.validated.fetch_add(1, Ordering::Relaxed);
    }

    pub fn incr_rejected(&self) {
        self.rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn incr_forwarded(&self) {
        self.forwarded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn incr_timeouts(&self) {
        self.timeouts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn incr_validation_errors(&self) {
        self.validation_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn incr_coordinator_errors(&self) {
        self.coordinator_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn incr_queue_overflows(&self) {
        self.queue_overflows.fetch_add(1, Ordering::Relaxed);
    }

    /// Refresh the depth gauge and high-water mark from the queue
    pub fn set_queue_depth(&self, depth: usize, high_water: usize) {
        self.queue_depth.store(depth, Ordering::Relaxed);
        self.queue_high_water.store(high_water, Ordering::Relaxed);
    }

    /// Fold one security round-trip duration into the latency summary
    pub fn record_validation_time(&self, elapsed: Duration) {
        let ms = elapsed.as_secs_f64() * 1000.0;
        let mut summary = self.latency.lock().expect("latency lock poisoned");

        if summary.count == 0 {
            summary.min_ms = ms;
            summary.max_ms = ms;
            summary.ema_ms = ms;
        } else {
            summary.min_ms = summary.min_ms.min(ms);
            summary.max_ms = summary.max_ms.max(ms);
            summary.ema_ms = EMA_ALPHA * ms + (1.0 - EMA_ALPHA) * summary.ema_ms;
        }
        summary.count += 1;
    }

    pub fn snapshot(&self) -> RbacMetricsSnapshot {
        let latency = *self.latency.lock().expect("latency lock poisoned");
        RbacMetricsSnapshot {
            processed: self.processed.load(Ordering::Relaxed),
            validated: self.validated.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            forwarded: self.forwarded.load(Ordering::Relaxed),
            timeouts: self.timeouts.load(Ordering::Relaxed),
            validation_errors: self.validation_errors.load(Ordering::Relaxed),
            coordinator_errors: self.coordinator_errors.load(Ordering::Relaxed),
            queue_overflows: self.queue_overflows.load(Ordering::Relaxed),
            queue_depth: self.queue_depth.load(Ordering::Relaxed),
            queue_high_water: self.queue_high_water.load(Ordering::Relaxed),
            validation_count: latency.count,
            validation_min_ms: latency.min_ms,
            validation_max_ms: latency.max_ms,
            validation_ema_ms: latency.ema_ms,
        }
    }
}
