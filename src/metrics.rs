//! Request metrics for the record service
//!
//! Lightweight, thread-safe counters recorded around each handled
//! connection: per-operation counts plus a bounded rolling window of
//! request latencies for percentile reporting. Collected server-wide
//! and summarized in a log line when the server stops; nothing is
//! exposed over the wire.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Instant;

/// Rolling window of recent request latencies retained for percentile
/// calculation.
const LATENCY_WINDOW_SIZE: usize = 256;

/// Thread-safe metrics collector. One instance per server.
pub struct Metrics {
    request_count: AtomicU64,
    post_count: AtomicU64,
    get_count: AtomicU64,
    shutdown_count: AtomicU64,
    invalid_count: AtomicU64,
    /// Protected by a mutex since VecDeque is not atomic.
    latencies_ms: Mutex<VecDeque<u64>>,
    started_at: Instant,
}

/// Point-in-time copy of all metrics, plain types only.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub request_count: u64,
    pub post_count: u64,
    pub get_count: u64,
    pub shutdown_count: u64,
    pub invalid_count: u64,
    /// Median request latency over the recent window
    pub latency_p50_ms: u64,
    /// 95th percentile request latency over the recent window
    pub latency_p95_ms: u64,
    pub uptime_secs: u64,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            request_count: AtomicU64::new(0),
            post_count: AtomicU64::new(0),
            get_count: AtomicU64::new(0),
            shutdown_count: AtomicU64::new(0),
            invalid_count: AtomicU64::new(0),
            latencies_ms: Mutex::new(VecDeque::with_capacity(LATENCY_WINDOW_SIZE)),
            started_at: Instant::now(),
        }
    }

    /// Record one handled request.
    ///
    /// `operation` must be one of "Post", "Get", "Shutdown"; anything
    /// else counts as invalid. O(1) amortized.
    pub fn record(&self, operation: &str, duration_ms: u64) {
        self.request_count.fetch_add(1, Ordering::Relaxed);
        let counter = match operation {
            "Post" => &self.post_count,
            "Get" => &self.get_count,
            "Shutdown" => &self.shutdown_count,
            _ => &self.invalid_count,
        };
        counter.fetch_add(1, Ordering::Relaxed);

        let mut latencies = self.latencies_ms.lock().unwrap();
        if latencies.len() >= LATENCY_WINDOW_SIZE {
            latencies.pop_front();
        }
        latencies.push_back(duration_ms);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let (p50, p95) = {
            let latencies = self.latencies_ms.lock().unwrap();
            if latencies.is_empty() {
                (0, 0)
            } else {
                let mut sorted: Vec<u64> = latencies.iter().copied().collect();
                sorted.sort_unstable();
                let len = sorted.len();
                (sorted[len * 50 / 100], sorted[len * 95 / 100])
            }
        };

        MetricsSnapshot {
            request_count: self.request_count.load(Ordering::Relaxed),
            post_count: self.post_count.load(Ordering::Relaxed),
            get_count: self.get_count.load(Ordering::Relaxed),
            shutdown_count: self.shutdown_count.load(Ordering::Relaxed),
            invalid_count: self.invalid_count.load(Ordering::Relaxed),
            latency_p50_ms: p50,
            latency_p95_ms: p95,
            uptime_secs: self.started_at.elapsed().as_secs(),
        }
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}
