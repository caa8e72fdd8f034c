//! Observability for the stream engine
//!
//! Counter-based metrics covering ingestion throughput, retention
//! pruning, connection churn, and compute cache effectiveness, plus a
//! small latency tracker for dispatch timing. Everything is exported as
//! a flat map for Prometheus-style exposition by the embedding
//! application.

use std::collections::BTreeMap;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

/// Core metrics for the stream engine.
pub struct EngineMetrics {
    // Ingestion
    pub frames_ingested: AtomicU64,
    pub parse_errors: AtomicU64,

    // Retention
    pub items_pruned: AtomicU64,
    pub critical_pruned: AtomicU64,

    // Connection lifecycle
    pub reconnects_scheduled: AtomicU64,
    pub fatal_closes: AtomicU64,
    pub probes_sent: AtomicU64,

    // Compute
    pub compute_requests: AtomicU64,
    pub stale_responses_discarded: AtomicU64,
    pub cache_hits: AtomicU64,
    pub cache_misses: AtomicU64,

    // Dispatch timing
    pub dispatch_latency_ns: Mutex<LatencyTracker>,
}

impl EngineMetrics {
    pub fn new() -> Self {
        Self {
            frames_ingested: AtomicU64::new(0),
            parse_errors: AtomicU64::new(0),
            items_pruned: AtomicU64::new(0),
            critical_pruned: AtomicU64::new(0),
            reconnects_scheduled: AtomicU64::new(0),
            fatal_closes: AtomicU64::new(0),
            probes_sent: AtomicU64::new(0),
            compute_requests: AtomicU64::new(0),
            stale_responses_discarded: AtomicU64::new(0),
            cache_hits: AtomicU64::new(0),
            cache_misses: AtomicU64::new(0),
            dispatch_latency_ns: Mutex::new(LatencyTracker::new(1000)),
        }
    }

    pub fn record_frame_ingested(&self) {
        self.frames_ingested.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_parse_error(&self) {
        self.parse_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_pruned(&self, count: u64) {
        self.items_pruned.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_critical_pruned(&self, count: u64) {
        self.critical_pruned.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_reconnect_scheduled(&self) {
        self.reconnects_scheduled.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_fatal_close(&self) {
        self.fatal_closes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_probe_sent(&self) {
        self.probes_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_compute_request(&self) {
        self.compute_requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_stale_discarded(&self) {
        self.stale_responses_discarded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cache_hit(&self) {
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cache_miss(&self) {
        self.cache_misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dispatch_latency(&self, latency_ns: u64) {
        if let Ok(mut tracker) = self.dispatch_latency_ns.lock() {
            tracker.record(latency_ns);
        }
    }

    /// Export counters as a flat map for exposition.
    pub fn export(&self) -> BTreeMap<String, u64> {
        let mut m = BTreeMap::new();
        m.insert("frames_ingested".to_string(), self.frames_ingested.load(Ordering::Relaxed));
        m.insert("parse_errors".to_string(), self.parse_errors.load(Ordering::Relaxed));
        m.insert("items_pruned".to_string(), self.items_pruned.load(Ordering::Relaxed));
        m.insert("critical_pruned".to_string(), self.critical_pruned.load(Ordering::Relaxed));
        m.insert("reconnects_scheduled".to_string(), self.reconnects_scheduled.load(Ordering::Relaxed));
        m.insert("fatal_closes".to_string(), self.fatal_closes.load(Ordering::Relaxed));
        m.insert("probes_sent".to_string(), self.probes_sent.load(Ordering::Relaxed));
        m.insert("compute_requests".to_string(), self.compute_requests.load(Ordering::Relaxed));
        m.insert("stale_responses_discarded".to_string(), self.stale_responses_discarded.load(Ordering::Relaxed));
        m.insert("cache_hits".to_string(), self.cache_hits.load(Ordering::Relaxed));
        m.insert("cache_misses".to_string(), self.cache_misses.load(Ordering::Relaxed));
        m
    }
}

impl Default for EngineMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Sliding-window latency samples for percentile calculation.
pub struct LatencyTracker {
    samples: VecDeque<u64>,
    max_samples: usize,
}

impl LatencyTracker {
    pub fn new(max_samples: usize) -> Self {
        Self {
            samples: VecDeque::with_capacity(max_samples),
            max_samples,
        }
    }

    pub fn record(&mut self, value: u64) {
        if self.samples.len() >= self.max_samples {
            self.samples.pop_front();
        }
        self.samples.push_back(value);
    }

    /// Percentile value (0-100) over the current window.
    pub fn percentile(&self, p: usize) -> Option<u64> {
        if self.samples.is_empty() {
            return None;
        }

        let mut sorted: Vec<u64> = self.samples.iter().copied().collect();
        sorted.sort_unstable();

        let idx = (p as f64 / 100.0 * (sorted.len() - 1) as f64) as usize;
        Some(sorted[idx.min(sorted.len() - 1)])
    }

    pub fn average(&self) -> Option<u64> {
        if self.samples.is_empty() {
            return None;
        }
        let sum: u64 = self.samples.iter().sum();
        Some(sum / self.samples.len() as u64)
    }

    pub fn count(&self) -> usize {
        self.samples.len()
    }
}
