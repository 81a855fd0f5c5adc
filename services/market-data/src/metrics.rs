//! Pipeline counters
//!
//! Lock-free counters updated from the driver loop, plus a bounded batch
//! latency window. Everything is exported as a flat name → value map.

use std::collections::{BTreeMap, VecDeque};
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

/// Counters for one pipeline run.
pub struct PipelineMetrics {
    pub ticks_processed: AtomicU64,
    pub batches: AtomicU64,
    pub idle_polls: AtomicU64,
    pub bar_1m_rows: AtomicU64,
    pub bar_5m_rows: AtomicU64,
    pub day_rows: AtomicU64,
    /// Wall clock minus the receipt time of the newest tick, in ms.
    pub lag_ms: AtomicU64,
    batch_latency_ns: Mutex<LatencyWindow>,
}

impl PipelineMetrics {
    pub fn new() -> Self {
        Self {
            ticks_processed: AtomicU64::new(0),
            batches: AtomicU64::new(0),
            idle_polls: AtomicU64::new(0),
            bar_1m_rows: AtomicU64::new(0),
            bar_5m_rows: AtomicU64::new(0),
            day_rows: AtomicU64::new(0),
            lag_ms: AtomicU64::new(0),
            batch_latency_ns: Mutex::new(LatencyWindow::new(1000)),
        }
    }

    pub fn record_batch(&self, ticks: u64, latency_ns: u64) {
        self.ticks_processed.fetch_add(ticks, Ordering::Relaxed);
        self.batches.fetch_add(1, Ordering::Relaxed);
        if let Ok(mut tracker) = self.batch_latency_ns.lock() {
            tracker.record(latency_ns);
        }
    }

    pub fn record_rows(&self, bar_1m: usize, bar_5m: usize, day: usize) {
        self.bar_1m_rows.fetch_add(bar_1m as u64, Ordering::Relaxed);
        self.bar_5m_rows.fetch_add(bar_5m as u64, Ordering::Relaxed);
        self.day_rows.fetch_add(day as u64, Ordering::Relaxed);
    }

    pub fn record_idle(&self) {
        self.idle_polls.fetch_add(1, Ordering::Relaxed);
    }

    /// Lag of the newest tick, given its receipt time and the wall clock (both ms).
    pub fn record_lag(&self, tick_now_ms: u64, wall_ms: u64) {
        self.lag_ms
            .store(wall_ms.saturating_sub(tick_now_ms), Ordering::Relaxed);
    }

    pub fn export(&self) -> BTreeMap<&'static str, u64> {
        let mut m = BTreeMap::new();
        m.insert("ticks_processed", self.ticks_processed.load(Ordering::Relaxed));
        m.insert("batches", self.batches.load(Ordering::Relaxed));
        m.insert("idle_polls", self.idle_polls.load(Ordering::Relaxed));
        m.insert("bar_1m_rows", self.bar_1m_rows.load(Ordering::Relaxed));
        m.insert("bar_5m_rows", self.bar_5m_rows.load(Ordering::Relaxed));
        m.insert("day_rows", self.day_rows.load(Ordering::Relaxed));
        m.insert("lag_ms", self.lag_ms.load(Ordering::Relaxed));
        if let Ok(tracker) = self.batch_latency_ns.lock() {
            if let Some(p99) = tracker.percentile(99) {
                m.insert("batch_p99_ns", p99);
            }
        }
        m
    }
}

impl Default for PipelineMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Last `capacity` latency samples.
pub struct LatencyWindow {
    samples: VecDeque<u64>,
    capacity: usize,
}

impl LatencyWindow {
    pub fn new(capacity: usize) -> Self {
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn record(&mut self, value: u64) {
        if self.samples.len() >= self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(value);
    }

    /// Nearest-rank percentile (0-100) of the window.
    pub fn percentile(&self, p: usize) -> Option<u64> {
        let mut sorted: Vec<u64> = self.samples.iter().copied().collect();
        sorted.sort_unstable();
        let last = sorted.len().checked_sub(1)?;
        Some(sorted[(last * p.min(100)) / 100])
    }
}
