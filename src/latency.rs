//! # Latency Reservoir
//!
//! An HDR-style latency histogram per endpoint and global, plus a bounded
//! ring of recent completion timestamps used to compute instantaneous RPS.
//!
//! The histogram covers `[1 ms, 60_000 ms]` at three significant figures,
//! matching the "load-testing tool" calibration used elsewhere in this
//! pack — enough precision to distinguish a 12ms response from a 13ms one
//! without needing per-microsecond buckets.

use hdrhistogram::Histogram;
use std::collections::VecDeque;
use std::time::{Duration, Instant};

const HISTOGRAM_MIN_MS: u64 = 1;
const HISTOGRAM_MAX_MS: u64 = 60_000;
const HISTOGRAM_SIGNIFICANT_DIGITS: u8 = 3;
const RING_CAPACITY: usize = 10_000;
const RPS_WINDOW: Duration = Duration::from_millis(1_000);

/// A percentile/summary snapshot of a [`LatencyReservoir`].
#[derive(Debug, Clone, Copy)]
pub struct LatencySnapshot {
    pub count: u64,
    pub mean_ms: f64,
    pub min_ms: u64,
    pub max_ms: u64,
    pub p50_ms: u64,
    pub p95_ms: u64,
    pub p99_ms: u64,
}

/// Records latencies into an HDR histogram with a bounded ring of recent
/// completion instants for instantaneous RPS.
pub struct LatencyReservoir {
    histogram: Histogram<u64>,
    recent_completions: VecDeque<Instant>,
}

impl LatencyReservoir {
    pub fn new() -> Self {
        Self {
            histogram: Histogram::new_with_bounds(
                HISTOGRAM_MIN_MS,
                HISTOGRAM_MAX_MS,
                HISTOGRAM_SIGNIFICANT_DIGITS,
            )
            .expect("histogram bounds are valid constants"),
            recent_completions: VecDeque::with_capacity(RING_CAPACITY),
        }
    }

    /// Records a latency in milliseconds and a completion timestamp.
    ///
    /// Values above the histogram's configured max are clamped rather than
    /// rejected, so an unusually slow response never silently drops from
    /// the aggregate counts.
    pub fn record(&mut self, latency_ms: u64, completed_at: Instant) {
        let clamped = latency_ms.clamp(HISTOGRAM_MIN_MS, HISTOGRAM_MAX_MS);
        // record() only fails for values outside the configured range,
        // which clamping above already rules out.
        let _ = self.histogram.record(clamped);

        if self.recent_completions.len() == RING_CAPACITY {
            self.recent_completions.pop_front();
        }
        self.recent_completions.push_back(completed_at);
    }

    /// Number of completions within the last 1,000 ms, walking the ring
    /// backward from the most recent entry and stopping at the first one
    /// older than the cutoff.
    pub fn current_rps(&self) -> u64 {
        let now = Instant::now();
        let cutoff = now.checked_sub(RPS_WINDOW).unwrap_or(now);
        let mut count = 0u64;
        for completion in self.recent_completions.iter().rev() {
            if *completion < cutoff {
                break;
            }
            count += 1;
        }
        count
    }

    pub fn snapshot(&self) -> LatencySnapshot {
        LatencySnapshot {
            count: self.histogram.len(),
            mean_ms: self.histogram.mean(),
            min_ms: if self.histogram.len() == 0 {
                0
            } else {
                self.histogram.min()
            },
            max_ms: self.histogram.max(),
            p50_ms: self.histogram.value_at_quantile(0.50),
            p95_ms: self.histogram.value_at_quantile(0.95),
            p99_ms: self.histogram.value_at_quantile(0.99),
        }
    }

    pub fn total_count(&self) -> u64 {
        self.histogram.len()
    }
}

impl Default for LatencyReservoir {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_and_reports_percentiles() {
        let mut reservoir = LatencyReservoir::new();
        for ms in [10, 20, 30, 40, 50] {
            reservoir.record(ms, Instant::now());
        }
        let snap = reservoir.snapshot();
        assert_eq!(snap.count, 5);
        assert_eq!(snap.min_ms, 10);
        assert_eq!(snap.max_ms, 50);
        assert!(snap.p50_ms >= 20 && snap.p50_ms <= 40);
    }

    #[test]
    fn current_rps_excludes_old_completions() {
        let mut reservoir = LatencyReservoir::new();
        let old = Instant::now() - Duration::from_secs(5);
        reservoir.record(5, old);
        reservoir.record(5, Instant::now());
        assert_eq!(reservoir.current_rps(), 1);
    }

    #[test]
    fn ring_overwrites_oldest_on_wrap() {
        let mut reservoir = LatencyReservoir::new();
        for _ in 0..(RING_CAPACITY + 10) {
            reservoir.record(1, Instant::now());
        }
        assert_eq!(reservoir.recent_completions.len(), RING_CAPACITY);
    }

    #[test]
    fn out_of_range_latency_is_clamped_not_dropped() {
        let mut reservoir = LatencyReservoir::new();
        reservoir.record(1_000_000, Instant::now());
        assert_eq!(reservoir.total_count(), 1);
    }
}
