//! Tail-divergence tracker: a bounded-memory percentile estimator that
//! derives an r-estimate from P99/P50.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// A non-negative duration sample.
pub type LatencySample = Duration;

struct RingState {
    buffer: Vec<Duration>,
    capacity: usize,
    write_index: usize,
    total: u64,
}

impl RingState {
    fn effective_len(&self) -> usize {
        (self.total.min(self.capacity as u64)) as usize
    }

    /// Snapshot of the live region, in insertion order (oldest first is not
    /// guaranteed; order does not matter for percentile/mean queries).
    fn snapshot(&self) -> Vec<Duration> {
        let len = self.effective_len();
        self.buffer[..len].to_vec()
    }
}

/// Bounded in-memory percentile estimator over the last `M` latency
/// samples, held in a fixed-capacity ring buffer. `record` is O(1);
/// percentile queries are O(k log k) where `k` is the effective sample
/// count.
pub struct TailDivergenceTracker {
    state: Mutex<RingState>,
}

impl TailDivergenceTracker {
    /// Create a tracker with the given capacity (minimum 1).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            state: Mutex::new(RingState {
                buffer: vec![Duration::ZERO; capacity],
                capacity,
                write_index: 0,
                total: 0,
            }),
        }
    }

    /// Record a single latency observation.
    pub fn record(&self, latency: Duration) {
        let mut state = self.state.lock();
        let idx = state.write_index;
        state.buffer[idx] = latency;
        state.write_index = (idx + 1) % state.capacity;
        state.total += 1;
        tracing::trace!(latency_us = latency.as_micros() as u64, "tail tracker record");
    }

    /// Number of samples currently live in the window (`min(total, M)`).
    pub fn len(&self) -> usize {
        self.state.lock().effective_len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// `p`-th percentile, `p` in `[0, 1]`. Returns `0` for an empty window.
    pub fn percentile(&self, p: f64) -> Duration {
        let live = { self.state.lock().snapshot() };
        percentile_of(&live, p)
    }

    /// Arithmetic mean over the live region. Unreliable under power-law
    /// tails; prefer percentiles.
    pub fn mean(&self) -> Duration {
        let live = { self.state.lock().snapshot() };
        if live.is_empty() {
            return Duration::ZERO;
        }
        let total_nanos: u128 = live.iter().map(|d| d.as_nanos()).sum();
        Duration::from_nanos((total_nanos / live.len() as u128) as u64)
    }

    /// Derived view over the tracker's current live window.
    pub fn stats(&self) -> TailStats {
        let live = { self.state.lock().snapshot() };
        TailStats::from_samples(&live)
    }
}

fn percentile_of(live: &[Duration], p: f64) -> Duration {
    let k = live.len();
    if k == 0 {
        return Duration::ZERO;
    }
    let mut sorted = live.to_vec();
    sorted.sort();
    let idx = (((k - 1) as f64) * p).floor() as usize;
    let idx = idx.min(k - 1);
    sorted[idx]
}

/// Derived statistics over a tail tracker's live window. Recomputed on
/// demand, never stored canonically.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TailStats {
    pub mean: Duration,
    pub p50: Duration,
    pub p99: Duration,
    pub p999: Duration,
    /// P99/P50. `1.0` when P50 is zero.
    pub tail_ratio: f64,
    /// Estimated Pareto shape parameter; `0.0` if not estimable.
    pub pareto_alpha: f64,
    /// Coupling estimate derived from the tail ratio.
    pub estimated_r: f64,
    pub is_gaussian: bool,
    pub is_power_law: bool,
}

impl TailStats {
    fn from_samples(live: &[Duration]) -> Self {
        let mean = if live.is_empty() {
            Duration::ZERO
        } else {
            let total: u128 = live.iter().map(|d| d.as_nanos()).sum();
            Duration::from_nanos((total / live.len() as u128) as u64)
        };
        let p50 = percentile_of(live, 0.50);
        let p99 = percentile_of(live, 0.99);
        let p999 = percentile_of(live, 0.999);
        let tail_ratio = tail_ratio(p50, p99);
        let pareto_alpha = pareto_index(tail_ratio);
        let estimated_r = estimate_r(tail_ratio);
        Self {
            mean,
            p50,
            p99,
            p999,
            tail_ratio,
            pareto_alpha,
            estimated_r,
            is_gaussian: tail_ratio < 3.0,
            is_power_law: tail_ratio > 10.0,
        }
    }
}

fn tail_ratio(p50: Duration, p99: Duration) -> f64 {
    let p50s = p50.as_secs_f64();
    if p50s == 0.0 {
        1.0
    } else {
        p99.as_secs_f64() / p50s
    }
}

/// `α = ln(0.99/0.50) / ln(P99/P50)`; `0` if the denominator is non-positive.
fn pareto_index(ratio: f64) -> f64 {
    if ratio <= 0.0 {
        return 0.0;
    }
    let denom = ratio.ln();
    if denom <= 0.0 {
        0.0
    } else {
        (0.99_f64 / 0.50).ln() / denom
    }
}

/// Piecewise-linear map of tail ratio to a coupling estimate.
fn estimate_r(ratio: f64) -> f64 {
    if ratio < 3.0 {
        1.5 + (ratio / 3.0) * 0.5
    } else if ratio < 10.0 {
        2.0 + ((ratio - 3.0) / 7.0) * 1.0
    } else if ratio < 100.0 {
        3.0 + ((ratio - 10.0) / 90.0) * 1.0
    } else {
        4.0 + ((ratio - 100.0) / 100.0).min(1.0)
    }
}
