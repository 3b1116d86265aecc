//! Process-wide atomic counters for reconciliation activity.
//!
//! Counters are bumped silently at the call site. Call [`Metrics::flush`] at
//! natural boundaries (end of a refresh cycle, CLI exit) to emit the current
//! values as one `tracing::info!` event.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Global metrics singleton.
pub static METRICS: Metrics = Metrics::new();

/// Lock-free counters.
pub struct Metrics {
    ci_fetches: AtomicU64,
    ci_fetch_failures: AtomicU64,
    refresh_cycles: AtomicU64,
    gateway_calls: AtomicU64,
    suggestion_hits: AtomicU64,
    suggestion_misses: AtomicU64,
}

/// Point-in-time copy of every counter.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub ci_fetches: u64,
    pub ci_fetch_failures: u64,
    pub refresh_cycles: u64,
    pub gateway_calls: u64,
    pub suggestion_hits: u64,
    pub suggestion_misses: u64,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub const fn new() -> Self {
        Self {
            ci_fetches: AtomicU64::new(0),
            ci_fetch_failures: AtomicU64::new(0),
            refresh_cycles: AtomicU64::new(0),
            gateway_calls: AtomicU64::new(0),
            suggestion_hits: AtomicU64::new(0),
            suggestion_misses: AtomicU64::new(0),
        }
    }

    pub fn inc_ci_fetches(&self) {
        self.ci_fetches.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_ci_fetch_failures(&self) {
        self.ci_fetch_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Returns the cycle number just started (1-based).
    pub fn inc_refresh_cycles(&self) -> u64 {
        self.refresh_cycles.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn inc_gateway_calls(&self) {
        self.gateway_calls.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_suggestion_hits(&self) {
        self.suggestion_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_suggestion_misses(&self) {
        self.suggestion_misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            ci_fetches: self.ci_fetches.load(Ordering::Relaxed),
            ci_fetch_failures: self.ci_fetch_failures.load(Ordering::Relaxed),
            refresh_cycles: self.refresh_cycles.load(Ordering::Relaxed),
            gateway_calls: self.gateway_calls.load(Ordering::Relaxed),
            suggestion_hits: self.suggestion_hits.load(Ordering::Relaxed),
            suggestion_misses: self.suggestion_misses.load(Ordering::Relaxed),
        }
    }

    /// Emit all current counter values as a single `info!` event.
    pub fn flush(&self) {
        let s = self.snapshot();
        tracing::info!(
            metric = "flush",
            ci_fetches = s.ci_fetches,
            ci_fetch_failures = s.ci_fetch_failures,
            refresh_cycles = s.refresh_cycles,
            gateway_calls = s.gateway_calls,
            suggestion_hits = s.suggestion_hits,
            suggestion_misses = s.suggestion_misses,
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_local_counters_increment() {
        let m = Metrics::new();
        m.inc_ci_fetches();
        m.inc_ci_fetches();
        m.inc_gateway_calls();
        assert_eq!(m.inc_refresh_cycles(), 1);
        let s = m.snapshot();
        assert_eq!(s.ci_fetches, 2);
        assert_eq!(s.gateway_calls, 1);
        assert_eq!(s.refresh_cycles, 1);
        assert_eq!(s.suggestion_hits, 0);
    }
}
