/// This module tracks what happened during a dispatch round.
///
/// Counters are plain atomics behind `Arc`s so that a clone of [`DispatchMetrics`]
/// can be handed to every worker and updated without taking a lock. The only
/// non-trivial counter is the in-flight gauge, whose high water mark is kept with
/// a compare-exchange loop; it is what lets tests observe that the permit pool
/// really bounds the number of concurrently running tool processes.
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::info;

#[derive(Debug, Clone)]
pub struct DispatchMetrics {
    // Invocation metrics
    invocations: Arc<AtomicU64>,
    failed_invocations: Arc<AtomicU64>,
    tool_errors: Arc<AtomicU64>,

    // Parse metrics
    matches_parsed: Arc<AtomicU64>,

    // Concurrency metrics
    in_flight: Arc<AtomicU64>,
    peak_in_flight: Arc<AtomicU64>,
}

impl DispatchMetrics {
    /// Creates a new DispatchMetrics instance
    pub fn new() -> Self {
        Self {
            invocations: Arc::new(AtomicU64::new(0)),
            failed_invocations: Arc::new(AtomicU64::new(0)),
            tool_errors: Arc::new(AtomicU64::new(0)),
            matches_parsed: Arc::new(AtomicU64::new(0)),
            in_flight: Arc::new(AtomicU64::new(0)),
            peak_in_flight: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Records the start of a tool invocation
    pub fn record_start(&self) {
        self.invocations.fetch_add(1, Ordering::Relaxed);
        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        let mut peak = self.peak_in_flight.load(Ordering::SeqCst);
        while current > peak {
            match self.peak_in_flight.compare_exchange_weak(
                peak,
                current,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => break,
                Err(observed) => peak = observed,
            }
        }
    }

    /// Records the end of a tool invocation, successful or not
    pub fn record_finish(&self) {
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }

    /// Records an invocation that could not be completed
    pub fn record_failure(&self) {
        self.failed_invocations.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a non-empty error stream
    pub fn record_tool_error(&self) {
        self.tool_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Records matches parsed from one invocation, before deduplication
    pub fn record_matches(&self, count: usize) {
        self.matches_parsed
            .fetch_add(count as u64, Ordering::Relaxed);
    }

    /// Gets the current counters
    pub fn get_stats(&self) -> DispatchStats {
        DispatchStats {
            invocations: self.invocations.load(Ordering::Relaxed),
            failed_invocations: self.failed_invocations.load(Ordering::Relaxed),
            tool_errors: self.tool_errors.load(Ordering::Relaxed),
            matches_parsed: self.matches_parsed.load(Ordering::Relaxed),
            in_flight: self.in_flight.load(Ordering::SeqCst),
            peak_in_flight: self.peak_in_flight.load(Ordering::SeqCst),
        }
    }

    /// Logs the current counters
    pub fn log_stats(&self) {
        let stats = self.get_stats();
        info!(
            "Dispatch stats:\n\
             Invocations: {}\n\
             Failed invocations: {}\n\
             Tool errors: {}\n\
             Matches parsed: {}\n\
             Peak in flight: {}",
            stats.invocations,
            stats.failed_invocations,
            stats.tool_errors,
            stats.matches_parsed,
            stats.peak_in_flight
        );
    }
}

impl Default for DispatchMetrics {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchStats {
    pub invocations: u64,
    pub failed_invocations: u64,
    pub tool_errors: u64,
    pub matches_parsed: u64,
    pub in_flight: u64,
    pub peak_in_flight: u64,
}
