use std::sync::atomic::{AtomicU64, Ordering};

/// Counters for call chain activity.
#[derive(Debug, Default)]
pub struct SupervisorMetrics {
    chains_started: AtomicU64,
    chains_completed: AtomicU64,
    chains_aborted: AtomicU64,
    frames_dispatched: AtomicU64,
    results_cached: AtomicU64,
    transactions_submitted: AtomicU64,
    transactions_failed: AtomicU64,
}

impl SupervisorMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_chain_started(&self) {
        self.chains_started.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_chain_completed(&self) {
        self.chains_completed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_chain_aborted(&self) {
        self.chains_aborted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_frame_dispatched(&self) {
        self.frames_dispatched.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_result_cached(&self) {
        self.results_cached.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_transaction_submitted(&self) {
        self.transactions_submitted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_transaction_failed(&self) {
        self.transactions_failed.fetch_add(1, Ordering::Relaxed);
    }

    /// Get a snapshot of all metrics.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            chains_started: self.chains_started.load(Ordering::Relaxed),
            chains_completed: self.chains_completed.load(Ordering::Relaxed),
            chains_aborted: self.chains_aborted.load(Ordering::Relaxed),
            frames_dispatched: self.frames_dispatched.load(Ordering::Relaxed),
            results_cached: self.results_cached.load(Ordering::Relaxed),
            transactions_submitted: self.transactions_submitted.load(Ordering::Relaxed),
            transactions_failed: self.transactions_failed.load(Ordering::Relaxed),
        }
    }
}

/// A point-in-time snapshot of supervisor metrics.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct MetricsSnapshot {
    pub chains_started: u64,
    pub chains_completed: u64,
    pub chains_aborted: u64,
    pub frames_dispatched: u64,
    pub results_cached: u64,
    pub transactions_submitted: u64,
    pub transactions_failed: u64,
}
