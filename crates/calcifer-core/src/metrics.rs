// ── Kernel metrics ──
//
// Lock-free counters shared across services. Constructed once at kernel
// startup, torn down with it; readers take point-in-time snapshots.

use std::sync::atomic::{AtomicU64, Ordering};

/// Counter registry for the kernel. All updates are relaxed atomics --
/// these feed dashboards, not control flow.
#[derive(Debug, Default)]
pub struct KernelMetrics {
    // Reconciliation outcomes
    pub reconcile_success: Counter,
    pub reconcile_no_change: Counter,
    pub reconcile_refused: Counter,
    pub reconcile_not_found: Counter,
    pub reconcile_unavailable: Counter,
    pub reconcile_errors: Counter,

    // Twin store
    pub cas_conflicts: Counter,
    pub cas_exhausted: Counter,

    // Dispatcher
    pub commands_sent: Counter,
    pub commands_debounced: Counter,
    pub skipped_unhealthy: Counter,
    pub skipped_converged: Counter,

    // Inbound feedback
    pub feedback_accepted: Counter,
    pub feedback_deduplicated: Counter,
    pub feedback_rejected: Counter,

    // Override lifecycle
    pub overrides_applied: Counter,
    pub overrides_blocked: Counter,
    pub overrides_expired: Counter,

    // Degraded paths
    pub audit_failures: Counter,
    pub rule_failures: Counter,
}

impl KernelMetrics {
    pub fn new() -> Self {
        Self::default()
    }
}

/// A single monotonically increasing counter.
#[derive(Debug, Default)]
pub struct Counter(AtomicU64);

impl Counter {
    pub fn incr(&self) {
        self.0.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add(&self, n: u64) {
        self.0.fetch_add(n, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}
