// ── Kernel runtime configuration ──
//
// Tuning knobs for the kernel's timing and concurrency behavior. Built by
// the daemon from `calcifer-config` and handed in -- the core never reads
// config files itself.

use std::time::Duration;

/// Timing and concurrency tuning for a running kernel.
#[derive(Debug, Clone)]
pub struct KernelConfig {
    /// Per-device command debounce window.
    pub debounce: Duration,
    /// Grace window for flushing pending dispatch timers at shutdown.
    pub dispatch_grace: Duration,
    /// Override expiration sweep period.
    pub sweep_interval: Duration,
    /// Health poll period.
    pub health_check_interval: Duration,
    /// Per-rule safety evaluation cap.
    pub rule_evaluation_timeout: Duration,
    /// Twin store optimistic-concurrency retry budget.
    pub cas_max_retries: u32,
    /// First CAS backoff step; doubles per retry.
    pub cas_backoff_initial: Duration,
    /// Inbound feedback dedup window.
    pub idempotency_ttl: Duration,
    /// Upper bound on concurrently running reconciles.
    pub max_concurrent_reconciles: usize,
    /// Orphan-index sweep period.
    pub housekeeping_interval: Duration,
    /// Devices quiet for longer than this are flagged (never deleted).
    pub staleness_threshold: Duration,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            debounce: Duration::from_millis(50),
            dispatch_grace: Duration::from_millis(500),
            sweep_interval: Duration::from_secs(60),
            health_check_interval: Duration::from_secs(5),
            rule_evaluation_timeout: Duration::from_millis(100),
            cas_max_retries: 3,
            cas_backoff_initial: Duration::from_millis(10),
            idempotency_ttl: Duration::from_secs(300),
            max_concurrent_reconciles: 8,
            housekeeping_interval: Duration::from_secs(24 * 60 * 60),
            staleness_threshold: Duration::from_secs(7 * 24 * 60 * 60),
        }
    }
}
