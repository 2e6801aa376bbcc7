// ── Override expiration sweeper ──
//
// Periodic pass over the durable store: delete every expired override,
// announce the expiry, audit it. Reconciliation of the affected devices
// happens through the fabric -- the logic service owns membership
// expansion for SYSTEM-scope targets, so the sweeper never reconciles
// directly. Per-override failures are logged and the cycle continues.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::audit::{self, AuditSink};
use crate::event::{EventBus, TwinEvent};
use crate::metrics::KernelMetrics;
use crate::model::{AuditEntry, CorrelationId, DecisionType, OverrideTarget};
use crate::store::OverrideStore;

/// Removes expired overrides on a fixed period.
pub struct OverrideExpirationSweeper {
    overrides: Arc<OverrideStore>,
    events: EventBus,
    audit: Arc<dyn AuditSink>,
    metrics: Arc<KernelMetrics>,
    interval: Duration,
}

impl OverrideExpirationSweeper {
    pub fn new(
        overrides: Arc<OverrideStore>,
        events: EventBus,
        audit: Arc<dyn AuditSink>,
        metrics: Arc<KernelMetrics>,
        interval: Duration,
    ) -> Self {
        Self {
            overrides,
            events,
            audit,
            metrics,
            interval,
        }
    }

    /// One sweep cycle. Returns how many overrides were removed.
    pub async fn sweep_once(&self) -> usize {
        let expired = match self.overrides.find_expired().await {
            Ok(expired) => expired,
            Err(err) => {
                warn!(error = %err, "expiration sweep could not list overrides");
                return 0;
            }
        };

        let mut removed = 0usize;
        for override_entry in expired {
            let target = override_entry.target.clone();
            let category = override_entry.category;

            match self
                .overrides
                .delete_by_target_and_category(&target.key(), category)
                .await
            {
                Ok(_) => {}
                Err(err) => {
                    warn!(%target, %category, error = %err, "failed to delete expired override");
                    continue;
                }
            }

            removed += 1;
            self.metrics.overrides_expired.incr();
            debug!(%target, %category, "override expired");

            // Announce; the logic service fans out the reconciles.
            self.events.publish(TwinEvent::OverrideExpired {
                target: target.clone(),
                category,
            });

            let entry = AuditEntry::new(
                CorrelationId::new(),
                DecisionType::OverrideExpired,
                "expiration-sweeper",
                override_entry.reason.clone(),
            )
            .with_values(Some(override_entry.value), None)
            .with_context("category", category.to_string())
            .with_context("target", target.to_string());
            let entry = match &target {
                OverrideTarget::Device(device_id) => entry.with_device(device_id.clone()),
                OverrideTarget::System(system_id) => entry.with_system(system_id.clone()),
            };
            audit::record(self.audit.as_ref(), &self.metrics, entry).await;
        }

        removed
    }

    /// Spawn the periodic sweep loop.
    pub fn spawn(self: &Arc<Self>, cancel: CancellationToken) -> JoinHandle<()> {
        let sweeper = Arc::clone(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(sweeper.interval);
            interval.tick().await; // consume the immediate first tick

            loop {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    _ = interval.tick() => {
                        let removed = sweeper.sweep_once().await;
                        if removed > 0 {
                            debug!(removed, "expiration sweep complete");
                        }
                    }
                }
            }
        })
    }
}
