// ── Logic service ──
//
// The event fabric's consumer: every twin mutation event becomes a
// reconcile job. SYSTEM-scope override events fan out to member devices.
// Concurrency is bounded by a semaphore; when all permits are taken the
// job runs on the submitter, which is the backpressure valve -- the event
// loop slows down instead of queueing unboundedly.

use std::collections::BTreeMap;
use std::sync::Arc;

use tokio::sync::{Semaphore, broadcast};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, warn};

use crate::event::TwinEvent;
use crate::model::{DeviceId, OverrideTarget};
use crate::reconcile::ReconciliationCoordinator;
use crate::store::FunctionalSystemRegistry;

/// Subscribes to the fabric and turns events into reconcile jobs.
pub struct LogicService {
    coordinator: Arc<ReconciliationCoordinator>,
    systems: Arc<FunctionalSystemRegistry>,
    permits: Arc<Semaphore>,
    jobs: TaskTracker,
}

impl LogicService {
    pub fn new(
        coordinator: Arc<ReconciliationCoordinator>,
        systems: Arc<FunctionalSystemRegistry>,
        max_concurrent: usize,
    ) -> Self {
        Self {
            coordinator,
            systems,
            permits: Arc::new(Semaphore::new(max_concurrent.max(1))),
            jobs: TaskTracker::new(),
        }
    }

    /// Event loop. Ordering within a device is not guaranteed; the
    /// calculator is pure, so last-writer-wins on Desired is acceptable
    /// and the dispatcher's debounce absorbs the churn.
    pub async fn run(
        self: Arc<Self>,
        mut events: broadcast::Receiver<TwinEvent>,
        cancel: CancellationToken,
    ) {
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                result = events.recv() => {
                    match result {
                        Ok(event) => self.handle(event).await,
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            warn!(skipped, "logic service lagged behind the event fabric");
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    }
                }
            }
        }

        self.jobs.close();
        self.jobs.wait().await;
    }

    async fn handle(&self, event: TwinEvent) {
        match event {
            TwinEvent::IntentChanged { device_id } => {
                self.schedule(device_id, "intent-changed").await;
            }
            TwinEvent::ReportedChanged { device_id } => {
                self.schedule(device_id, "reported-changed").await;
            }
            TwinEvent::OverrideApplied { target, .. } => {
                self.fan_out(target, "override-applied").await;
            }
            TwinEvent::OverrideExpired { target, .. } => {
                self.fan_out(target, "override-expired").await;
            }
            TwinEvent::DesiredStateCalculated { .. }
            | TwinEvent::InfrastructureFailure { .. }
            | TwinEvent::InfrastructureRecovery { .. } => {}
        }
    }

    /// Expand a target to its affected devices and schedule each.
    async fn fan_out(&self, target: OverrideTarget, trigger: &'static str) {
        match target {
            OverrideTarget::Device(device_id) => self.schedule(device_id, trigger).await,
            OverrideTarget::System(system_id) => {
                let Some(system) = self.systems.get(&system_id) else {
                    debug!(system = %system_id, "override event for unknown system");
                    return;
                };
                for device_id in &system.device_ids {
                    self.schedule(device_id.clone(), trigger).await;
                }
            }
        }
    }

    /// Run a reconcile under the concurrency bound. With a free permit
    /// the job runs on the pool; with none it runs right here.
    async fn schedule(&self, device_id: DeviceId, trigger: &'static str) {
        let mut metadata = BTreeMap::new();
        metadata.insert("trigger".to_owned(), trigger.to_owned());

        match Arc::clone(&self.permits).try_acquire_owned() {
            Ok(permit) => {
                let coordinator = Arc::clone(&self.coordinator);
                self.jobs.spawn(async move {
                    let outcome = coordinator.reconcile(&device_id, metadata).await;
                    debug!(device = %device_id, %outcome, trigger, "reconcile finished");
                    drop(permit);
                });
            }
            Err(_) => {
                // Overflow: run on the submitter.
                let outcome = self.coordinator.reconcile(&device_id, metadata).await;
                debug!(device = %device_id, %outcome, trigger, "reconcile finished inline");
            }
        }
    }
}
