// ── Reconciliation coordinator ──
//
// The side-effectful orchestrator around the StateCalculator: health
// gate, snapshot load, system lookup, Desired persistence, event
// emission, audit. Per-call sequence is serial; concurrency across calls
// is mediated by the twin store's per-device CAS.

use std::collections::BTreeMap;
use std::sync::Arc;

use strum::Display;
use tracing::{debug, error, warn};

use crate::audit::{self, AuditSink};
use crate::calc::{CalculationResult, DesiredSource, StateCalculator};
use crate::error::CoreError;
use crate::event::{EventBus, TwinEvent};
use crate::health::HealthMonitor;
use crate::metrics::KernelMetrics;
use crate::model::{
    AuditEntry, Capability, CorrelationId, DecisionType, DesiredDeviceState, DeviceId,
    DeviceTwinSnapshot, FunctionalSystem,
};
use crate::store::{FunctionalSystemRegistry, TwinStore};

/// What a reconcile pass concluded.
#[derive(Debug, Clone, PartialEq, Eq, Display)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum ReconcileOutcome {
    /// A Desired value was persisted and announced.
    Success,
    /// Nothing to do (no proposal, or device is not an actuator).
    NoChange,
    /// Safety refused; no Desired written.
    SafetyRefused,
    DeviceNotFound,
    /// Fail-stop: infrastructure is down, nothing was touched.
    InfrastructureUnavailable,
    Error { message: String },
}

/// Orchestrates one reconcile pass end to end.
pub struct ReconciliationCoordinator {
    twins: Arc<TwinStore>,
    systems: Arc<FunctionalSystemRegistry>,
    calculator: StateCalculator,
    health: Arc<HealthMonitor>,
    audit: Arc<dyn AuditSink>,
    events: EventBus,
    metrics: Arc<KernelMetrics>,
}

impl ReconciliationCoordinator {
    pub fn new(
        twins: Arc<TwinStore>,
        systems: Arc<FunctionalSystemRegistry>,
        calculator: StateCalculator,
        health: Arc<HealthMonitor>,
        audit: Arc<dyn AuditSink>,
        events: EventBus,
        metrics: Arc<KernelMetrics>,
    ) -> Self {
        Self {
            twins,
            systems,
            calculator,
            health,
            audit,
            events,
            metrics,
        }
    }

    /// Reconcile by device id: load the snapshot, then run the pass.
    pub async fn reconcile(
        &self,
        device_id: &DeviceId,
        metadata: BTreeMap<String, String>,
    ) -> ReconcileOutcome {
        // 1. Fail-stop gate before anything is read or written.
        if !self.health.is_healthy() {
            self.metrics.reconcile_unavailable.incr();
            let components = self.health.snapshot().unhealthy_components();
            warn!(device = %device_id, down = ?components, "reconcile skipped, infrastructure down");
            return ReconcileOutcome::InfrastructureUnavailable;
        }

        // 2. Snapshot load.
        let snapshot = match self.twins.find_twin_snapshot(device_id) {
            Ok(Some(snapshot)) => snapshot,
            Ok(None) => {
                self.metrics.reconcile_not_found.incr();
                return ReconcileOutcome::DeviceNotFound;
            }
            Err(err) => return self.fail(device_id, err),
        };

        // 3. System lookup (optional).
        let system = self.systems.system_for_device(device_id);

        self.reconcile_snapshot(snapshot, system, metadata).await
    }

    /// Reconcile a pre-loaded snapshot.
    pub async fn reconcile_snapshot(
        &self,
        snapshot: DeviceTwinSnapshot,
        system: Option<Arc<FunctionalSystem>>,
        metadata: BTreeMap<String, String>,
    ) -> ReconcileOutcome {
        if !self.health.is_healthy() {
            self.metrics.reconcile_unavailable.incr();
            return ReconcileOutcome::InfrastructureUnavailable;
        }

        // Only actuators are reconciled; sensor twins never get Desired.
        if snapshot.device_type.capability() != Capability::Output {
            self.metrics.reconcile_no_change.incr();
            return ReconcileOutcome::NoChange;
        }

        let correlation_id = CorrelationId::new();
        let system_id = system.as_ref().map(|s| s.id.clone());

        // 4. Decide.
        let result = self
            .calculator
            .calculate(&snapshot, system, metadata)
            .await;

        // 5-7. Act on the decision.
        match result.source {
            DesiredSource::Intent | DesiredSource::Override | DesiredSource::SafetyModified => {
                match self
                    .persist_and_announce(&snapshot, &result, correlation_id)
                    .await
                {
                    Ok(()) => {
                        self.audit_success(&snapshot, &result, correlation_id, system_id)
                            .await;
                        self.metrics.reconcile_success.incr();
                        ReconcileOutcome::Success
                    }
                    Err(err) => self.fail(&snapshot.device_id, err),
                }
            }
            DesiredSource::SafetyRefused => {
                self.metrics.reconcile_refused.incr();
                debug!(device = %snapshot.device_id, reason = %result.reason, "safety refused");
                let decision = if result.override_category.is_some() {
                    DecisionType::OverrideBlocked
                } else {
                    DecisionType::IntentRejected
                };
                let entry = AuditEntry::new(
                    correlation_id,
                    decision,
                    "safety-engine",
                    result.reason.clone(),
                )
                .with_device(snapshot.device_id.clone())
                .with_values(result.original_value, None)
                .with_context("rules", result.evaluated_rule_ids.join(","));
                let entry = match result.suggested_value {
                    Some(suggested) => entry.with_context("suggested", suggested.to_string()),
                    None => entry,
                };
                let entry = match system_id {
                    Some(system_id) => entry.with_system(system_id),
                    None => entry,
                };
                audit::record(self.audit.as_ref(), &self.metrics, entry).await;
                ReconcileOutcome::SafetyRefused
            }
            DesiredSource::NoValue => {
                self.metrics.reconcile_no_change.incr();
                ReconcileOutcome::NoChange
            }
        }
    }

    async fn persist_and_announce(
        &self,
        snapshot: &DeviceTwinSnapshot,
        result: &CalculationResult,
        correlation_id: CorrelationId,
    ) -> Result<(), CoreError> {
        let value = result.value.ok_or_else(|| {
            CoreError::Internal("calculation produced Success source without a value".into())
        })?;

        // a. Persist Desired.
        let desired =
            DesiredDeviceState::new(snapshot.device_id.clone(), snapshot.device_type, value)?;
        self.twins.save_desired(desired).await?;

        // b. Announce.
        self.events.publish(TwinEvent::DesiredStateCalculated {
            device_id: snapshot.device_id.clone(),
            correlation_id,
        });
        Ok(())
    }

    /// c. Audit with a decision type derived from the source.
    async fn audit_success(
        &self,
        snapshot: &DeviceTwinSnapshot,
        result: &CalculationResult,
        correlation_id: CorrelationId,
        system_id: Option<crate::model::FunctionalSystemId>,
    ) {
        let decision = match result.source {
            DesiredSource::Intent => DecisionType::DesiredCalculated,
            DesiredSource::Override => DecisionType::OverrideApplied,
            DesiredSource::SafetyModified => DecisionType::SafetyRuleActivated,
            DesiredSource::SafetyRefused | DesiredSource::NoValue => return,
        };

        let previous = snapshot.desired.as_ref().map(|d| d.value);
        let entry = AuditEntry::new(correlation_id, decision, "logic-service", result.reason.clone())
            .with_device(snapshot.device_id.clone())
            .with_values(result.original_value.or(previous), result.value)
            .with_context("source", result.source.to_string());
        let entry = match &result.override_category {
            Some(category) => entry.with_context("override_category", category.to_string()),
            None => entry,
        };
        let entry = match system_id {
            Some(system_id) => entry.with_system(system_id),
            None => entry,
        };
        audit::record(self.audit.as_ref(), &self.metrics, entry).await;
    }

    fn fail(&self, device_id: &DeviceId, err: CoreError) -> ReconcileOutcome {
        self.metrics.reconcile_errors.incr();
        error!(device = %device_id, error = %err, "reconcile failed");
        ReconcileOutcome::Error {
            message: err.to_string(),
        }
    }
}
