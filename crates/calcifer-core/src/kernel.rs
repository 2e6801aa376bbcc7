// ── Kernel ──
//
// Composition root and lifecycle owner for the twin-state kernel.
// Constructs the stores, engine, and services; `start()` spawns the
// background tasks, `shutdown()` cancels and joins them. Explicitly
// constructed at startup, torn down at shutdown, never re-initialized.
//
// The kernel also carries the boundary operations the outer surfaces
// (REST, bus adapter) call into: intent submission, override pipeline,
// and feedback ingestion.

use std::collections::BTreeMap;
use std::sync::Arc;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use calcifer_bus::publisher::CommandPublisher;
use calcifer_bus::{FeedbackFrame, MemoryBus};

use crate::audit::{self, AuditSink, MemoryAuditSink};
use crate::calc::StateCalculator;
use crate::config::KernelConfig;
use crate::convert;
use crate::dispatch::CommandDispatcher;
use crate::error::CoreError;
use crate::event::{EventBus, TwinEvent};
use crate::health::{HealthMonitor, HealthProbe, StaticProbe};
use crate::idempotency::IdempotencyFilter;
use crate::logic::LogicService;
use crate::metrics::KernelMetrics;
use crate::model::{
    AuditEntry, Capability, CorrelationId, DecisionType, DeviceId, DeviceTwinSnapshot,
    DeviceType, DeviceValue, FunctionalSystem, Override, OverrideCategory, OverrideTarget,
    ReportedDeviceState, UserIntent,
};
use crate::reconcile::{ReconcileOutcome, ReconciliationCoordinator};
use crate::resolve::OverrideResolver;
use crate::safety::{SafetyContext, SafetyEngine, SafetyRule};
use crate::store::{
    FunctionalSystemRegistry, MemoryOverrideRepository, OverrideRepository, OverrideStore,
    TwinStore,
};
use crate::sweeper::OverrideExpirationSweeper;

// ── Builder ──────────────────────────────────────────────────────────

/// Assembles a kernel. Every seam defaults to the in-process
/// implementation; production deployments swap in real adapters.
pub struct KernelBuilder {
    config: KernelConfig,
    publisher: Option<Arc<dyn CommandPublisher>>,
    repository: Option<Arc<dyn OverrideRepository>>,
    audit: Option<Arc<dyn AuditSink>>,
    probes: Vec<Arc<dyn HealthProbe>>,
    extra_rules: Vec<Arc<dyn SafetyRule>>,
}

impl KernelBuilder {
    pub fn new(config: KernelConfig) -> Self {
        Self {
            config,
            publisher: None,
            repository: None,
            audit: None,
            probes: Vec::new(),
            extra_rules: Vec::new(),
        }
    }

    pub fn publisher(mut self, publisher: Arc<dyn CommandPublisher>) -> Self {
        self.publisher = Some(publisher);
        self
    }

    pub fn override_repository(mut self, repository: Arc<dyn OverrideRepository>) -> Self {
        self.repository = Some(repository);
        self
    }

    pub fn audit_sink(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit = Some(audit);
        self
    }

    pub fn health_probe(mut self, probe: Arc<dyn HealthProbe>) -> Self {
        self.probes.push(probe);
        self
    }

    /// Additional (declaratively loaded) safety rules on top of the
    /// hardcoded set.
    pub fn safety_rule(mut self, rule: Arc<dyn SafetyRule>) -> Self {
        self.extra_rules.push(rule);
        self
    }

    pub fn build(self) -> Kernel {
        let config = self.config;
        let metrics = Arc::new(KernelMetrics::new());
        let events = EventBus::new();

        let twins = Arc::new(TwinStore::new(&config, Arc::clone(&metrics)));
        let repository = self
            .repository
            .unwrap_or_else(|| Arc::new(MemoryOverrideRepository::new()));
        let overrides = Arc::new(OverrideStore::new(repository));
        let systems = Arc::new(FunctionalSystemRegistry::new());
        let audit = self
            .audit
            .unwrap_or_else(|| Arc::new(MemoryAuditSink::new()));
        let publisher = self
            .publisher
            .unwrap_or_else(|| Arc::new(MemoryBus::new()) as Arc<dyn CommandPublisher>);

        let mut rules: Vec<Arc<dyn SafetyRule>> = vec![
            Arc::new(crate::safety::FanSpeedLimitRule),
            Arc::new(crate::safety::FireRequiresPumpRule),
            Arc::new(crate::safety::PumpFollowsFireRule),
        ];
        rules.extend(self.extra_rules);
        let engine = Arc::new(SafetyEngine::with_rules(
            &config,
            Arc::clone(&metrics),
            rules,
        ));

        let probes = if self.probes.is_empty() {
            vec![
                Arc::new(StaticProbe::healthy("storage-primary")) as Arc<dyn HealthProbe>,
                Arc::new(StaticProbe::healthy("storage-cache")) as Arc<dyn HealthProbe>,
                Arc::new(StaticProbe::healthy("bus")) as Arc<dyn HealthProbe>,
            ]
        } else {
            self.probes
        };
        let health = Arc::new(HealthMonitor::new(&config, events.clone(), probes));

        let calculator = StateCalculator::new(
            OverrideResolver::new(Arc::clone(&overrides)),
            Arc::clone(&engine),
            Arc::clone(&twins),
        );
        let coordinator = Arc::new(ReconciliationCoordinator::new(
            Arc::clone(&twins),
            Arc::clone(&systems),
            calculator,
            Arc::clone(&health),
            Arc::clone(&audit),
            events.clone(),
            Arc::clone(&metrics),
        ));

        let logic = Arc::new(LogicService::new(
            Arc::clone(&coordinator),
            Arc::clone(&systems),
            config.max_concurrent_reconciles,
        ));
        let dispatcher = Arc::new(CommandDispatcher::new(
            Arc::clone(&twins),
            Arc::clone(&health),
            publisher,
            Arc::clone(&metrics),
            config.debounce,
            config.dispatch_grace,
        ));
        let sweeper = Arc::new(OverrideExpirationSweeper::new(
            Arc::clone(&overrides),
            events.clone(),
            Arc::clone(&audit),
            Arc::clone(&metrics),
            config.sweep_interval,
        ));
        let idempotency = IdempotencyFilter::new(config.idempotency_ttl);

        Kernel {
            inner: Arc::new(KernelInner {
                config,
                metrics,
                events,
                twins,
                overrides,
                systems,
                engine,
                coordinator,
                logic,
                dispatcher,
                sweeper,
                health,
                idempotency,
                audit,
                cancel: CancellationToken::new(),
                task_handles: Mutex::new(Vec::new()),
            }),
        }
    }
}

// ── Kernel ───────────────────────────────────────────────────────────

/// The assembled twin-state kernel. Cheaply cloneable.
#[derive(Clone)]
pub struct Kernel {
    inner: Arc<KernelInner>,
}

struct KernelInner {
    config: KernelConfig,
    metrics: Arc<KernelMetrics>,
    events: EventBus,
    twins: Arc<TwinStore>,
    overrides: Arc<OverrideStore>,
    systems: Arc<FunctionalSystemRegistry>,
    engine: Arc<SafetyEngine>,
    coordinator: Arc<ReconciliationCoordinator>,
    logic: Arc<LogicService>,
    dispatcher: Arc<CommandDispatcher>,
    sweeper: Arc<OverrideExpirationSweeper>,
    health: Arc<HealthMonitor>,
    idempotency: IdempotencyFilter,
    audit: Arc<dyn AuditSink>,
    cancel: CancellationToken,
    task_handles: Mutex<Vec<JoinHandle<()>>>,
}

impl Kernel {
    /// Builder with all-default in-process seams.
    pub fn builder(config: KernelConfig) -> KernelBuilder {
        KernelBuilder::new(config)
    }

    // ── Lifecycle ────────────────────────────────────────────────────

    /// Warm caches and spawn background services.
    pub async fn start(&self) -> Result<(), CoreError> {
        let warmed = self.inner.overrides.warmup().await?;

        let mut handles = self.inner.task_handles.lock().await;

        let logic = Arc::clone(&self.inner.logic);
        handles.push(tokio::spawn(logic.run(
            self.inner.events.subscribe(),
            self.inner.cancel.child_token(),
        )));

        let dispatcher = Arc::clone(&self.inner.dispatcher);
        handles.push(tokio::spawn(dispatcher.run(
            self.inner.events.subscribe(),
            self.inner.cancel.child_token(),
        )));

        handles.push(self.inner.health.spawn(self.inner.cancel.child_token()));
        handles.push(self.inner.sweeper.spawn(self.inner.cancel.child_token()));
        handles.push(self.spawn_housekeeping(self.inner.cancel.child_token()));
        handles.push(self.spawn_infrastructure_audit(self.inner.cancel.child_token()));

        info!(warmed_overrides = warmed, "kernel started");
        Ok(())
    }

    /// Cancel background services and join them. The dispatcher flushes
    /// pending debounce timers within its grace window on the way out.
    pub async fn shutdown(&self) {
        self.inner.cancel.cancel();
        let mut handles = self.inner.task_handles.lock().await;
        for handle in handles.drain(..) {
            let _ = handle.await;
        }
        info!("kernel stopped");
    }

    fn spawn_housekeeping(&self, cancel: CancellationToken) -> JoinHandle<()> {
        let twins = Arc::clone(&self.inner.twins);
        let kernel = self.clone();
        let interval_period = self.inner.config.housekeeping_interval;
        let staleness = self.inner.config.staleness_threshold;

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(interval_period);
            interval.tick().await; // consume the immediate first tick

            loop {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    _ = interval.tick() => {
                        let orphans = twins.sweep_orphan_index_entries();
                        if orphans > 0 {
                            warn!(orphans, "orphan index entries removed");
                        }

                        let threshold = chrono::Duration::from_std(staleness)
                            .unwrap_or_else(|_| chrono::Duration::days(7));
                        for device_id in twins.find_stale_devices(threshold) {
                            warn!(device = %device_id, "device has been silent past the staleness threshold");
                        }

                        let purged = kernel.inner.idempotency.purge_expired();
                        if purged > 0 {
                            tracing::debug!(purged, "idempotency keys purged");
                        }
                    }
                }
            }
        })
    }

    /// Record infrastructure transitions in the audit trail.
    fn spawn_infrastructure_audit(&self, cancel: CancellationToken) -> JoinHandle<()> {
        let mut events = self.inner.events.subscribe();
        let sink = Arc::clone(&self.inner.audit);
        let metrics = Arc::clone(&self.inner.metrics);

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    result = events.recv() => {
                        let entry = match result {
                            Ok(TwinEvent::InfrastructureFailure { component, .. }) => {
                                Some(AuditEntry::new(
                                    CorrelationId::new(),
                                    DecisionType::InfrastructureDown,
                                    "health-monitor",
                                    format!("{component} unavailable"),
                                ).with_context("component", component))
                            }
                            Ok(TwinEvent::InfrastructureRecovery { component, downtime }) => {
                                Some(AuditEntry::new(
                                    CorrelationId::new(),
                                    DecisionType::InfrastructureUp,
                                    "health-monitor",
                                    format!("{component} recovered"),
                                ).with_context("component", component)
                                 .with_context("downtime_secs", downtime.num_seconds().to_string()))
                            }
                            Ok(_) => None,
                            Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => None,
                            Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                        };
                        if let Some(entry) = entry {
                            audit::record(sink.as_ref(), &metrics, entry).await;
                        }
                    }
                }
            }
        })
    }

    // ── Intent submission ────────────────────────────────────────────

    /// Accept (or replace) user intent for a device. Validation failures
    /// reject at this boundary; the reconcile itself runs event-driven.
    pub async fn submit_intent(
        &self,
        device_id: DeviceId,
        device_type: DeviceType,
        value: DeviceValue,
        actor: &str,
    ) -> Result<(), CoreError> {
        value.validate()?;
        let intent = UserIntent::new(device_id.clone(), device_type, value)?;
        self.inner.twins.save_intent(intent).await?;

        let entry = AuditEntry::new(
            CorrelationId::new(),
            DecisionType::IntentReceived,
            actor,
            "intent submitted",
        )
        .with_device(device_id.clone())
        .with_values(None, Some(value));
        audit::record(self.inner.audit.as_ref(), &self.inner.metrics, entry).await;

        self.inner
            .events
            .publish(TwinEvent::IntentChanged { device_id });
        Ok(())
    }

    // ── Override pipeline ────────────────────────────────────────────

    /// Apply an override. Device-scope proposals are pre-checked against
    /// the safety engine: a refusal blocks the override outright, while
    /// a would-be modification is stored as submitted and corrected at
    /// reconcile time.
    pub async fn apply_override(
        &self,
        target: OverrideTarget,
        category: OverrideCategory,
        value: DeviceValue,
        reason: impl Into<String>,
        created_by: impl Into<String>,
        ttl: Option<std::time::Duration>,
    ) -> Result<Override, CoreError> {
        let created_by = created_by.into();
        let reason = reason.into();

        if let OverrideTarget::Device(ref device_id) = target {
            self.precheck_override(device_id, value, &created_by).await?;
        }

        let now = chrono::Utc::now();
        let override_entry = Override {
            target: target.clone(),
            category,
            value,
            reason: reason.clone(),
            created_by: created_by.clone(),
            created_at: now,
            expires_at: ttl.and_then(|ttl| chrono::Duration::from_std(ttl).ok().map(|d| now + d)),
        };

        let saved = self.inner.overrides.save(override_entry).await?;
        self.inner.metrics.overrides_applied.incr();

        let entry = AuditEntry::new(
            CorrelationId::new(),
            DecisionType::OverrideApplied,
            created_by,
            reason,
        )
        .with_values(None, Some(value))
        .with_context("category", category.to_string())
        .with_context("target", target.to_string());
        let entry = match &target {
            OverrideTarget::Device(device_id) => entry.with_device(device_id.clone()),
            OverrideTarget::System(system_id) => entry.with_system(system_id.clone()),
        };
        audit::record(self.inner.audit.as_ref(), &self.inner.metrics, entry).await;

        self.inner
            .events
            .publish(TwinEvent::OverrideApplied { target, category });
        Ok(saved)
    }

    /// Cancel an override. Publishes the same expiry event the sweeper
    /// uses, so reconciliation follows automatically.
    pub async fn cancel_override(
        &self,
        target: OverrideTarget,
        category: OverrideCategory,
    ) -> Result<bool, CoreError> {
        let existed = self
            .inner
            .overrides
            .delete_by_target_and_category(&target.key(), category)
            .await?;
        if !existed {
            return Ok(false);
        }

        let entry = AuditEntry::new(
            CorrelationId::new(),
            DecisionType::OverrideExpired,
            "operator",
            "override cancelled",
        )
        .with_context("category", category.to_string())
        .with_context("cancelled", "true");
        let entry = match &target {
            OverrideTarget::Device(device_id) => entry.with_device(device_id.clone()),
            OverrideTarget::System(system_id) => entry.with_system(system_id.clone()),
        };
        audit::record(self.inner.audit.as_ref(), &self.inner.metrics, entry).await;

        self.inner
            .events
            .publish(TwinEvent::OverrideExpired { target, category });
        Ok(true)
    }

    /// Veto gate for device-scope overrides: refuse means blocked.
    async fn precheck_override(
        &self,
        device_id: &DeviceId,
        value: DeviceValue,
        actor: &str,
    ) -> Result<(), CoreError> {
        let snapshot = self.inner.twins.find_twin_snapshot(device_id)?;
        let device_type = snapshot
            .as_ref()
            .map_or_else(|| value.device_type(), |s| s.device_type);
        value.ensure_matches(device_id, device_type)?;

        let system = self.inner.systems.system_for_device(device_id);
        let mut related_devices = BTreeMap::new();
        if let Some(ref system) = system {
            for member in &system.device_ids {
                if member == device_id {
                    continue;
                }
                if let Some(desired) = self.inner.twins.find_desired(member) {
                    related_devices.insert(member.clone(), desired);
                }
            }
        }

        let context = SafetyContext {
            device_id: device_id.clone(),
            device_type,
            proposed_value: value,
            current_snapshot: snapshot,
            system,
            related_devices,
            metadata: BTreeMap::new(),
        };

        let verdict = self.inner.engine.evaluate(&context).await;
        if verdict.is_refused() {
            self.inner.metrics.overrides_blocked.incr();
            let reason = verdict
                .reason
                .clone()
                .unwrap_or_else(|| "refused by safety rules".into());

            let entry = AuditEntry::new(
                CorrelationId::new(),
                DecisionType::OverrideBlocked,
                actor,
                reason.clone(),
            )
            .with_device(device_id.clone())
            .with_values(Some(value), None)
            .with_context("rules", verdict.decisive_rule_ids.join(","));
            let entry = match verdict.suggested_value {
                Some(suggested) => entry.with_context("suggested", suggested.to_string()),
                None => entry,
            };
            audit::record(self.inner.audit.as_ref(), &self.inner.metrics, entry).await;

            return Err(CoreError::OverrideBlocked {
                reason,
                rule_ids: verdict.decisive_rule_ids,
            });
        }
        Ok(())
    }

    // ── Feedback ingestion ───────────────────────────────────────────

    /// Inbound state frame: dedup, decode, store, announce. An `Err`
    /// here means the frame belongs in the dead-letter queue.
    pub async fn ingest_feedback(&self, frame: FeedbackFrame) -> Result<(), CoreError> {
        let parsed = match frame.parse() {
            Ok(parsed) => parsed,
            Err(err) => {
                self.inner.metrics.feedback_rejected.incr();
                return Err(CoreError::validation("feedback", err.to_string()));
            }
        };

        let device_id = DeviceId::new(&parsed.route.controller, &parsed.route.component)?;
        let device_type = DeviceType::from_family(parsed.route.family);

        // Dedup actuator echoes only; sensor series pass through.
        if device_type.capability() == Capability::Output {
            let key = IdempotencyFilter::key_for(&frame);
            if !self.inner.idempotency.check_and_set(&key) {
                self.inner.metrics.feedback_deduplicated.incr();
                tracing::debug!(device = %device_id, key, "duplicate feedback dropped");
                return Ok(());
            }
        }

        let was_converged = self.converged(&device_id);

        let reported = ReportedDeviceState::known(
            device_id.clone(),
            device_type,
            convert::value_from_feedback(parsed.value),
            parsed.received_at,
        )?;
        self.inner.twins.save_reported(reported).await?;
        self.inner.metrics.feedback_accepted.incr();

        self.audit_convergence_transition(&device_id, was_converged)
            .await;

        self.inner
            .events
            .publish(TwinEvent::ReportedChanged { device_id });
        Ok(())
    }

    fn converged(&self, device_id: &DeviceId) -> Option<bool> {
        self.inner
            .twins
            .find_twin_snapshot(device_id)
            .ok()
            .flatten()
            .filter(|snapshot| snapshot.desired.is_some())
            .map(|snapshot| snapshot.is_converged())
    }

    /// Best-effort convergence bookkeeping: a transition in either
    /// direction gets its own audit entry.
    async fn audit_convergence_transition(&self, device_id: &DeviceId, before: Option<bool>) {
        let after = self.converged(device_id);
        let decision = match (before.unwrap_or(false), after) {
            (false, Some(true)) => DecisionType::DeviceConverged,
            (true, Some(false)) => DecisionType::DeviceDiverged,
            _ => return,
        };

        let entry = AuditEntry::new(
            CorrelationId::new(),
            decision,
            "feedback",
            "reported state transition",
        )
        .with_device(device_id.clone());
        audit::record(self.inner.audit.as_ref(), &self.inner.metrics, entry).await;
    }

    // ── Direct reconcile (REST and tests) ────────────────────────────

    /// Run one reconcile pass synchronously.
    pub async fn reconcile_now(&self, device_id: &DeviceId) -> ReconcileOutcome {
        self.inner
            .coordinator
            .reconcile(device_id, BTreeMap::new())
            .await
    }

    /// One manual expiration sweep (the periodic one runs in background).
    pub async fn sweep_expired_overrides(&self) -> usize {
        self.inner.sweeper.sweep_once().await
    }

    // ── Accessors ────────────────────────────────────────────────────

    pub fn twin(&self, device_id: &DeviceId) -> Result<Option<DeviceTwinSnapshot>, CoreError> {
        self.inner.twins.find_twin_snapshot(device_id)
    }

    pub fn overrides_for(&self, target: &OverrideTarget) -> Vec<Override> {
        self.inner.overrides.find_active_by_target(&target.key())
    }

    pub fn register_system(&self, system: FunctionalSystem) -> Result<(), CoreError> {
        self.inner.systems.register(system)
    }

    pub fn decommission_device(&self, device_id: &DeviceId) {
        self.inner.twins.delete_device(device_id);
    }

    pub fn is_healthy(&self) -> bool {
        self.inner.health.is_healthy()
    }

    /// Force a health poll (tests and admin surfaces).
    pub async fn poll_health_now(&self) {
        self.inner.health.poll_once().await;
    }

    pub fn metrics(&self) -> &Arc<KernelMetrics> {
        &self.inner.metrics
    }

    pub fn events(&self) -> &EventBus {
        &self.inner.events
    }

    pub fn twins(&self) -> &Arc<TwinStore> {
        &self.inner.twins
    }
}
