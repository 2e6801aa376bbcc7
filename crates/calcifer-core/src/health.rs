// ── Health monitor ──
//
// Polls a fixed set of critical dependencies and gates command
// generation on the result. Fail-stop by design: when a dependency is
// down the kernel stops emitting commands and lets device-side hardware
// fail-safes govern, instead of acting on stale data.

use std::collections::HashMap;
use std::sync::Arc;

use arc_swap::ArcSwap;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::KernelConfig;
use crate::event::{EventBus, TwinEvent};

/// A critical dependency the monitor probes.
#[async_trait]
pub trait HealthProbe: Send + Sync {
    /// Stable component name ("storage-primary", "storage-cache", "bus").
    fn component(&self) -> &str;

    /// One poll; `false` or a slow hang count as unhealthy (the monitor
    /// imposes its own per-poll timeout).
    async fn check(&self) -> bool;
}

/// Always-healthy probe for components without a real check (tests, dev).
pub struct StaticProbe {
    component: String,
    healthy: std::sync::atomic::AtomicBool,
}

impl StaticProbe {
    pub fn healthy(component: impl Into<String>) -> Self {
        Self {
            component: component.into(),
            healthy: std::sync::atomic::AtomicBool::new(true),
        }
    }

    /// Flip the probe state (used to simulate outages).
    pub fn set_healthy(&self, healthy: bool) {
        self.healthy
            .store(healthy, std::sync::atomic::Ordering::SeqCst);
    }
}

#[async_trait]
impl HealthProbe for StaticProbe {
    fn component(&self) -> &str {
        &self.component
    }

    async fn check(&self) -> bool {
        self.healthy.load(std::sync::atomic::Ordering::SeqCst)
    }
}

/// Per-component state held between polls.
#[derive(Debug, Clone)]
struct ComponentState {
    healthy: bool,
    /// When the component was last seen transitioning to unhealthy.
    down_since: Option<DateTime<Utc>>,
}

/// Point-in-time view over all components.
#[derive(Debug, Clone, Default)]
pub struct HealthSnapshot {
    components: HashMap<String, bool>,
}

impl HealthSnapshot {
    /// True iff every component is healthy.
    pub fn is_healthy(&self) -> bool {
        self.components.values().all(|healthy| *healthy)
    }

    pub fn component(&self, name: &str) -> Option<bool> {
        self.components.get(name).copied()
    }

    /// Names of everything currently down.
    pub fn unhealthy_components(&self) -> Vec<String> {
        self.components
            .iter()
            .filter(|(_, healthy)| !**healthy)
            .map(|(name, _)| name.clone())
            .collect()
    }
}

/// Periodic health poller with transition events.
pub struct HealthMonitor {
    probes: Vec<Arc<dyn HealthProbe>>,
    snapshot: ArcSwap<HealthSnapshot>,
    states: std::sync::Mutex<HashMap<String, ComponentState>>,
    events: EventBus,
    interval: std::time::Duration,
}

impl HealthMonitor {
    pub fn new(config: &KernelConfig, events: EventBus, probes: Vec<Arc<dyn HealthProbe>>) -> Self {
        // Unpolled components start healthy; the first poll corrects.
        let mut components = HashMap::new();
        let mut states = HashMap::new();
        for probe in &probes {
            components.insert(probe.component().to_owned(), true);
            states.insert(
                probe.component().to_owned(),
                ComponentState {
                    healthy: true,
                    down_since: None,
                },
            );
        }

        Self {
            probes,
            snapshot: ArcSwap::from_pointee(HealthSnapshot { components }),
            states: std::sync::Mutex::new(states),
            events,
            interval: config.health_check_interval,
        }
    }

    /// The fail-stop gate.
    pub fn is_healthy(&self) -> bool {
        self.snapshot.load().is_healthy()
    }

    /// Cheap read of the full component map.
    pub fn snapshot(&self) -> Arc<HealthSnapshot> {
        self.snapshot.load_full()
    }

    /// Run all probes once and publish any transitions.
    pub async fn poll_once(&self) {
        let mut components = HashMap::new();

        for probe in &self.probes {
            let name = probe.component().to_owned();
            // A hanging probe must not wedge the poll loop.
            let healthy = tokio::time::timeout(self.interval, probe.check())
                .await
                .unwrap_or(false);
            components.insert(name.clone(), healthy);
            self.record_transition(&name, healthy);
        }

        self.snapshot.store(Arc::new(HealthSnapshot { components }));
    }

    fn record_transition(&self, component: &str, healthy: bool) {
        let Ok(mut states) = self.states.lock() else {
            return;
        };
        let state = states.entry(component.to_owned()).or_insert(ComponentState {
            healthy: true,
            down_since: None,
        });

        match (state.healthy, healthy) {
            (true, false) => {
                let at = Utc::now();
                warn!(component, "infrastructure failure detected");
                state.healthy = false;
                state.down_since = Some(at);
                self.events.publish(TwinEvent::InfrastructureFailure {
                    component: component.to_owned(),
                    at,
                });
            }
            (false, true) => {
                let downtime = state
                    .down_since
                    .map(|since| Utc::now() - since)
                    .unwrap_or_else(chrono::Duration::zero);
                info!(component, downtime_secs = downtime.num_seconds(), "infrastructure recovered");
                state.healthy = true;
                state.down_since = None;
                self.events.publish(TwinEvent::InfrastructureRecovery {
                    component: component.to_owned(),
                    downtime,
                });
            }
            _ => {}
        }
    }

    /// Spawn the periodic poll loop.
    pub fn spawn(self: &Arc<Self>, cancel: CancellationToken) -> JoinHandle<()> {
        let monitor = Arc::clone(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(monitor.interval);
            interval.tick().await; // consume the immediate first tick

            loop {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    _ = interval.tick() => monitor.poll_once().await,
                }
            }
        })
    }
}
