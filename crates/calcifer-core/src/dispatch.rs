// ── Command dispatcher ──
//
// Debounced emitter of wire commands, gated by the health monitor.
// Per-device state machine: IDLE (no map entry) or WAIT (entry holding
// the emission deadline). A Desired arriving during WAIT pushes the
// deadline out and counts as debounced; the timer task emits once the
// deadline stops moving. Distinct devices never block each other.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tokio::sync::broadcast;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, warn};

use calcifer_bus::publisher::CommandPublisher;

use crate::convert;
use crate::event::TwinEvent;
use crate::health::HealthMonitor;
use crate::metrics::KernelMetrics;
use crate::model::DeviceId;
use crate::store::TwinStore;

/// Debounced, health-gated command emitter.
pub struct CommandDispatcher {
    twins: Arc<TwinStore>,
    health: Arc<HealthMonitor>,
    publisher: Arc<dyn CommandPublisher>,
    metrics: Arc<KernelMetrics>,
    debounce: Duration,
    grace: Duration,
    /// WAIT-state deadlines, keyed per device. Absence means IDLE.
    pending: DashMap<DeviceId, Instant>,
    timers: TaskTracker,
}

impl CommandDispatcher {
    pub fn new(
        twins: Arc<TwinStore>,
        health: Arc<HealthMonitor>,
        publisher: Arc<dyn CommandPublisher>,
        metrics: Arc<KernelMetrics>,
        debounce: Duration,
        grace: Duration,
    ) -> Self {
        Self {
            twins,
            health,
            publisher,
            metrics,
            debounce,
            grace,
            pending: DashMap::new(),
            timers: TaskTracker::new(),
        }
    }

    /// Event loop: consume `DesiredStateCalculated`, debounce, emit.
    /// On cancellation, pending timers are flushed within the grace
    /// window before returning.
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
                        Ok(TwinEvent::DesiredStateCalculated { device_id, .. }) => {
                            self.note_desired(device_id);
                        }
                        Ok(_) => {}
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            warn!(skipped, "dispatcher lagged behind the event fabric");
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    }
                }
            }
        }

        // Shutdown: let armed timers fire, bounded by the grace window.
        self.timers.close();
        if tokio::time::timeout(self.grace, self.timers.wait())
            .await
            .is_err()
        {
            warn!("dispatcher shutdown grace elapsed with timers still pending");
        }
    }

    /// Record a fresh Desired: arm the timer (IDLE) or push the deadline
    /// out (WAIT).
    pub fn note_desired(self: &Arc<Self>, device_id: DeviceId) {
        let deadline = Instant::now() + self.debounce;
        match self.pending.entry(device_id.clone()) {
            Entry::Occupied(mut occupied) => {
                *occupied.get_mut() = deadline;
                self.metrics.commands_debounced.incr();
            }
            Entry::Vacant(vacant) => {
                vacant.insert(deadline);
                let dispatcher = Arc::clone(self);
                self.timers.spawn(async move {
                    dispatcher.wait_and_emit(device_id).await;
                });
            }
        }
    }

    /// Sleep until the deadline stops moving, then emit once.
    async fn wait_and_emit(&self, device_id: DeviceId) {
        loop {
            let Some(deadline) = self.pending.get(&device_id).map(|d| *d) else {
                return;
            };
            if Instant::now() >= deadline {
                break;
            }
            tokio::time::sleep_until(deadline).await;
        }
        self.pending.remove(&device_id);
        self.emit(&device_id).await;
    }

    /// Emission: re-read the twin, apply the gates, publish.
    async fn emit(&self, device_id: &DeviceId) {
        // Re-read: the twin may have moved during the wait.
        let snapshot = match self.twins.find_twin_snapshot(device_id) {
            Ok(Some(snapshot)) => snapshot,
            Ok(None) => {
                debug!(device = %device_id, "twin vanished before emission");
                return;
            }
            Err(err) => {
                warn!(device = %device_id, error = %err, "snapshot read failed at emission");
                return;
            }
        };

        // Fail-stop gate.
        if !self.health.is_healthy() {
            self.metrics.skipped_unhealthy.incr();
            debug!(device = %device_id, "command skipped, infrastructure down");
            return;
        }

        // Convergence gate: the device already is where we want it.
        if snapshot.is_converged() {
            self.metrics.skipped_converged.incr();
            debug!(device = %device_id, "command skipped, already converged");
            return;
        }

        let Some(desired) = snapshot.desired else {
            return;
        };

        let command = match convert::command_for(device_id, &desired.value) {
            Ok(command) => command,
            Err(err) => {
                warn!(device = %device_id, error = %err, "unencodable desired value");
                return;
            }
        };

        match self.publisher.publish(command).await {
            Ok(()) => {
                self.metrics.commands_sent.incr();
                debug!(device = %device_id, value = %desired.value, "command dispatched");
            }
            Err(err) => {
                // At-least-once: the next Desired recalculation retries.
                warn!(device = %device_id, error = %err, "command publish failed");
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    use calcifer_bus::MemoryBus;
    use chrono::Utc;

    use crate::config::KernelConfig;
    use crate::event::EventBus;
    use crate::health::{HealthProbe, StaticProbe};
    use crate::model::{
        DesiredDeviceState, DeviceType, DeviceValue, ReportedDeviceState,
    };

    struct Fixture {
        dispatcher: Arc<CommandDispatcher>,
        twins: Arc<TwinStore>,
        bus: Arc<MemoryBus>,
        metrics: Arc<KernelMetrics>,
        storage_probe: Arc<StaticProbe>,
    }

    fn fixture() -> Fixture {
        let metrics = Arc::new(KernelMetrics::new());
        let config = KernelConfig {
            debounce: Duration::from_millis(20),
            ..KernelConfig::default()
        };
        let twins = Arc::new(TwinStore::new(&config, Arc::clone(&metrics)));
        let storage_probe = Arc::new(StaticProbe::healthy("storage-primary"));
        let health = Arc::new(HealthMonitor::new(
            &config,
            EventBus::new(),
            vec![Arc::clone(&storage_probe) as Arc<dyn HealthProbe>],
        ));
        let bus = Arc::new(MemoryBus::new());
        let dispatcher = Arc::new(CommandDispatcher::new(
            Arc::clone(&twins),
            health,
            Arc::clone(&bus) as Arc<dyn CommandPublisher>,
            Arc::clone(&metrics),
            config.debounce,
            config.dispatch_grace,
        ));
        Fixture {
            dispatcher,
            twins,
            bus,
            metrics,
            storage_probe,
        }
    }

    fn fan_id() -> DeviceId {
        DeviceId::parse("c1:fan").unwrap()
    }

    async fn save_fan_desired(twins: &TwinStore, speed: u8) {
        twins
            .save_desired(
                DesiredDeviceState::new(fan_id(), DeviceType::Fan, DeviceValue::fan(speed))
                    .unwrap(),
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn single_desired_emits_one_command() {
        let fixture = fixture();
        save_fan_desired(&fixture.twins, 2).await;

        fixture.dispatcher.note_desired(fan_id());
        tokio::time::sleep(Duration::from_millis(60)).await;

        let published = fixture.bus.published();
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].topic, "/c1/fan/fan/set");
        assert_eq!(published[0].payload, "2");
        assert_eq!(fixture.metrics.commands_sent.get(), 1);
    }

    #[tokio::test]
    async fn burst_coalesces_to_one_command_with_final_value() {
        let fixture = fixture();

        for speed in [0u8, 1, 2, 3, 4] {
            save_fan_desired(&fixture.twins, speed).await;
            fixture.dispatcher.note_desired(fan_id());
        }
        tokio::time::sleep(Duration::from_millis(80)).await;

        let published = fixture.bus.published();
        assert_eq!(published.len(), 1, "burst must coalesce");
        assert_eq!(published[0].payload, "4");
        assert_eq!(fixture.metrics.commands_debounced.get(), 4);
    }

    #[tokio::test]
    async fn unhealthy_gate_skips_emission() {
        let fixture = fixture();
        save_fan_desired(&fixture.twins, 2).await;
        fixture.storage_probe.set_healthy(false);
        fixture.dispatcher.health.poll_once().await;

        fixture.dispatcher.note_desired(fan_id());
        tokio::time::sleep(Duration::from_millis(60)).await;

        assert!(fixture.bus.published().is_empty());
        assert_eq!(fixture.metrics.skipped_unhealthy.get(), 1);
    }

    #[tokio::test]
    async fn converged_twin_skips_emission() {
        let fixture = fixture();
        save_fan_desired(&fixture.twins, 2).await;
        fixture
            .twins
            .save_reported(
                ReportedDeviceState::known(
                    fan_id(),
                    DeviceType::Fan,
                    DeviceValue::fan(2),
                    Utc::now(),
                )
                .unwrap(),
            )
            .await
            .unwrap();

        fixture.dispatcher.note_desired(fan_id());
        tokio::time::sleep(Duration::from_millis(60)).await;

        assert!(fixture.bus.published().is_empty());
        assert_eq!(fixture.metrics.skipped_converged.get(), 1);
    }

    #[tokio::test]
    async fn distinct_devices_do_not_block_each_other() {
        let fixture = fixture();
        let pump = DeviceId::parse("c1:pump").unwrap();
        save_fan_desired(&fixture.twins, 1).await;
        fixture
            .twins
            .save_desired(
                DesiredDeviceState::new(pump.clone(), DeviceType::Relay, DeviceValue::relay(true))
                    .unwrap(),
            )
            .await
            .unwrap();

        fixture.dispatcher.note_desired(fan_id());
        fixture.dispatcher.note_desired(pump);
        tokio::time::sleep(Duration::from_millis(60)).await;

        assert_eq!(fixture.bus.published().len(), 2);
        assert_eq!(fixture.metrics.commands_debounced.get(), 0);
    }
}
