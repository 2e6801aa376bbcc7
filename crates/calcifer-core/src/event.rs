// ── Event fabric ──
//
// Multi-producer, multi-consumer broadcast of twin lifecycle events.
// Listeners get their own receiver and must not hold borrowed state
// across events; everything in a `TwinEvent` is owned.

use chrono::{DateTime, Utc};
use tokio::sync::broadcast;
use tracing::trace;

use crate::model::{CorrelationId, DeviceId, OverrideCategory, OverrideTarget};

const EVENT_CHANNEL_SIZE: usize = 512;

/// Everything that can happen to a twin, as seen by the event fabric.
#[derive(Debug, Clone)]
pub enum TwinEvent {
    /// A user submitted (or replaced) intent.
    IntentChanged { device_id: DeviceId },
    /// Feedback from the device landed in the Reported slot.
    ReportedChanged { device_id: DeviceId },
    /// An override was applied or replaced.
    OverrideApplied {
        target: OverrideTarget,
        category: OverrideCategory,
    },
    /// An override was removed by the expiration sweeper or cancelled.
    OverrideExpired {
        target: OverrideTarget,
        category: OverrideCategory,
    },
    /// A reconcile pass produced a new Desired value.
    DesiredStateCalculated {
        device_id: DeviceId,
        correlation_id: CorrelationId,
    },
    /// A critical dependency went down.
    InfrastructureFailure { component: String, at: DateTime<Utc> },
    /// A critical dependency came back.
    InfrastructureRecovery {
        component: String,
        downtime: chrono::Duration,
    },
}

/// Broadcast fabric handle. Cheap to clone; every subscriber sees every
/// event published after it subscribed.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<TwinEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(EVENT_CHANNEL_SIZE);
        Self { tx }
    }

    /// Publish, ignoring the no-subscribers case (startup ordering).
    pub fn publish(&self, event: TwinEvent) {
        trace!(?event, "twin event");
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TwinEvent> {
        self.tx.subscribe()
    }

    /// Number of live subscribers, used by shutdown diagnostics.
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
