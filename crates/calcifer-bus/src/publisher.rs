// ── Outbound command publishing ──
//
// The kernel publishes `WireCommand`s through the `CommandPublisher` trait;
// the production broker adapter lives outside this workspace. `MemoryBus`
// is the in-process implementation used by tests and the dev daemon.

use std::sync::Mutex;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::debug;

use crate::error::BusError;

const MEMORY_BUS_CHANNEL_SIZE: usize = 256;

/// A ready-to-send outbound message: topic plus encoded payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireCommand {
    pub topic: String,
    pub payload: String,
}

/// Outbound delivery seam. Implementations must be safe to call from
/// multiple tasks; delivery is at-least-once and fire-and-forget from the
/// kernel's perspective.
#[async_trait]
pub trait CommandPublisher: Send + Sync {
    async fn publish(&self, command: WireCommand) -> Result<(), BusError>;
}

/// In-process bus double: records every published command and fans it out
/// to broadcast subscribers.
pub struct MemoryBus {
    published: Mutex<Vec<WireCommand>>,
    tx: broadcast::Sender<WireCommand>,
}

impl MemoryBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(MEMORY_BUS_CHANNEL_SIZE);
        Self {
            published: Mutex::new(Vec::new()),
            tx,
        }
    }

    /// Everything published so far, in order.
    pub fn published(&self) -> Vec<WireCommand> {
        self.published
            .lock()
            .map(|guard| guard.clone())
            .unwrap_or_default()
    }

    /// Number of commands published so far.
    pub fn published_count(&self) -> usize {
        self.published.lock().map(|guard| guard.len()).unwrap_or(0)
    }

    /// Subscribe to commands as they are published.
    pub fn subscribe(&self) -> broadcast::Receiver<WireCommand> {
        self.tx.subscribe()
    }
}

impl Default for MemoryBus {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CommandPublisher for MemoryBus {
    async fn publish(&self, command: WireCommand) -> Result<(), BusError> {
        debug!(topic = %command.topic, payload = %command.payload, "bus publish");
        match self.published.lock() {
            Ok(mut guard) => guard.push(command.clone()),
            Err(poisoned) => poisoned.into_inner().push(command.clone()),
        }
        // No receivers is fine; the record above is the source of truth.
        let _ = self.tx.send(command);
        Ok(())
    }
}
