use thiserror::Error;

/// Top-level error type for the `calcifer-bus` crate.
///
/// Covers every failure mode at the wire boundary: malformed routing keys,
/// unparseable payloads, and publish failures. `calcifer-core` maps these
/// into domain-appropriate handling (dead-letter, metrics).
#[derive(Debug, Error)]
pub enum BusError {
    // ── Inbound ─────────────────────────────────────────────────────
    /// Routing key does not match the `*.*.<family>.*.state` grammar.
    #[error("Invalid routing key '{key}': {reason}")]
    RoutingKey { key: String, reason: String },

    /// Device family segment is not one of the known families.
    #[error("Unknown device family '{name}'")]
    UnknownFamily { name: String },

    /// Payload cannot be parsed for the routed family.
    /// These messages are rejected to the dead-letter queue.
    #[error("Invalid {family} payload '{payload}': {reason}")]
    Payload {
        family: &'static str,
        payload: String,
        reason: String,
    },

    // ── Outbound ────────────────────────────────────────────────────
    /// The underlying publisher refused or failed to deliver.
    #[error("Publish to '{topic}' failed: {reason}")]
    Publish { topic: String, reason: String },

    /// Publisher has been shut down.
    #[error("Bus disconnected")]
    Disconnected,
}

impl BusError {
    /// Returns `true` if this is an inbound parse reject (dead-letter class)
    /// rather than a delivery failure.
    pub fn is_reject(&self) -> bool {
        matches!(
            self,
            Self::RoutingKey { .. } | Self::UnknownFamily { .. } | Self::Payload { .. }
        )
    }
}
