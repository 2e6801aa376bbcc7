// ── Routing-key and topic grammar ──
//
// Inbound state messages arrive on dot-separated routing keys:
//
//     <realm>.<controller>.<family>.<component>.state
//
// Outbound commands and state echoes use slash-separated topics:
//
//     /<controller>/<family>/<component>/set
//     /<controller>/<family>/<component>/state
//
// Controller and component segments are restricted to `[A-Za-z0-9_-]+`,
// matching the identifier constraint enforced at the REST boundary.

use std::str::FromStr;

use crate::error::BusError;
use crate::family::DeviceFamily;

/// A parsed inbound state routing key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateRoute {
    /// Broker namespace segment (first wildcard position). Carried for
    /// diagnostics, never used for addressing.
    pub realm: String,
    /// Controller identifier.
    pub controller: String,
    /// Wire family.
    pub family: DeviceFamily,
    /// Component identifier. For temperature routes this is the sensor id.
    pub component: String,
}

impl StateRoute {
    /// Parse a `<realm>.<controller>.<family>.<component>.state` routing key.
    pub fn parse(key: &str) -> Result<Self, BusError> {
        let segments: Vec<&str> = key.split('.').collect();
        if segments.len() != 5 {
            return Err(BusError::RoutingKey {
                key: key.into(),
                reason: format!("expected 5 segments, got {}", segments.len()),
            });
        }
        if segments[4] != "state" {
            return Err(BusError::RoutingKey {
                key: key.into(),
                reason: format!("expected terminal segment 'state', got '{}'", segments[4]),
            });
        }

        let family = DeviceFamily::from_str(segments[2])?;

        for (label, segment) in [("controller", segments[1]), ("component", segments[3])] {
            if !is_identifier(segment) {
                return Err(BusError::RoutingKey {
                    key: key.into(),
                    reason: format!("{label} segment '{segment}' is not a valid identifier"),
                });
            }
        }

        Ok(Self {
            realm: segments[0].into(),
            controller: segments[1].into(),
            family,
            component: segments[3].into(),
        })
    }

    /// The state echo topic for this route.
    pub fn state_topic(&self) -> String {
        state_topic(&self.controller, self.family, &self.component)
    }
}

/// Nonempty and restricted to `[A-Za-z0-9_-]`.
pub fn is_identifier(s: &str) -> bool {
    !s.is_empty()
        && s.chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

/// Outbound command topic: `/<controller>/<family>/<component>/set`.
pub fn command_topic(controller: &str, family: DeviceFamily, component: &str) -> String {
    format!("/{controller}/{}/{component}/set", family.wire_name())
}

/// State echo topic: `/<controller>/<family>/<component>/state`.
pub fn state_topic(controller: &str, family: DeviceFamily, component: &str) -> String {
    format!("/{controller}/{}/{component}/state", family.wire_name())
}
