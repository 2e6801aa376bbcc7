// ── Functional systems ──
//
// A functional system groups the devices that cooperate on one physical
// function (a heating loop, a fire line). Membership is exclusive: a
// device belongs to at most one system. Devices carry no back-pointer;
// the registry resolves membership at query time.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::model::{DeviceId, DeviceValue};

/// Identifier of a functional system, same charset as device id parts.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FunctionalSystemId(String);

impl FunctionalSystemId {
    pub fn new(id: impl Into<String>) -> Result<Self, CoreError> {
        let id = id.into();
        if id.is_empty() {
            return Err(CoreError::validation("systemId", "must not be empty"));
        }
        if let Some(bad) = id
            .chars()
            .find(|c| !(c.is_ascii_alphanumeric() || *c == '_' || *c == '-'))
        {
            return Err(CoreError::validation(
                "systemId",
                format!("character '{bad}' outside [A-Za-z0-9_-]"),
            ));
        }
        Ok(Self(id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FunctionalSystemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for FunctionalSystemId {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

/// A named group of devices with shared configuration and fail-safe
/// defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionalSystem {
    pub id: FunctionalSystemId,
    /// Free-form classification ("heating", "fire_protection", ...).
    pub kind: String,
    pub name: String,
    /// Declarative knobs read by safety rules (e.g. interlock role
    /// assignments). Keys are rule-defined.
    pub configuration: BTreeMap<String, String>,
    pub device_ids: BTreeSet<DeviceId>,
    /// Values device hardware should fall back to when the controller
    /// goes silent. Keyed by device canonical id.
    pub fail_safe_defaults: BTreeMap<String, DeviceValue>,
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub created_by: String,
}

impl FunctionalSystem {
    pub fn contains(&self, device_id: &DeviceId) -> bool {
        self.device_ids.contains(device_id)
    }

    /// Configuration lookup parsed as a device id (interlock roles).
    pub fn configured_device(&self, key: &str) -> Option<DeviceId> {
        self.configuration
            .get(key)
            .and_then(|raw| DeviceId::parse(raw).ok())
    }
}
