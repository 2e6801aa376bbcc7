// ── Operator override model ──
//
// An override pins a value onto a device or a whole functional system,
// superseding user intent. At most one override exists per
// (target, category); resolution picks the winner across categories and
// scopes. Safety-only rule categories are a different enum on purpose --
// they can never be stored or resolved as overrides.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::Display;

use crate::model::{DeviceId, DeviceValue, FunctionalSystemId};

/// Override priority classes, lowest to highest.
///
/// Declaration order is the precedence order: derived `Ord` makes
/// `Manual < Scheduled < Maintenance < Emergency`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Display,
)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum OverrideCategory {
    Manual,
    Scheduled,
    Maintenance,
    Emergency,
}

impl OverrideCategory {
    /// All categories in ascending priority order.
    pub const ALL: [Self; 4] = [
        Self::Manual,
        Self::Scheduled,
        Self::Maintenance,
        Self::Emergency,
    ];

    /// Numeric rank used by the store's priority index.
    pub fn ordinal(self) -> u8 {
        match self {
            Self::Manual => 0,
            Self::Scheduled => 1,
            Self::Maintenance => 2,
            Self::Emergency => 3,
        }
    }
}

/// Whether an override targets one device or a whole functional system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum OverrideScope {
    Device,
    System,
}

/// Typed override target. The scope is derived from the variant, so a
/// system-scope override can never carry a device id or vice versa.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "scope", content = "id", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OverrideTarget {
    Device(DeviceId),
    System(FunctionalSystemId),
}

impl OverrideTarget {
    pub fn scope(&self) -> OverrideScope {
        match self {
            Self::Device(_) => OverrideScope::Device,
            Self::System(_) => OverrideScope::System,
        }
    }

    /// Storage key: device canonical form or system id string.
    pub fn key(&self) -> String {
        match self {
            Self::Device(id) => id.canonical(),
            Self::System(id) => id.to_string(),
        }
    }
}

impl fmt::Display for OverrideTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Device(id) => write!(f, "device:{id}"),
            Self::System(id) => write!(f, "system:{id}"),
        }
    }
}

/// An operator-imposed value with priority, provenance, and lifetime.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Override {
    pub target: OverrideTarget,
    pub category: OverrideCategory,
    pub value: DeviceValue,
    pub reason: String,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    /// `None` means permanent.
    pub expires_at: Option<DateTime<Utc>>,
}

impl Override {
    /// Expired overrides must not participate in resolution.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }

    pub fn is_permanent(&self) -> bool {
        self.expires_at.is_none()
    }
}
