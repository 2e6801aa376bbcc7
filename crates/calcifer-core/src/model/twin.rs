// ── Twin slot types ──
//
// The twin of a device is three orthogonal slots:
//   Intent   -- what the user asked for (immutable record, replaced whole)
//   Reported -- what the device last said (may be unknown)
//   Desired  -- what the controller decided should be true
//
// `DeviceTwinSnapshot` is the read-side composite; convergence is derived,
// never stored.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::model::{DeviceId, DeviceType, DeviceValue};

/// A user's requested state for a device. Replaced, never mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserIntent {
    pub device_id: DeviceId,
    pub device_type: DeviceType,
    pub value: DeviceValue,
    pub created_at: DateTime<Utc>,
}

impl UserIntent {
    /// Build an intent, enforcing the value/type invariant.
    pub fn new(
        device_id: DeviceId,
        device_type: DeviceType,
        value: DeviceValue,
    ) -> Result<Self, CoreError> {
        value.ensure_matches(&device_id, device_type)?;
        Ok(Self {
            device_id,
            device_type,
            value,
            created_at: Utc::now(),
        })
    }
}

/// What the device last reported. `value == None` means the state is
/// unknown (device never spoke, or was explicitly reset).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportedDeviceState {
    pub device_id: DeviceId,
    pub device_type: DeviceType,
    pub value: Option<DeviceValue>,
    pub reported_at: DateTime<Utc>,
}

impl ReportedDeviceState {
    /// A known reported value.
    pub fn known(
        device_id: DeviceId,
        device_type: DeviceType,
        value: DeviceValue,
        reported_at: DateTime<Utc>,
    ) -> Result<Self, CoreError> {
        value.ensure_matches(&device_id, device_type)?;
        Ok(Self {
            device_id,
            device_type,
            value: Some(value),
            reported_at,
        })
    }

    /// A placeholder for a device whose state has never been observed.
    pub fn unknown(device_id: DeviceId, device_type: DeviceType) -> Self {
        Self {
            device_id,
            device_type,
            value: None,
            reported_at: Utc::now(),
        }
    }

    pub fn is_known(&self) -> bool {
        self.value.is_some()
    }
}

/// What the controller decided should be true. Always concrete.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DesiredDeviceState {
    pub device_id: DeviceId,
    pub device_type: DeviceType,
    pub value: DeviceValue,
}

impl DesiredDeviceState {
    pub fn new(
        device_id: DeviceId,
        device_type: DeviceType,
        value: DeviceValue,
    ) -> Result<Self, CoreError> {
        value.ensure_matches(&device_id, device_type)?;
        Ok(Self {
            device_id,
            device_type,
            value,
        })
    }
}

/// Point-in-time composite of all three slots.
///
/// Invariant: every present slot agrees with `device_type`; the store's
/// snapshot read enforces this before a snapshot is ever constructed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceTwinSnapshot {
    pub device_id: DeviceId,
    pub device_type: DeviceType,
    pub intent: Option<UserIntent>,
    pub reported: Option<ReportedDeviceState>,
    pub desired: Option<DesiredDeviceState>,
}

impl DeviceTwinSnapshot {
    /// True iff the device reports a known value equal to Desired.
    pub fn is_converged(&self) -> bool {
        match (&self.reported, &self.desired) {
            (Some(reported), Some(desired)) => reported.value.as_ref() == Some(&desired.value),
            _ => false,
        }
    }
}
