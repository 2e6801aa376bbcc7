// ── Safety evaluation context and result ──

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::model::{
    DesiredDeviceState, DeviceId, DeviceTwinSnapshot, DeviceType, DeviceValue, FunctionalSystem,
};

/// Everything a rule may look at when judging a proposed value.
///
/// `related_devices` carries the *Desired* state of sibling devices in the
/// same functional system -- interlocks evaluate intent-to-change, not
/// transient hardware reality.
#[derive(Debug, Clone)]
pub struct SafetyContext {
    pub device_id: DeviceId,
    pub device_type: DeviceType,
    pub proposed_value: DeviceValue,
    pub current_snapshot: Option<DeviceTwinSnapshot>,
    pub system: Option<Arc<FunctionalSystem>>,
    pub related_devices: BTreeMap<DeviceId, DesiredDeviceState>,
    pub metadata: BTreeMap<String, String>,
}

impl SafetyContext {
    /// Minimal context for a device outside any functional system.
    pub fn standalone(
        device_id: DeviceId,
        device_type: DeviceType,
        proposed_value: DeviceValue,
    ) -> Self {
        Self {
            device_id,
            device_type,
            proposed_value,
            current_snapshot: None,
            system: None,
            related_devices: BTreeMap::new(),
            metadata: BTreeMap::new(),
        }
    }

    /// The Desired value of a sibling device, if loaded.
    pub fn related_desired(&self, device_id: &DeviceId) -> Option<&DeviceValue> {
        self.related_devices.get(device_id).map(|d| &d.value)
    }

    /// Copy of this context with the running proposed value replaced;
    /// used by the engine to thread modifications through the chain.
    pub(crate) fn with_proposed(&self, proposed_value: DeviceValue) -> Self {
        Self {
            proposed_value,
            ..self.clone()
        }
    }
}

/// Aggregate verdict of a full evaluation pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SafetyOutcome {
    Accepted,
    Refused,
    Modified,
}

/// Result of running the rule chain over one proposal.
#[derive(Debug, Clone)]
pub struct SafetyEvaluationResult {
    pub outcome: SafetyOutcome,
    /// The value that survived the chain; `None` iff refused.
    pub final_value: Option<DeviceValue>,
    /// The proposal as it entered the chain.
    pub original_value: DeviceValue,
    /// Ids of every rule that actually ran (skips excluded).
    pub evaluated_rule_ids: Vec<String>,
    /// Ids of the rules that refused or modified.
    pub decisive_rule_ids: Vec<String>,
    /// Reason from the refusing rule or the last modifying rule.
    pub reason: Option<String>,
    /// Corrected value offered by the refusing rule, if it has one.
    /// Always `None` unless the outcome is `Refused`.
    pub suggested_value: Option<DeviceValue>,
}

impl SafetyEvaluationResult {
    /// Convenience predicate used by callers that only gate on refusal.
    pub fn is_refused(&self) -> bool {
        self.outcome == SafetyOutcome::Refused
    }
}
