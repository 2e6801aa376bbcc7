// ── Audit model ──
//
// Every decision the kernel takes is recorded as an append-only entry,
// linked by correlation id so one reconcile pass can be traced end to end.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::Display;
use uuid::Uuid;

use crate::model::{DeviceId, DeviceValue, FunctionalSystemId};

/// Correlates all audit entries produced by a single pipeline pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CorrelationId(Uuid);

impl CorrelationId {
    #[allow(clippy::new_without_default)]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The decision taxonomy emitted to the audit log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum DecisionType {
    IntentReceived,
    IntentRejected,
    IntentModified,
    DesiredCalculated,
    OverrideApplied,
    OverrideBlocked,
    OverrideExpired,
    SafetyRuleActivated,
    DeviceConverged,
    DeviceDiverged,
    FailSafeApplied,
    InfrastructureDown,
    InfrastructureUp,
}

/// One append-only decision record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: Uuid,
    pub correlation_id: CorrelationId,
    pub timestamp: DateTime<Utc>,
    pub device_id: Option<DeviceId>,
    pub system_id: Option<FunctionalSystemId>,
    pub decision: DecisionType,
    /// Who caused the decision: a user, "system", or a rule id.
    pub actor: String,
    pub previous_value: Option<DeviceValue>,
    pub new_value: Option<DeviceValue>,
    pub reason: String,
    pub context: BTreeMap<String, String>,
}

impl AuditEntry {
    /// Start a builder-ish entry with the mandatory fields; optional
    /// fields are set directly on the struct afterwards.
    pub fn new(
        correlation_id: CorrelationId,
        decision: DecisionType,
        actor: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            correlation_id,
            timestamp: Utc::now(),
            device_id: None,
            system_id: None,
            decision,
            actor: actor.into(),
            previous_value: None,
            new_value: None,
            reason: reason.into(),
            context: BTreeMap::new(),
        }
    }

    pub fn with_device(mut self, device_id: DeviceId) -> Self {
        self.device_id = Some(device_id);
        self
    }

    pub fn with_system(mut self, system_id: FunctionalSystemId) -> Self {
        self.system_id = Some(system_id);
        self
    }

    pub fn with_values(
        mut self,
        previous: Option<DeviceValue>,
        new: Option<DeviceValue>,
    ) -> Self {
        self.previous_value = previous;
        self.new_value = new;
        self
    }

    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }
}
