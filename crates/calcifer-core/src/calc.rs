// ── State calculator ──
//
// The decision kernel: fuse Intent, the effective Override, and the
// safety verdict into a Desired value with provenance. No writes, no
// events -- everything observable happens in the coordinator.

use std::collections::BTreeMap;
use std::sync::Arc;

use strum::Display;
use tracing::trace;

use crate::model::{
    DeviceTwinSnapshot, DeviceValue, FunctionalSystem, OverrideCategory,
};
use crate::resolve::OverrideResolver;
use crate::safety::{SafetyContext, SafetyEngine, SafetyOutcome};
use crate::store::TwinStore;

/// Where a calculated Desired value came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum DesiredSource {
    Intent,
    Override,
    SafetyModified,
    SafetyRefused,
    NoValue,
}

/// Outcome of one calculation pass.
#[derive(Debug, Clone)]
pub struct CalculationResult {
    pub source: DesiredSource,
    /// The Desired value to persist; `None` for refusals and no-ops.
    pub value: Option<DeviceValue>,
    /// The pre-safety proposal, kept for audit when safety intervened.
    pub original_value: Option<DeviceValue>,
    pub reason: String,
    pub evaluated_rule_ids: Vec<String>,
    /// Set when an override (not intent) supplied the proposal.
    pub override_category: Option<OverrideCategory>,
    /// On refusal, the refusing rule's corrected value, if any.
    pub suggested_value: Option<DeviceValue>,
}

impl CalculationResult {
    fn no_value() -> Self {
        Self {
            source: DesiredSource::NoValue,
            value: None,
            original_value: None,
            reason: "no intent or override".into(),
            evaluated_rule_ids: Vec::new(),
            override_category: None,
            suggested_value: None,
        }
    }
}

/// Pure-decision component: resolver + safety engine + sibling loading.
pub struct StateCalculator {
    resolver: OverrideResolver,
    engine: Arc<SafetyEngine>,
    twins: Arc<TwinStore>,
}

impl StateCalculator {
    pub fn new(resolver: OverrideResolver, engine: Arc<SafetyEngine>, twins: Arc<TwinStore>) -> Self {
        Self {
            resolver,
            engine,
            twins,
        }
    }

    /// Compute the Desired value for a snapshot.
    pub async fn calculate(
        &self,
        snapshot: &DeviceTwinSnapshot,
        system: Option<Arc<FunctionalSystem>>,
        metadata: BTreeMap<String, String>,
    ) -> CalculationResult {
        // 1-3. Pick the proposal: override beats intent; neither means no-op.
        let resolved = self
            .resolver
            .resolve_effective(&snapshot.device_id, system.as_ref().map(|s| &s.id));

        let (proposed, provisional_source, override_category, proposal_reason) = match resolved {
            Some(override_entry) => (
                override_entry.value,
                DesiredSource::Override,
                Some(override_entry.category),
                override_entry.reason,
            ),
            None => match &snapshot.intent {
                Some(intent) => (
                    intent.value,
                    DesiredSource::Intent,
                    None,
                    "user intent".to_owned(),
                ),
                None => return CalculationResult::no_value(),
            },
        };

        trace!(
            device = %snapshot.device_id,
            source = %provisional_source,
            proposed = %proposed,
            "proposal selected"
        );

        // 4. Context: sibling Desired states feed the interlocks.
        let context = self.build_context(snapshot, system, proposed, metadata);

        // 5. Safety verdict.
        let verdict = self.engine.evaluate(&context).await;

        // 6-8. Fuse.
        match verdict.outcome {
            SafetyOutcome::Accepted => CalculationResult {
                source: provisional_source,
                value: Some(proposed),
                original_value: None,
                reason: proposal_reason,
                evaluated_rule_ids: verdict.evaluated_rule_ids,
                override_category,
                suggested_value: None,
            },
            SafetyOutcome::Modified => CalculationResult {
                source: DesiredSource::SafetyModified,
                value: verdict.final_value,
                original_value: Some(proposed),
                reason: verdict
                    .reason
                    .unwrap_or_else(|| "modified by safety rules".into()),
                evaluated_rule_ids: verdict.evaluated_rule_ids,
                override_category,
                suggested_value: None,
            },
            SafetyOutcome::Refused => CalculationResult {
                source: DesiredSource::SafetyRefused,
                value: None,
                original_value: Some(proposed),
                reason: verdict
                    .reason
                    .unwrap_or_else(|| "refused by safety rules".into()),
                evaluated_rule_ids: verdict.evaluated_rule_ids,
                override_category,
                suggested_value: verdict.suggested_value,
            },
        }
    }

    fn build_context(
        &self,
        snapshot: &DeviceTwinSnapshot,
        system: Option<Arc<FunctionalSystem>>,
        proposed: DeviceValue,
        metadata: BTreeMap<String, String>,
    ) -> SafetyContext {
        let mut related_devices = BTreeMap::new();
        if let Some(ref system) = system {
            for member in &system.device_ids {
                if member == &snapshot.device_id {
                    continue;
                }
                if let Some(desired) = self.twins.find_desired(member) {
                    related_devices.insert(member.clone(), desired);
                }
            }
        }

        SafetyContext {
            device_id: snapshot.device_id.clone(),
            device_type: snapshot.device_type,
            proposed_value: proposed,
            current_snapshot: Some(snapshot.clone()),
            system,
            related_devices,
            metadata,
        }
    }
}
