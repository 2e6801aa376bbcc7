// ── Safety rule contract ──
//
// Rules are stateless, deterministic, and free of blocking I/O. Hardcoded
// rules and declaratively-loaded rules implement the same trait; the
// engine is indifferent to where a rule came from.

use serde::{Deserialize, Serialize};
use strum::Display;

use crate::model::DeviceValue;
use crate::safety::context::SafetyContext;

/// Rule precedence classes, lowest to highest authority.
///
/// This is NOT the override category enum: the two safety-only classes at
/// the top can never be stored as overrides, and `UserIntent` exists only
/// so declarative rules can be authored at intent priority.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Display,
)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum SafetyCategory {
    UserIntent,
    Manual,
    Scheduled,
    Maintenance,
    Emergency,
    SystemSafety,
    HardcodedSafety,
}

impl SafetyCategory {
    /// Engine evaluation order: highest authority first. The engine's
    /// category sort is derived from this array via
    /// [`evaluation_rank`](Self::evaluation_rank).
    pub const EVALUATION_ORDER: [Self; 7] = [
        Self::HardcodedSafety,
        Self::SystemSafety,
        Self::Emergency,
        Self::Maintenance,
        Self::Scheduled,
        Self::Manual,
        Self::UserIntent,
    ];

    /// Position in [`EVALUATION_ORDER`](Self::EVALUATION_ORDER); rank 0
    /// evaluates first.
    pub fn evaluation_rank(self) -> usize {
        Self::EVALUATION_ORDER
            .iter()
            .position(|category| *category == self)
            .unwrap_or(usize::MAX)
    }

    /// Only these categories may refuse a proposal outright.
    pub fn is_safety_authority(self) -> bool {
        matches!(self, Self::SystemSafety | Self::HardcodedSafety)
    }
}

/// What a single rule says about a proposal.
#[derive(Debug, Clone, PartialEq)]
pub enum RuleDecision {
    Accepted,
    Refused { reason: String },
    Modified { value: DeviceValue, reason: String },
}

/// A safety rule. Implementations must be thread-safe and side-effect
/// free; a panicking rule is degraded to Accepted by the engine, never
/// allowed to abort the pipeline.
pub trait SafetyRule: Send + Sync {
    /// Stable identifier, recorded in evaluation results and audit.
    fn id(&self) -> &str;

    /// Human-readable name for logs.
    fn name(&self) -> &str;

    fn category(&self) -> SafetyCategory;

    /// Order within the category; lower evaluates earlier.
    fn priority(&self) -> i32;

    /// Cheap pre-filter; rules not applying to the context are skipped
    /// without being recorded as evaluated.
    fn applies_to(&self, context: &SafetyContext) -> bool;

    fn evaluate(&self, context: &SafetyContext) -> RuleDecision;

    /// Optional corrected value a caller could retry with. Consulted by
    /// the engine when this rule refuses; surfaced on the evaluation
    /// result and in the refusal audit entry.
    fn suggest(&self, _context: &SafetyContext) -> Option<DeviceValue> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn evaluation_order_is_descending_authority() {
        let order = SafetyCategory::EVALUATION_ORDER;
        for pair in order.windows(2) {
            assert!(pair[0] > pair[1], "{:?} should outrank {:?}", pair[0], pair[1]);
        }
    }

    #[test]
    fn every_category_has_a_rank() {
        for (index, category) in SafetyCategory::EVALUATION_ORDER.iter().enumerate() {
            assert_eq!(category.evaluation_rank(), index);
        }
    }

    #[test]
    fn only_safety_classes_hold_refusal_authority() {
        assert!(SafetyCategory::HardcodedSafety.is_safety_authority());
        assert!(SafetyCategory::SystemSafety.is_safety_authority());
        assert!(!SafetyCategory::Emergency.is_safety_authority());
        assert!(!SafetyCategory::UserIntent.is_safety_authority());
    }

    #[test]
    fn safety_classes_outrank_emergency() {
        assert!(SafetyCategory::SystemSafety > SafetyCategory::Emergency);
        assert!(SafetyCategory::HardcodedSafety > SafetyCategory::SystemSafety);
    }
}
