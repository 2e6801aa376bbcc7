// ── Safety engine ──
//
// Evaluates ordered categories of rules against a proposal. Precedence is
// fixed: HARDCODED_SAFETY first, USER_INTENT last; within a category,
// priority ascending. A refusal from a safety-authority category stops
// the chain; a modification replaces the running value so downstream
// rules judge the corrected proposal.
//
// Failure containment: a panicking rule counts as Accepted (logged); a
// rule exceeding the evaluation timeout aborts the declarative pass and
// the engine re-runs hardcoded rules only. If even that degraded pass
// fails, the proposal is refused -- fail-stop beats guessing.

pub mod context;
pub mod hardcoded;
pub mod rule;

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::config::KernelConfig;
use crate::error::CoreError;
use crate::metrics::KernelMetrics;
use crate::model::DeviceValue;

pub use context::{SafetyContext, SafetyEvaluationResult, SafetyOutcome};
pub use hardcoded::{
    FIRE_DEVICE_KEY, FanSpeedLimitRule, FireRequiresPumpRule, PUMP_DEVICE_KEY,
    PumpFollowsFireRule,
};
pub use rule::{RuleDecision, SafetyCategory, SafetyRule};

/// The rule evaluator. Construct once, share via `Arc`.
pub struct SafetyEngine {
    /// All rules, pre-sorted by `SafetyCategory::EVALUATION_ORDER` rank,
    /// then priority ascending, then id for determinism.
    rules: Vec<Arc<dyn SafetyRule>>,
    rule_timeout: Duration,
    metrics: Arc<KernelMetrics>,
}

impl SafetyEngine {
    /// Engine with the built-in hardcoded rule set.
    pub fn new(config: &KernelConfig, metrics: Arc<KernelMetrics>) -> Self {
        Self::with_rules(
            config,
            metrics,
            vec![
                Arc::new(FanSpeedLimitRule),
                Arc::new(FireRequiresPumpRule),
                Arc::new(PumpFollowsFireRule),
            ],
        )
    }

    /// Engine over an explicit rule set (hardcoded + declaratively loaded).
    pub fn with_rules(
        config: &KernelConfig,
        metrics: Arc<KernelMetrics>,
        mut rules: Vec<Arc<dyn SafetyRule>>,
    ) -> Self {
        rules.sort_by(|a, b| {
            a.category()
                .evaluation_rank()
                .cmp(&b.category().evaluation_rank())
                .then_with(|| a.priority().cmp(&b.priority()))
                .then_with(|| a.id().cmp(b.id()))
        });
        Self {
            rules,
            rule_timeout: config.rule_evaluation_timeout,
            metrics,
        }
    }

    /// Full evaluation: declarative chain, degrading to hardcoded-only on
    /// pipeline-level failure, refusing if even that cannot complete.
    pub async fn evaluate(&self, context: &SafetyContext) -> SafetyEvaluationResult {
        match self.run_chain(context, false).await {
            Ok(result) => result,
            Err(err) => {
                self.metrics.rule_failures.incr();
                warn!(
                    device = %context.device_id,
                    error = %err,
                    "declarative rule evaluation failed, falling back to hardcoded-only"
                );
                self.evaluate_hardcoded_only(context).await
            }
        }
    }

    /// Degraded path: only `HARDCODED_SAFETY` rules run.
    pub async fn evaluate_hardcoded_only(&self, context: &SafetyContext) -> SafetyEvaluationResult {
        match self.run_chain(context, true).await {
            Ok(result) => result,
            Err(err) => {
                self.metrics.rule_failures.incr();
                warn!(
                    device = %context.device_id,
                    error = %err,
                    "hardcoded-only evaluation failed, refusing proposal"
                );
                SafetyEvaluationResult {
                    outcome: SafetyOutcome::Refused,
                    final_value: None,
                    original_value: context.proposed_value,
                    evaluated_rule_ids: Vec::new(),
                    decisive_rule_ids: Vec::new(),
                    reason: Some("safety evaluation unavailable".into()),
                    suggested_value: None,
                }
            }
        }
    }

    async fn run_chain(
        &self,
        context: &SafetyContext,
        hardcoded_only: bool,
    ) -> Result<SafetyEvaluationResult, CoreError> {
        let original_value = context.proposed_value;
        let mut running_value = original_value;
        let mut evaluated_rule_ids = Vec::new();
        let mut decisive_rule_ids = Vec::new();
        let mut modified = false;
        let mut last_reason = None;

        for rule in &self.rules {
            if hardcoded_only && rule.category() != SafetyCategory::HardcodedSafety {
                continue;
            }

            let (decision, suggestion) =
                match self.run_rule(rule, context.with_proposed(running_value)).await? {
                    Some(outcome) => outcome,
                    None => continue, // not applicable or degraded to accept
                };
            evaluated_rule_ids.push(rule.id().to_owned());

            match decision {
                RuleDecision::Accepted => {}
                RuleDecision::Refused { reason } => {
                    if rule.category().is_safety_authority() {
                        debug!(rule = rule.id(), %reason, "safety refusal");
                        decisive_rule_ids.push(rule.id().to_owned());
                        // A suggestion of the wrong type is a broken rule;
                        // drop it rather than offering a bad retry.
                        let suggested_value =
                            suggestion.filter(|v| v.matches_type(context.device_type));
                        return Ok(SafetyEvaluationResult {
                            outcome: SafetyOutcome::Refused,
                            final_value: None,
                            original_value,
                            evaluated_rule_ids,
                            decisive_rule_ids,
                            reason: Some(reason),
                            suggested_value,
                        });
                    }
                    // Non-safety categories cannot refuse; note and move on.
                    debug!(
                        rule = rule.id(),
                        %reason,
                        "refusal from non-safety category ignored"
                    );
                }
                RuleDecision::Modified { value, reason } => {
                    if !value.matches_type(context.device_type) {
                        // A rule swapping the variant tag is broken; degrade it.
                        self.metrics.rule_failures.incr();
                        warn!(
                            rule = rule.id(),
                            "rule produced a value of the wrong type, ignoring"
                        );
                        continue;
                    }
                    debug!(rule = rule.id(), %reason, from = %running_value, to = %value, "safety modification");
                    running_value = value;
                    modified = true;
                    decisive_rule_ids.push(rule.id().to_owned());
                    last_reason = Some(reason);
                }
            }
        }

        Ok(SafetyEvaluationResult {
            outcome: if modified {
                SafetyOutcome::Modified
            } else {
                SafetyOutcome::Accepted
            },
            final_value: Some(running_value),
            original_value,
            evaluated_rule_ids,
            decisive_rule_ids,
            reason: last_reason,
            suggested_value: None,
        })
    }

    /// Run one rule off the async thread under the evaluation timeout.
    /// On a refusal the rule's `suggest()` runs in the same contained
    /// execution, so a panicking or runaway suggestion is handled like a
    /// panicking or runaway evaluation.
    ///
    /// `Ok(None)` means skipped (not applicable) or degraded to accept
    /// (rule panicked). A timeout is a pipeline-level error: the runaway
    /// rule cannot be cancelled, so the whole pass is abandoned.
    async fn run_rule(
        &self,
        rule: &Arc<dyn SafetyRule>,
        context: SafetyContext,
    ) -> Result<Option<(RuleDecision, Option<DeviceValue>)>, CoreError> {
        let rule_for_task = Arc::clone(rule);
        let task = tokio::task::spawn_blocking(move || {
            if !rule_for_task.applies_to(&context) {
                return None;
            }
            let decision = rule_for_task.evaluate(&context);
            let suggestion = match decision {
                RuleDecision::Refused { .. } => rule_for_task.suggest(&context),
                _ => None,
            };
            Some((decision, suggestion))
        });

        match tokio::time::timeout(self.rule_timeout, task).await {
            Ok(Ok(outcome)) => Ok(outcome),
            Ok(Err(join_error)) => {
                // Rule contract: a throwing rule is Accepted for that rule.
                self.metrics.rule_failures.incr();
                warn!(rule = rule.id(), error = %join_error, "rule panicked, treated as accepted");
                Ok(None)
            }
            Err(_elapsed) => Err(CoreError::RuleEvaluation {
                rule_id: rule.id().to_owned(),
                reason: format!("timed out after {:?}", self.rule_timeout),
            }),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::model::{DeviceId, DeviceType, DeviceValue};

    fn engine_with(rules: Vec<Arc<dyn SafetyRule>>) -> SafetyEngine {
        SafetyEngine::with_rules(
            &KernelConfig::default(),
            Arc::new(KernelMetrics::new()),
            rules,
        )
    }

    fn fan_context(speed: u8) -> SafetyContext {
        SafetyContext::standalone(
            DeviceId::parse("c1:fan").unwrap(),
            DeviceType::Fan,
            DeviceValue::fan(speed),
        )
    }

    struct StaticRule {
        id: &'static str,
        category: SafetyCategory,
        priority: i32,
        decision: RuleDecision,
    }

    impl SafetyRule for StaticRule {
        fn id(&self) -> &str {
            self.id
        }
        fn name(&self) -> &str {
            self.id
        }
        fn category(&self) -> SafetyCategory {
            self.category
        }
        fn priority(&self) -> i32 {
            self.priority
        }
        fn applies_to(&self, _context: &SafetyContext) -> bool {
            true
        }
        fn evaluate(&self, _context: &SafetyContext) -> RuleDecision {
            self.decision.clone()
        }
    }

    struct PanickingRule;

    impl SafetyRule for PanickingRule {
        fn id(&self) -> &str {
            "test.panics"
        }
        fn name(&self) -> &str {
            "Panics"
        }
        fn category(&self) -> SafetyCategory {
            SafetyCategory::SystemSafety
        }
        fn priority(&self) -> i32 {
            0
        }
        fn applies_to(&self, _context: &SafetyContext) -> bool {
            true
        }
        fn evaluate(&self, _context: &SafetyContext) -> RuleDecision {
            panic!("rule blew up")
        }
    }

    /// A rule observing the running value, proving modification threading.
    struct RefuseIfClamped;

    impl SafetyRule for RefuseIfClamped {
        fn id(&self) -> &str {
            "test.refuse-if-clamped"
        }
        fn name(&self) -> &str {
            "Refuse if clamped"
        }
        fn category(&self) -> SafetyCategory {
            SafetyCategory::SystemSafety
        }
        fn priority(&self) -> i32 {
            0
        }
        fn applies_to(&self, _context: &SafetyContext) -> bool {
            true
        }
        fn evaluate(&self, context: &SafetyContext) -> RuleDecision {
            match context.proposed_value {
                DeviceValue::Fan { speed } if speed > 4 => RuleDecision::Refused {
                    reason: "saw an unclamped value".into(),
                },
                _ => RuleDecision::Accepted,
            }
        }
    }

    #[tokio::test]
    async fn clean_proposal_is_accepted() {
        let engine = SafetyEngine::new(
            &KernelConfig::default(),
            Arc::new(KernelMetrics::new()),
        );
        let result = engine.evaluate(&fan_context(2)).await;
        assert_eq!(result.outcome, SafetyOutcome::Accepted);
        assert_eq!(result.final_value, Some(DeviceValue::fan(2)));
    }

    #[tokio::test]
    async fn overspeed_is_modified_by_the_clamp() {
        let engine = SafetyEngine::new(
            &KernelConfig::default(),
            Arc::new(KernelMetrics::new()),
        );
        let result = engine.evaluate(&fan_context(7)).await;
        assert_eq!(result.outcome, SafetyOutcome::Modified);
        assert_eq!(result.final_value, Some(DeviceValue::fan(4)));
        assert_eq!(result.original_value, DeviceValue::fan(7));
        assert_eq!(result.decisive_rule_ids, vec!["hardcoded.fan-speed-limit"]);
    }

    #[tokio::test]
    async fn downstream_rules_see_the_modified_value() {
        // Clamp runs first (HardcodedSafety), then the SystemSafety probe:
        // the probe must see 4, not 7, or it would refuse.
        let engine = engine_with(vec![
            Arc::new(FanSpeedLimitRule),
            Arc::new(RefuseIfClamped),
        ]);
        let result = engine.evaluate(&fan_context(7)).await;
        assert_eq!(result.outcome, SafetyOutcome::Modified);
        assert_eq!(result.final_value, Some(DeviceValue::fan(4)));
        assert!(result
            .evaluated_rule_ids
            .contains(&"test.refuse-if-clamped".to_owned()));
    }

    #[tokio::test]
    async fn safety_refusal_terminates_the_chain() {
        let engine = engine_with(vec![
            Arc::new(StaticRule {
                id: "test.refuser",
                category: SafetyCategory::HardcodedSafety,
                priority: 0,
                decision: RuleDecision::Refused {
                    reason: "nope".into(),
                },
            }),
            Arc::new(StaticRule {
                id: "test.never-reached",
                category: SafetyCategory::Manual,
                priority: 0,
                decision: RuleDecision::Accepted,
            }),
        ]);
        let result = engine.evaluate(&fan_context(1)).await;
        assert_eq!(result.outcome, SafetyOutcome::Refused);
        assert!(result.final_value.is_none());
        assert_eq!(result.evaluated_rule_ids, vec!["test.refuser"]);
    }

    /// Refuses everything but offers a safe fallback value.
    struct SuggestingRefuser;

    impl SafetyRule for SuggestingRefuser {
        fn id(&self) -> &str {
            "test.suggesting-refuser"
        }
        fn name(&self) -> &str {
            "Suggesting refuser"
        }
        fn category(&self) -> SafetyCategory {
            SafetyCategory::HardcodedSafety
        }
        fn priority(&self) -> i32 {
            0
        }
        fn applies_to(&self, _context: &SafetyContext) -> bool {
            true
        }
        fn evaluate(&self, _context: &SafetyContext) -> RuleDecision {
            RuleDecision::Refused {
                reason: "too fast".into(),
            }
        }
        fn suggest(&self, _context: &SafetyContext) -> Option<DeviceValue> {
            Some(DeviceValue::fan(0))
        }
    }

    #[tokio::test]
    async fn refusal_surfaces_the_rules_suggestion() {
        let engine = engine_with(vec![Arc::new(SuggestingRefuser)]);
        let result = engine.evaluate(&fan_context(3)).await;
        assert_eq!(result.outcome, SafetyOutcome::Refused);
        assert_eq!(result.suggested_value, Some(DeviceValue::fan(0)));
    }

    /// A refusing rule whose suggestion has the wrong variant tag.
    struct BadSuggestionRefuser;

    impl SafetyRule for BadSuggestionRefuser {
        fn id(&self) -> &str {
            "test.bad-suggestion"
        }
        fn name(&self) -> &str {
            "Bad suggestion"
        }
        fn category(&self) -> SafetyCategory {
            SafetyCategory::HardcodedSafety
        }
        fn priority(&self) -> i32 {
            0
        }
        fn applies_to(&self, _context: &SafetyContext) -> bool {
            true
        }
        fn evaluate(&self, _context: &SafetyContext) -> RuleDecision {
            RuleDecision::Refused {
                reason: "refused".into(),
            }
        }
        fn suggest(&self, _context: &SafetyContext) -> Option<DeviceValue> {
            Some(DeviceValue::relay(false))
        }
    }

    #[tokio::test]
    async fn wrong_type_suggestion_is_dropped() {
        let engine = engine_with(vec![Arc::new(BadSuggestionRefuser)]);
        let result = engine.evaluate(&fan_context(3)).await;
        assert_eq!(result.outcome, SafetyOutcome::Refused);
        assert!(result.suggested_value.is_none());
    }

    #[tokio::test]
    async fn non_safety_refusal_does_not_refuse_the_outcome() {
        let engine = engine_with(vec![Arc::new(StaticRule {
            id: "test.manual-refuser",
            category: SafetyCategory::Manual,
            priority: 0,
            decision: RuleDecision::Refused {
                reason: "manual rules have no veto".into(),
            },
        })]);
        let result = engine.evaluate(&fan_context(1)).await;
        assert_eq!(result.outcome, SafetyOutcome::Accepted);
        assert_eq!(result.final_value, Some(DeviceValue::fan(1)));
    }

    #[tokio::test]
    async fn panicking_rule_degrades_to_accept() {
        let engine = engine_with(vec![
            Arc::new(PanickingRule),
            Arc::new(FanSpeedLimitRule),
        ]);
        let result = engine.evaluate(&fan_context(7)).await;
        // The panic is swallowed; the clamp still does its job.
        assert_eq!(result.outcome, SafetyOutcome::Modified);
        assert_eq!(result.final_value, Some(DeviceValue::fan(4)));
    }

    #[tokio::test]
    async fn category_order_beats_registration_order() {
        // Registered backwards; evaluation order must still be
        // HardcodedSafety before Manual.
        let engine = engine_with(vec![
            Arc::new(StaticRule {
                id: "test.manual",
                category: SafetyCategory::Manual,
                priority: 0,
                decision: RuleDecision::Accepted,
            }),
            Arc::new(StaticRule {
                id: "test.hardcoded",
                category: SafetyCategory::HardcodedSafety,
                priority: 0,
                decision: RuleDecision::Accepted,
            }),
        ]);
        let result = engine.evaluate(&fan_context(1)).await;
        assert_eq!(
            result.evaluated_rule_ids,
            vec!["test.hardcoded", "test.manual"]
        );
    }

    struct RunawayRule;

    impl SafetyRule for RunawayRule {
        fn id(&self) -> &str {
            "test.runaway"
        }
        fn name(&self) -> &str {
            "Runaway"
        }
        fn category(&self) -> SafetyCategory {
            SafetyCategory::SystemSafety
        }
        fn priority(&self) -> i32 {
            0
        }
        fn applies_to(&self, _context: &SafetyContext) -> bool {
            true
        }
        fn evaluate(&self, _context: &SafetyContext) -> RuleDecision {
            std::thread::sleep(std::time::Duration::from_millis(500));
            RuleDecision::Accepted
        }
    }

    #[tokio::test]
    async fn timeout_falls_back_to_hardcoded_only() {
        let config = KernelConfig {
            rule_evaluation_timeout: std::time::Duration::from_millis(20),
            ..KernelConfig::default()
        };
        let engine = SafetyEngine::with_rules(
            &config,
            Arc::new(KernelMetrics::new()),
            vec![Arc::new(FanSpeedLimitRule), Arc::new(RunawayRule)],
        );

        let result = engine.evaluate(&fan_context(7)).await;
        // The runaway SystemSafety rule never gets a say; the hardcoded
        // clamp still runs on the degraded path.
        assert_eq!(result.outcome, SafetyOutcome::Modified);
        assert_eq!(result.final_value, Some(DeviceValue::fan(4)));
        assert_eq!(result.evaluated_rule_ids, vec!["hardcoded.fan-speed-limit"]);
    }

    #[tokio::test]
    async fn hardcoded_only_path_skips_everything_else() {
        let engine = engine_with(vec![
            Arc::new(FanSpeedLimitRule),
            Arc::new(StaticRule {
                id: "test.system-refuser",
                category: SafetyCategory::SystemSafety,
                priority: 0,
                decision: RuleDecision::Refused {
                    reason: "would refuse on the full path".into(),
                },
            }),
        ]);
        let result = engine.evaluate_hardcoded_only(&fan_context(7)).await;
        assert_eq!(result.outcome, SafetyOutcome::Modified);
        assert_eq!(result.final_value, Some(DeviceValue::fan(4)));
        assert_eq!(result.evaluated_rule_ids, vec!["hardcoded.fan-speed-limit"]);
    }
}
