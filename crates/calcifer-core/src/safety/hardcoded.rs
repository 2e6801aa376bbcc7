// ── Hardcoded safety rules ──
//
// The non-negotiable interlocks compiled into the controller. These run
// first in every evaluation and are the only rules executed on the
// degraded (hardcoded-only) path.
//
// Fire-pump interlock roles come from the functional system's
// configuration map: `fire_device` and `pump_device` hold canonical
// device ids.

use crate::model::{DeviceType, DeviceValue, FAN_SPEED_MAX};
use crate::safety::context::SafetyContext;
use crate::safety::rule::{RuleDecision, SafetyCategory, SafetyRule};

/// Configuration key naming the fire relay inside a system.
pub const FIRE_DEVICE_KEY: &str = "fire_device";
/// Configuration key naming the circulation pump relay.
pub const PUMP_DEVICE_KEY: &str = "pump_device";

/// Clamps fan speed proposals to the hardware maximum.
pub struct FanSpeedLimitRule;

impl SafetyRule for FanSpeedLimitRule {
    fn id(&self) -> &str {
        "hardcoded.fan-speed-limit"
    }

    fn name(&self) -> &str {
        "Fan speed limit"
    }

    fn category(&self) -> SafetyCategory {
        SafetyCategory::HardcodedSafety
    }

    fn priority(&self) -> i32 {
        10
    }

    fn applies_to(&self, context: &SafetyContext) -> bool {
        context.device_type == DeviceType::Fan
            && matches!(context.proposed_value, DeviceValue::Fan { .. })
    }

    fn evaluate(&self, context: &SafetyContext) -> RuleDecision {
        match context.proposed_value {
            DeviceValue::Fan { speed } if speed > FAN_SPEED_MAX => RuleDecision::Modified {
                value: DeviceValue::fan(FAN_SPEED_MAX),
                reason: format!("fan speed {speed} clamped to {FAN_SPEED_MAX}"),
            },
            _ => RuleDecision::Accepted,
        }
    }
}

/// Refuses switching the fire relay off while the pump still runs.
pub struct FireRequiresPumpRule;

impl FireRequiresPumpRule {
    /// True when this context is the configured fire device proposing OFF.
    fn is_fire_going_off(context: &SafetyContext) -> bool {
        let Some(system) = context.system.as_deref() else {
            return false;
        };
        system.configured_device(FIRE_DEVICE_KEY).as_ref() == Some(&context.device_id)
            && matches!(context.proposed_value, DeviceValue::Relay { on: false })
    }
}

impl SafetyRule for FireRequiresPumpRule {
    fn id(&self) -> &str {
        "hardcoded.fire-requires-pump"
    }

    fn name(&self) -> &str {
        "Fire off requires pump off"
    }

    fn category(&self) -> SafetyCategory {
        SafetyCategory::HardcodedSafety
    }

    fn priority(&self) -> i32 {
        20
    }

    fn applies_to(&self, context: &SafetyContext) -> bool {
        Self::is_fire_going_off(context)
    }

    fn evaluate(&self, context: &SafetyContext) -> RuleDecision {
        let pump = context
            .system
            .as_deref()
            .and_then(|s| s.configured_device(PUMP_DEVICE_KEY));
        let Some(pump_id) = pump else {
            return RuleDecision::Accepted;
        };

        match context.related_desired(&pump_id) {
            Some(DeviceValue::Relay { on: true }) => RuleDecision::Refused {
                reason: format!("pump {pump_id} is commanded on; fire must stay on"),
            },
            _ => RuleDecision::Accepted,
        }
    }

    /// The acceptable value is the one already in force: fire stays on.
    fn suggest(&self, _context: &SafetyContext) -> Option<DeviceValue> {
        Some(DeviceValue::relay(true))
    }
}

/// Forces the pump on while the fire relay is commanded on.
pub struct PumpFollowsFireRule;

impl PumpFollowsFireRule {
    fn is_pump_going_off(context: &SafetyContext) -> bool {
        let Some(system) = context.system.as_deref() else {
            return false;
        };
        system.configured_device(PUMP_DEVICE_KEY).as_ref() == Some(&context.device_id)
            && matches!(context.proposed_value, DeviceValue::Relay { on: false })
    }

    fn fire_is_commanded_on(context: &SafetyContext) -> bool {
        context
            .system
            .as_deref()
            .and_then(|s| s.configured_device(FIRE_DEVICE_KEY))
            .and_then(|fire_id| context.related_desired(&fire_id).copied())
            == Some(DeviceValue::relay(true))
    }
}

impl SafetyRule for PumpFollowsFireRule {
    fn id(&self) -> &str {
        "hardcoded.pump-follows-fire"
    }

    fn name(&self) -> &str {
        "Pump follows fire"
    }

    fn category(&self) -> SafetyCategory {
        SafetyCategory::HardcodedSafety
    }

    fn priority(&self) -> i32 {
        21
    }

    fn applies_to(&self, context: &SafetyContext) -> bool {
        Self::is_pump_going_off(context)
    }

    fn evaluate(&self, context: &SafetyContext) -> RuleDecision {
        if Self::fire_is_commanded_on(context) {
            RuleDecision::Modified {
                value: DeviceValue::relay(true),
                reason: "fire is commanded on; pump forced on".into(),
            }
        } else {
            RuleDecision::Accepted
        }
    }
}
