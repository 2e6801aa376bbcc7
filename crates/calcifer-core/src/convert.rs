// ── Wire <-> domain conversions ──
//
// The bus crate speaks families and raw payload values; the kernel
// speaks typed twins. These are the only two functions that cross that
// line.

use calcifer_bus::payload::{encode_fan_speed, encode_switch};
use calcifer_bus::{FeedbackValue, WireCommand};
use calcifer_bus::routing::command_topic;

use crate::error::CoreError;
use crate::model::{DeviceId, DeviceValue};

/// Decoded feedback payload -> typed device value.
pub fn value_from_feedback(value: FeedbackValue) -> DeviceValue {
    match value {
        FeedbackValue::Switch(on) => DeviceValue::relay(on),
        FeedbackValue::FanSpeed(speed) => DeviceValue::fan(speed),
        FeedbackValue::Temperature(celsius) => DeviceValue::temperature(celsius),
    }
}

/// Desired value -> outbound wire command.
///
/// Only actuator values encode; a sensor value here is a kernel bug
/// surfaced as an internal error rather than a silent bad publish.
pub fn command_for(device_id: &DeviceId, value: &DeviceValue) -> Result<WireCommand, CoreError> {
    let payload = match value {
        DeviceValue::Relay { on } => encode_switch(*on).to_owned(),
        DeviceValue::Fan { speed } => encode_fan_speed(*speed),
        DeviceValue::Temperature { .. } => {
            return Err(CoreError::Internal(format!(
                "attempted to command sensor device {device_id}"
            )));
        }
    };

    Ok(WireCommand {
        topic: command_topic(
            device_id.controller(),
            value.device_type().family(),
            device_id.component(),
        ),
        payload,
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn feedback_values_map_to_typed_variants() {
        assert_eq!(
            value_from_feedback(FeedbackValue::Switch(true)),
            DeviceValue::relay(true)
        );
        assert_eq!(
            value_from_feedback(FeedbackValue::FanSpeed(3)),
            DeviceValue::fan(3)
        );
        assert_eq!(
            value_from_feedback(FeedbackValue::Temperature(19.5)),
            DeviceValue::temperature(19.5)
        );
    }

    #[test]
    fn relay_command_encodes_binary_payload() {
        let device_id = DeviceId::parse("termocamino:pump").unwrap();
        let command = command_for(&device_id, &DeviceValue::relay(true)).unwrap();
        assert_eq!(command.topic, "/termocamino/digital_output/pump/set");
        assert_eq!(command.payload, "1");
    }

    #[test]
    fn fan_command_encodes_decimal_payload() {
        let device_id = DeviceId::parse("termocamino:fan").unwrap();
        let command = command_for(&device_id, &DeviceValue::fan(4)).unwrap();
        assert_eq!(command.topic, "/termocamino/fan/fan/set");
        assert_eq!(command.payload, "4");
    }

    #[test]
    fn sensor_values_refuse_to_encode() {
        let device_id = DeviceId::parse("c1:probe").unwrap();
        assert!(command_for(&device_id, &DeviceValue::temperature(20.0)).is_err());
    }
}
