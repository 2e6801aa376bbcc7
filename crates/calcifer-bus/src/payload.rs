// ── Per-family payload codecs ──
//
// Parse rules (inbound):
//   digital_output: "0"/"LOW" -> off, "1"/"HIGH" -> on; case-insensitive,
//                   whitespace trimmed; anything else rejected.
//   fan:            decimal integer 0..=4 inclusive; out of range rejected.
//   temperature:    floating point; sensor id comes from the routing key.
//
// Encode rules (outbound):
//   digital_output: "0" / "1"
//   fan:            "0".."4"

use serde::{Deserialize, Serialize};

use crate::error::BusError;
use crate::family::DeviceFamily;

/// Highest fan speed step on the wire (5 discrete states, 0..=4).
pub const FAN_SPEED_MAX: u8 = 4;

/// A decoded inbound payload.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum FeedbackValue {
    /// Relay on/off state.
    Switch(bool),
    /// Fan speed step, 0..=4.
    FanSpeed(u8),
    /// Temperature reading in degrees Celsius.
    Temperature(f64),
}

impl FeedbackValue {
    /// Decode a raw payload according to the routed family.
    pub fn parse(family: DeviceFamily, raw: &str) -> Result<Self, BusError> {
        let trimmed = raw.trim();
        match family {
            DeviceFamily::DigitalOutput => parse_switch(trimmed).map(Self::Switch),
            DeviceFamily::Fan => parse_fan_speed(trimmed).map(Self::FanSpeed),
            DeviceFamily::Temperature => {
                trimmed
                    .parse::<f64>()
                    .map(Self::Temperature)
                    .map_err(|e| BusError::Payload {
                        family: "temperature",
                        payload: raw.into(),
                        reason: e.to_string(),
                    })
            }
        }
    }
}

fn parse_switch(trimmed: &str) -> Result<bool, BusError> {
    if trimmed.eq_ignore_ascii_case("low") || trimmed == "0" {
        Ok(false)
    } else if trimmed.eq_ignore_ascii_case("high") || trimmed == "1" {
        Ok(true)
    } else {
        Err(BusError::Payload {
            family: "digital_output",
            payload: trimmed.into(),
            reason: "expected 0/1/LOW/HIGH".into(),
        })
    }
}

fn parse_fan_speed(trimmed: &str) -> Result<u8, BusError> {
    let speed: u8 = trimmed.parse().map_err(|_| BusError::Payload {
        family: "fan",
        payload: trimmed.into(),
        reason: "expected decimal integer".into(),
    })?;
    if speed > FAN_SPEED_MAX {
        return Err(BusError::Payload {
            family: "fan",
            payload: trimmed.into(),
            reason: format!("speed {speed} out of range 0..={FAN_SPEED_MAX}"),
        });
    }
    Ok(speed)
}

/// Encode a relay state for an outbound command payload.
pub fn encode_switch(on: bool) -> &'static str {
    if on { "1" } else { "0" }
}

/// Encode a fan speed for an outbound command payload.
pub fn encode_fan_speed(speed: u8) -> String {
    speed.to_string()
}
