// ── Device types and tagged values ──
//
// Every value in the twin is a tagged variant whose tag must match the
// device's type. There is no untyped payload anywhere in the kernel; the
// bus boundary decodes straight into these variants.

use std::fmt;

use serde::{Deserialize, Serialize};

use calcifer_bus::DeviceFamily;

use crate::error::CoreError;
use crate::model::DeviceId;

/// Highest fan speed step (5 discrete states, 0..=4).
pub const FAN_SPEED_MAX: u8 = calcifer_bus::payload::FAN_SPEED_MAX;

/// What a device can do: produce readings or accept commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Capability {
    /// Actuator: reconciled and commanded.
    Output,
    /// Sensor: readings only, never reconciled.
    Input,
}

/// The device taxonomy known to the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DeviceType {
    Relay,
    Fan,
    TemperatureSensor,
}

impl DeviceType {
    pub fn capability(self) -> Capability {
        match self {
            Self::Relay | Self::Fan => Capability::Output,
            Self::TemperatureSensor => Capability::Input,
        }
    }

    /// The wire family this type maps to.
    pub fn family(self) -> DeviceFamily {
        match self {
            Self::Relay => DeviceFamily::DigitalOutput,
            Self::Fan => DeviceFamily::Fan,
            Self::TemperatureSensor => DeviceFamily::Temperature,
        }
    }

    /// Inverse of [`family`](Self::family).
    pub fn from_family(family: DeviceFamily) -> Self {
        match family {
            DeviceFamily::DigitalOutput => Self::Relay,
            DeviceFamily::Fan => Self::Fan,
            DeviceFamily::Temperature => Self::TemperatureSensor,
        }
    }
}

impl fmt::Display for DeviceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Relay => "RELAY",
            Self::Fan => "FAN",
            Self::TemperatureSensor => "TEMPERATURE_SENSOR",
        };
        f.write_str(name)
    }
}

/// A typed device value.
///
/// `Fan::speed` is deliberately an unvalidated `u8`: the wire boundary
/// rejects out-of-range feedback, while operator-submitted values travel
/// through the safety engine, which clamps them (the fan speed limit rule).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DeviceValue {
    Relay { on: bool },
    Fan { speed: u8 },
    Temperature { celsius: f64 },
}

impl DeviceValue {
    pub fn relay(on: bool) -> Self {
        Self::Relay { on }
    }

    pub fn fan(speed: u8) -> Self {
        Self::Fan { speed }
    }

    pub fn temperature(celsius: f64) -> Self {
        Self::Temperature { celsius }
    }

    /// The device type this variant belongs to.
    pub fn device_type(&self) -> DeviceType {
        match self {
            Self::Relay { .. } => DeviceType::Relay,
            Self::Fan { .. } => DeviceType::Fan,
            Self::Temperature { .. } => DeviceType::TemperatureSensor,
        }
    }

    /// Whether the variant tag matches the given device type.
    pub fn matches_type(&self, device_type: DeviceType) -> bool {
        self.device_type() == device_type
    }

    /// Range validation for boundary input (wire and REST payloads).
    pub fn validate(&self) -> Result<(), CoreError> {
        match self {
            Self::Fan { speed } if *speed > FAN_SPEED_MAX => Err(CoreError::validation(
                "value.speed",
                format!("fan speed {speed} out of range 0..={FAN_SPEED_MAX}"),
            )),
            Self::Temperature { celsius } if !celsius.is_finite() => Err(CoreError::validation(
                "value.celsius",
                "temperature must be finite",
            )),
            _ => Ok(()),
        }
    }

    /// Enforce the variant/type invariant, naming the offending device.
    pub fn ensure_matches(
        &self,
        device_id: &DeviceId,
        device_type: DeviceType,
    ) -> Result<(), CoreError> {
        if self.matches_type(device_type) {
            Ok(())
        } else {
            Err(CoreError::TypeMismatch {
                device: device_id.canonical(),
                device_type,
                value: self.to_string(),
            })
        }
    }
}

impl fmt::Display for DeviceValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Relay { on } => write!(f, "relay({})", if *on { "on" } else { "off" }),
            Self::Fan { speed } => write!(f, "fan({speed})"),
            Self::Temperature { celsius } => write!(f, "temp({celsius}°C)"),
        }
    }
}
