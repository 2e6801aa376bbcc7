// ── Device families on the wire ──
//
// The bus routes messages by family segment, not by the controller's
// device-type taxonomy. `calcifer-core` owns the mapping between the two.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::BusError;

/// Wire-level device family, as it appears in routing keys and topics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DeviceFamily {
    /// Binary actuators (relays). Wire name: `digital_output`.
    DigitalOutput,
    /// Multi-speed fans. Wire name: `fan`.
    Fan,
    /// Temperature probes. Wire name: `temperature`.
    Temperature,
}

impl DeviceFamily {
    /// The exact segment used in routing keys and topics.
    pub fn wire_name(self) -> &'static str {
        match self {
            Self::DigitalOutput => "digital_output",
            Self::Fan => "fan",
            Self::Temperature => "temperature",
        }
    }

    /// Families that accept outbound commands.
    pub fn is_actuator(self) -> bool {
        matches!(self, Self::DigitalOutput | Self::Fan)
    }
}

impl fmt::Display for DeviceFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.wire_name())
    }
}

impl FromStr for DeviceFamily {
    type Err = BusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "digital_output" => Ok(Self::DigitalOutput),
            "fan" => Ok(Self::Fan),
            "temperature" => Ok(Self::Temperature),
            other => Err(BusError::UnknownFamily { name: other.into() }),
        }
    }
}
