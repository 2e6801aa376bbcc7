// ── Twin domain model ──
//
// Every type in this module is the canonical representation of a kernel
// entity. The bus boundary decodes into these; stores, safety rules, and
// the reconciliation pipeline never see anything less typed.

pub mod audit;
pub mod device_id;
pub mod overrides;
pub mod system;
pub mod twin;
pub mod value;

// ── Re-exports ──────────────────────────────────────────────────────
// Flat access: `use calcifer_core::model::*` gives you everything.

// Identity
pub use device_id::DeviceId;
pub use system::{FunctionalSystem, FunctionalSystemId};

// Types and values
pub use value::{Capability, DeviceType, DeviceValue, FAN_SPEED_MAX};

// Twin slots
pub use twin::{DesiredDeviceState, DeviceTwinSnapshot, ReportedDeviceState, UserIntent};

// Overrides
pub use overrides::{Override, OverrideCategory, OverrideScope, OverrideTarget};

// Audit
pub use audit::{AuditEntry, CorrelationId, DecisionType};
