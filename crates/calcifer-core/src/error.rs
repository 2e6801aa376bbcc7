// ── Core error types ──
//
// Domain-facing errors from calcifer-core. Boundary layers (bus adapter,
// REST surface) translate these into wire responses; inside the kernel
// they drive the reconcile outcome mapping. Audit and idempotency failures
// deliberately do NOT appear here as hard errors -- those paths degrade to
// logs and metrics instead of failing the originating operation.

use thiserror::Error;

use crate::model::DeviceType;

/// Unified error type for the core crate.
#[derive(Debug, Error)]
pub enum CoreError {
    // ── Boundary validation ──────────────────────────────────────────
    #[error("Validation failed for {field}: {reason}")]
    Validation { field: String, reason: String },

    /// A `DeviceValue` variant that does not match the device's type.
    #[error("Value {value} is not valid for {device_type} device {device}")]
    TypeMismatch {
        device: String,
        device_type: DeviceType,
        value: String,
    },

    // ── Twin store ───────────────────────────────────────────────────
    /// Slots of one twin disagree on device type; the record is corrupt
    /// and the read is refused rather than guessing.
    #[error("Twin {device} has inconsistent slot types: {details}")]
    TypeInconsistency { device: String, details: String },

    /// Optimistic-concurrency retries exhausted.
    #[error("Concurrent writers on {device}: gave up after {retries} retries")]
    ConflictExhausted { device: String, retries: u32 },

    #[error("Device not found: {device}")]
    DeviceNotFound { device: String },

    // ── Functional systems ───────────────────────────────────────────
    #[error("Functional system not found: {system}")]
    SystemNotFound { system: String },

    /// Device membership is exclusive; a second registration is refused.
    #[error("Device {device} already belongs to system {existing}")]
    MembershipConflict { device: String, existing: String },

    // ── Safety / override pipeline ───────────────────────────────────
    /// The safety engine refused the proposed value.
    #[error("Refused by safety rules [{}]: {reason}", rule_ids.join(", "))]
    SafetyRefused {
        reason: String,
        rule_ids: Vec<String>,
    },

    /// An override application was blocked by the safety engine.
    #[error("Override blocked by safety rules [{}]: {reason}", rule_ids.join(", "))]
    OverrideBlocked {
        reason: String,
        rule_ids: Vec<String>,
    },

    /// Declarative rule evaluation failed at the pipeline level
    /// (timeout or executor failure), beyond per-rule degradation.
    #[error("Rule evaluation failed at {rule_id}: {reason}")]
    RuleEvaluation { rule_id: String, reason: String },

    // ── Infrastructure ───────────────────────────────────────────────
    /// Fail-stop gate: a critical dependency is down, no commands flow.
    #[error("Infrastructure unavailable: {}", components.join(", "))]
    InfrastructureUnavailable { components: Vec<String> },

    /// Durable store operation failed.
    #[error("Storage error: {reason}")]
    Storage { reason: String },

    // ── Internal ─────────────────────────────────────────────────────
    #[error("Internal error: {0}")]
    Internal(String),
}

impl CoreError {
    /// Validation helper used across parse boundaries.
    pub fn validation(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            reason: reason.into(),
        }
    }
}
