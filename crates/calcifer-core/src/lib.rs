// calcifer-core: Twin-state kernel for the Calcifer device controller

pub mod audit;
pub mod calc;
pub mod config;
pub mod convert;
pub mod dispatch;
pub mod error;
pub mod event;
pub mod health;
pub mod idempotency;
pub mod kernel;
pub mod logic;
pub mod metrics;
pub mod model;
pub mod reconcile;
pub mod resolve;
pub mod safety;
pub mod store;
pub mod sweeper;

pub use error::CoreError;

// Re-export the most commonly used types at the crate root for ergonomics.
pub use config::KernelConfig;
pub use kernel::{Kernel, KernelBuilder};
pub use model::{
    DeviceId, DeviceTwinSnapshot, DeviceType, DeviceValue, FunctionalSystem,
    FunctionalSystemId, Override, OverrideCategory, OverrideScope, OverrideTarget, UserIntent,
};
pub use reconcile::ReconcileOutcome;
