// ── Twin-state stores ──
//
// Lock-free keyed storage for twins, overrides, and functional systems.
// Twin writes are mediated by per-device optimistic concurrency; override
// writes are write-through to the durable repository.

mod override_store;
mod system_registry;
mod twin_store;

pub use override_store::{MemoryOverrideRepository, OverrideRepository, OverrideStore};
pub use system_registry::FunctionalSystemRegistry;
pub use twin_store::TwinStore;
