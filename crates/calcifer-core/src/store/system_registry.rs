// ── Functional system registry ──
//
// Resolves device -> system membership at query time. Membership is
// exclusive; registration of a device already owned by another system is
// refused so interlock rules always see an unambiguous sibling set.

use std::sync::Arc;

use dashmap::DashMap;
use tracing::debug;

use crate::error::CoreError;
use crate::model::{DeviceId, FunctionalSystem, FunctionalSystemId};

/// In-process registry of functional systems with a reverse device index.
#[derive(Default)]
pub struct FunctionalSystemRegistry {
    systems: DashMap<FunctionalSystemId, Arc<FunctionalSystem>>,
    by_device: DashMap<DeviceId, FunctionalSystemId>,
}

impl FunctionalSystemRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register or replace a system definition.
    ///
    /// Fails with `MembershipConflict` if any member device already
    /// belongs to a different system; on failure nothing is changed.
    pub fn register(&self, system: FunctionalSystem) -> Result<(), CoreError> {
        for device_id in &system.device_ids {
            if let Some(owner) = self.by_device.get(device_id) {
                if *owner != system.id {
                    return Err(CoreError::MembershipConflict {
                        device: device_id.canonical(),
                        existing: owner.to_string(),
                    });
                }
            }
        }

        // Replacing a system may shrink its membership.
        if let Some(previous) = self.systems.get(&system.id) {
            for device_id in &previous.device_ids {
                if !system.device_ids.contains(device_id) {
                    self.by_device.remove(device_id);
                }
            }
        }

        for device_id in &system.device_ids {
            self.by_device.insert(device_id.clone(), system.id.clone());
        }
        debug!(system = %system.id, members = system.device_ids.len(), "system registered");
        self.systems.insert(system.id.clone(), Arc::new(system));
        Ok(())
    }

    /// Remove a system and its membership mappings.
    pub fn unregister(&self, system_id: &FunctionalSystemId) -> Option<Arc<FunctionalSystem>> {
        let removed = self.systems.remove(system_id).map(|(_, s)| s);
        if let Some(ref system) = removed {
            for device_id in &system.device_ids {
                self.by_device.remove(device_id);
            }
        }
        removed
    }

    pub fn get(&self, system_id: &FunctionalSystemId) -> Option<Arc<FunctionalSystem>> {
        self.systems.get(system_id).map(|s| Arc::clone(s.value()))
    }

    /// The system a device belongs to, if any.
    pub fn system_for_device(&self, device_id: &DeviceId) -> Option<Arc<FunctionalSystem>> {
        let system_id = self.by_device.get(device_id)?;
        self.get(&system_id)
    }

    pub fn all(&self) -> Vec<Arc<FunctionalSystem>> {
        self.systems.iter().map(|s| Arc::clone(s.value())).collect()
    }
}
