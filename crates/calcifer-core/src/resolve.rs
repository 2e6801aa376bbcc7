// ── Override resolution ──
//
// Given a device (and optionally its system), pick the single override
// that should replace intent. Expired entries are filtered before any
// ordering happens; ties on category break toward the more specific
// DEVICE scope, then toward the newest override.

use std::cmp::Ordering;
use std::sync::Arc;

use chrono::Utc;

use crate::model::{DeviceId, FunctionalSystemId, Override, OverrideScope};
use crate::store::OverrideStore;

/// Resolves the effective override for a device.
pub struct OverrideResolver {
    overrides: Arc<OverrideStore>,
}

impl OverrideResolver {
    pub fn new(overrides: Arc<OverrideStore>) -> Self {
        Self { overrides }
    }

    /// The override that wins for this device right now, or `None`.
    ///
    /// Ordering: category descending (EMERGENCY highest), then scope
    /// (DEVICE before SYSTEM), then `created_at` descending.
    pub fn resolve_effective(
        &self,
        device_id: &DeviceId,
        system_id: Option<&FunctionalSystemId>,
    ) -> Option<Override> {
        let mut candidates = self.overrides.find_active_by_target(&device_id.canonical());
        if let Some(system_id) = system_id {
            candidates.extend(self.overrides.find_active_by_target(system_id.as_str()));
        }

        // The store already filters lazily, but resolution re-checks so a
        // boundary-straddling read cannot leak an expired winner.
        let now = Utc::now();
        candidates.retain(|o| !o.is_expired(now));

        candidates.sort_by(compare_precedence);
        candidates.into_iter().next()
    }
}

/// Total precedence order; the head of a sorted list is the winner.
pub fn compare_precedence(a: &Override, b: &Override) -> Ordering {
    b.category
        .cmp(&a.category)
        .then_with(|| scope_rank(a.target.scope()).cmp(&scope_rank(b.target.scope())))
        .then_with(|| b.created_at.cmp(&a.created_at))
}

fn scope_rank(scope: OverrideScope) -> u8 {
    match scope {
        OverrideScope::Device => 0,
        OverrideScope::System => 1,
    }
}
