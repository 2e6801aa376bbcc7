// ── Twin store ──
//
// Per-device composite record with versioned compare-and-swap writes.
// Each record carries an epoch; a writer reads the epoch, stages its
// mutation on a copy, and commits only if the epoch is unchanged. All
// three slots share the one epoch, so a snapshot read never observes a
// torn write across slot types.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tracing::{debug, warn};

use crate::config::KernelConfig;
use crate::error::CoreError;
use crate::metrics::KernelMetrics;
use crate::model::{
    Capability, DesiredDeviceState, DeviceId, DeviceTwinSnapshot, DeviceType,
    ReportedDeviceState, UserIntent,
};

/// One device's composite record. Cloned on stage, swapped on commit.
#[derive(Debug, Clone, Default)]
struct TwinRecord {
    epoch: u64,
    intent: Option<UserIntent>,
    reported: Option<ReportedDeviceState>,
    desired: Option<DesiredDeviceState>,
    last_activity: Option<DateTime<Utc>>,
}

impl TwinRecord {
    /// Slot types in probe order (Intent, Reported, Desired).
    fn slot_types(&self) -> impl Iterator<Item = DeviceType> + '_ {
        self.intent
            .iter()
            .map(|i| i.device_type)
            .chain(self.reported.iter().map(|r| r.device_type))
            .chain(self.desired.iter().map(|d| d.device_type))
    }
}

/// Versioned store of device twins plus the active-OUTPUT index.
pub struct TwinStore {
    records: DashMap<DeviceId, TwinRecord>,
    /// Exactly the devices whose Desired slot holds an OUTPUT-capability
    /// value. Maintained on every desired write and delete.
    active_outputs: DashMap<DeviceId, ()>,
    max_retries: u32,
    backoff_initial: std::time::Duration,
    metrics: Arc<KernelMetrics>,
}

impl TwinStore {
    pub fn new(config: &KernelConfig, metrics: Arc<KernelMetrics>) -> Self {
        Self {
            records: DashMap::new(),
            active_outputs: DashMap::new(),
            max_retries: config.cas_max_retries,
            backoff_initial: config.cas_backoff_initial,
            metrics,
        }
    }

    // ── Writes ───────────────────────────────────────────────────────

    /// Overwrite the Intent slot.
    pub async fn save_intent(&self, intent: UserIntent) -> Result<(), CoreError> {
        let device_id = intent.device_id.clone();
        self.mutate(&device_id, move |record| {
            record.intent = Some(intent.clone());
        })
        .await
    }

    /// Overwrite the Reported slot.
    pub async fn save_reported(&self, reported: ReportedDeviceState) -> Result<(), CoreError> {
        let device_id = reported.device_id.clone();
        self.mutate(&device_id, move |record| {
            record.reported = Some(reported.clone());
        })
        .await
    }

    /// Overwrite the Desired slot and maintain the active-OUTPUT index.
    pub async fn save_desired(&self, desired: DesiredDeviceState) -> Result<(), CoreError> {
        let device_id = desired.device_id.clone();
        let capability = desired.device_type.capability();
        let staged = desired.clone();
        self.mutate(&device_id, move |record| {
            record.desired = Some(staged.clone());
        })
        .await?;

        if capability == Capability::Output {
            self.active_outputs.insert(device_id, ());
        } else {
            self.active_outputs.remove(&device_id);
        }
        Ok(())
    }

    /// Remove all slots and the index entry.
    pub fn delete_device(&self, device_id: &DeviceId) {
        self.records.remove(device_id);
        self.active_outputs.remove(device_id);
    }

    // ── Reads ────────────────────────────────────────────────────────

    pub fn find_intent(&self, device_id: &DeviceId) -> Option<UserIntent> {
        self.records.get(device_id).and_then(|r| r.intent.clone())
    }

    pub fn find_reported(&self, device_id: &DeviceId) -> Option<ReportedDeviceState> {
        self.records.get(device_id).and_then(|r| r.reported.clone())
    }

    pub fn find_desired(&self, device_id: &DeviceId) -> Option<DesiredDeviceState> {
        self.records.get(device_id).and_then(|r| r.desired.clone())
    }

    pub fn find_last_activity(&self, device_id: &DeviceId) -> Option<DateTime<Utc>> {
        self.records.get(device_id).and_then(|r| r.last_activity)
    }

    /// Desired states of every device in the active-OUTPUT index.
    pub fn find_all_active_outputs(&self) -> Vec<DesiredDeviceState> {
        self.active_outputs
            .iter()
            .filter_map(|entry| self.find_desired(entry.key()))
            .collect()
    }

    /// Single multi-field read of the whole twin.
    ///
    /// Returns `Ok(None)` if no slot has ever been written. The snapshot's
    /// device type is derived from the first populated slot in order
    /// Intent, Reported, Desired; disagreement across slots rejects the
    /// read rather than returning a half-trustworthy snapshot.
    pub fn find_twin_snapshot(
        &self,
        device_id: &DeviceId,
    ) -> Result<Option<DeviceTwinSnapshot>, CoreError> {
        let Some(record) = self.records.get(device_id).map(|r| r.value().clone()) else {
            return Ok(None);
        };

        let mut types = record.slot_types().collect::<Vec<_>>().into_iter();
        let Some(device_type) = types.next() else {
            return Ok(None);
        };
        if let Some(disagreeing) = types.find(|t| *t != device_type) {
            return Err(CoreError::TypeInconsistency {
                device: device_id.canonical(),
                details: format!("{device_type} vs {disagreeing}"),
            });
        }

        Ok(Some(DeviceTwinSnapshot {
            device_id: device_id.clone(),
            device_type,
            intent: record.intent,
            reported: record.reported,
            desired: record.desired,
        }))
    }

    // ── Housekeeping ─────────────────────────────────────────────────

    /// Drop index entries whose primary record is gone or whose Desired
    /// slot no longer holds an OUTPUT value. Returns how many were removed.
    pub fn sweep_orphan_index_entries(&self) -> usize {
        let orphans: Vec<DeviceId> = self
            .active_outputs
            .iter()
            .map(|entry| entry.key().clone())
            .filter(|id| {
                self.records.get(id).is_none_or(|r| {
                    r.desired
                        .as_ref()
                        .is_none_or(|d| d.device_type.capability() != Capability::Output)
                })
            })
            .collect();

        for id in &orphans {
            self.active_outputs.remove(id);
            debug!(device = %id, "removed orphan active-output index entry");
        }
        orphans.len()
    }

    /// Devices whose last activity is older than the threshold. Flagged
    /// only; nothing is deleted.
    pub fn find_stale_devices(&self, threshold: chrono::Duration) -> Vec<DeviceId> {
        let cutoff = Utc::now() - threshold;
        self.records
            .iter()
            .filter(|entry| {
                entry
                    .value()
                    .last_activity
                    .is_some_and(|at| at < cutoff)
            })
            .map(|entry| entry.key().clone())
            .collect()
    }

    // ── CAS machinery ────────────────────────────────────────────────

    /// Stage-and-commit loop: read epoch, clone, apply, commit iff the
    /// epoch is unchanged; exponential backoff between attempts.
    async fn mutate<F>(&self, device_id: &DeviceId, apply: F) -> Result<(), CoreError>
    where
        F: Fn(&mut TwinRecord),
    {
        let mut backoff = self.backoff_initial;

        for attempt in 0..=self.max_retries {
            let observed = self.records.get(device_id).map(|r| r.value().clone());
            let observed_epoch = observed.as_ref().map(|r| r.epoch);

            let mut staged = observed.unwrap_or_default();
            apply(&mut staged);
            staged.epoch += 1;
            staged.last_activity = Some(Utc::now());

            if self.try_commit(device_id, observed_epoch, staged) {
                return Ok(());
            }

            self.metrics.cas_conflicts.incr();
            if attempt < self.max_retries {
                debug!(
                    device = %device_id,
                    attempt,
                    backoff_ms = backoff.as_millis() as u64,
                    "twin CAS conflict, retrying"
                );
                tokio::time::sleep(backoff).await;
                backoff *= 2;
            }
        }

        self.metrics.cas_exhausted.incr();
        warn!(device = %device_id, retries = self.max_retries, "twin CAS retries exhausted");
        Err(CoreError::ConflictExhausted {
            device: device_id.canonical(),
            retries: self.max_retries,
        })
    }

    /// Atomic commit: succeeds only if the record's epoch still matches
    /// what the writer observed at stage time.
    fn try_commit(
        &self,
        device_id: &DeviceId,
        observed_epoch: Option<u64>,
        staged: TwinRecord,
    ) -> bool {
        match self.records.entry(device_id.clone()) {
            Entry::Occupied(mut occupied) => {
                if observed_epoch == Some(occupied.get().epoch) {
                    occupied.insert(staged);
                    true
                } else {
                    false
                }
            }
            Entry::Vacant(vacant) => {
                if observed_epoch.is_none() {
                    vacant.insert(staged);
                    true
                } else {
                    false
                }
            }
        }
    }
}
