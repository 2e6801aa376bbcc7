// ── Override store ──
//
// Durable primary behind the `OverrideRepository` seam, fronted by an
// in-process hot cache. Writes are write-through, durable store first: if
// the primary fails, the cache is left untouched so reads never serve a
// value the durable store doesn't have.
//
// Cache layout: target key -> category-ordinal-ordered map. One override
// per (target, category) by construction; priority queries walk the map
// backwards.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use tracing::debug;

use crate::error::CoreError;
use crate::model::{Override, OverrideCategory};

/// Durable persistence seam for overrides.
#[async_trait]
pub trait OverrideRepository: Send + Sync {
    /// Insert or replace by (target, category).
    async fn upsert(&self, override_entry: Override) -> Result<(), CoreError>;

    /// Delete by (target, category); `true` if something was removed.
    async fn delete(
        &self,
        target_key: &str,
        category: OverrideCategory,
    ) -> Result<bool, CoreError>;

    /// Full scan, used by warmup and the expiration sweep.
    async fn load_all(&self) -> Result<Vec<Override>, CoreError>;
}

/// In-memory repository: the durable store of tests and the dev daemon.
#[derive(Default)]
pub struct MemoryOverrideRepository {
    entries: DashMap<(String, OverrideCategory), Override>,
}

impl MemoryOverrideRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl OverrideRepository for MemoryOverrideRepository {
    async fn upsert(&self, override_entry: Override) -> Result<(), CoreError> {
        self.entries.insert(
            (override_entry.target.key(), override_entry.category),
            override_entry,
        );
        Ok(())
    }

    async fn delete(
        &self,
        target_key: &str,
        category: OverrideCategory,
    ) -> Result<bool, CoreError> {
        Ok(self
            .entries
            .remove(&(target_key.to_owned(), category))
            .is_some())
    }

    async fn load_all(&self) -> Result<Vec<Override>, CoreError> {
        Ok(self.entries.iter().map(|e| e.value().clone()).collect())
    }
}

/// Write-through override store: durable primary + hot cache + per-target
/// priority index.
pub struct OverrideStore {
    primary: Arc<dyn OverrideRepository>,
    /// target key -> (category ordinal -> override)
    cache: DashMap<String, BTreeMap<u8, Override>>,
}

impl OverrideStore {
    pub fn new(primary: Arc<dyn OverrideRepository>) -> Self {
        Self {
            primary,
            cache: DashMap::new(),
        }
    }

    /// Load all non-expired overrides from the primary into the cache.
    pub async fn warmup(&self) -> Result<usize, CoreError> {
        let now = Utc::now();
        let mut loaded = 0usize;
        for override_entry in self.primary.load_all().await? {
            if override_entry.is_expired(now) {
                continue;
            }
            self.cache_put(override_entry);
            loaded += 1;
        }
        debug!(loaded, "override cache warmed up");
        Ok(loaded)
    }

    /// Upsert by (target, category): durable store first, cache second.
    pub async fn save(&self, override_entry: Override) -> Result<Override, CoreError> {
        self.primary.upsert(override_entry.clone()).await?;
        self.cache_put(override_entry.clone());
        Ok(override_entry)
    }

    /// Delete by (target, category). Durable first; the cache entry is
    /// only dropped once the primary acknowledged.
    pub async fn delete_by_target_and_category(
        &self,
        target_key: &str,
        category: OverrideCategory,
    ) -> Result<bool, CoreError> {
        let existed = self.primary.delete(target_key, category).await?;
        if let Some(mut per_target) = self.cache.get_mut(target_key) {
            per_target.remove(&category.ordinal());
            if per_target.is_empty() {
                drop(per_target);
                self.cache.remove(target_key);
            }
        }
        Ok(existed)
    }

    /// Point lookup. Expired entries read as absent (cache TTL semantics).
    pub fn find_by_target_and_category(
        &self,
        target_key: &str,
        category: OverrideCategory,
    ) -> Option<Override> {
        let now = Utc::now();
        self.cache
            .get(target_key)
            .and_then(|per_target| per_target.get(&category.ordinal()).cloned())
            .filter(|o| !o.is_expired(now))
    }

    /// Active overrides for a target, highest category first.
    pub fn find_active_by_target(&self, target_key: &str) -> Vec<Override> {
        let now = Utc::now();
        self.cache
            .get(target_key)
            .map(|per_target| {
                per_target
                    .values()
                    .rev()
                    .filter(|o| !o.is_expired(now))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Expired entries from the durable store (the sweep's worklist).
    pub async fn find_expired(&self) -> Result<Vec<Override>, CoreError> {
        let now = Utc::now();
        Ok(self
            .primary
            .load_all()
            .await?
            .into_iter()
            .filter(|o| o.is_expired(now))
            .collect())
    }

    fn cache_put(&self, override_entry: Override) {
        self.cache
            .entry(override_entry.target.key())
            .or_default()
            .insert(override_entry.category.ordinal(), override_entry);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use chrono::{DateTime, Duration, Utc};

    use crate::model::{DeviceId, DeviceValue, OverrideTarget};

    fn override_for(
        category: OverrideCategory,
        expires_at: Option<DateTime<Utc>>,
    ) -> Override {
        Override {
            target: OverrideTarget::Device(DeviceId::new("c1", "fan").unwrap()),
            category,
            value: DeviceValue::fan(4),
            reason: "test".into(),
            created_by: "op".into(),
            created_at: Utc::now(),
            expires_at,
        }
    }

    fn store() -> OverrideStore {
        OverrideStore::new(Arc::new(MemoryOverrideRepository::new()))
    }

    #[tokio::test]
    async fn save_is_upsert_per_target_and_category() {
        let store = store();
        store
            .save(override_for(OverrideCategory::Manual, None))
            .await
            .unwrap();

        let mut replacement = override_for(OverrideCategory::Manual, None);
        replacement.value = DeviceValue::fan(1);
        store.save(replacement).await.unwrap();

        let active = store.find_active_by_target("c1:fan");
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].value, DeviceValue::fan(1));
    }

    #[tokio::test]
    async fn active_list_is_priority_descending_and_expiry_filtered() {
        let store = store();
        let future = Some(Utc::now() + Duration::minutes(5));
        let past = Some(Utc::now() - Duration::seconds(1));

        store
            .save(override_for(OverrideCategory::Manual, future))
            .await
            .unwrap();
        store
            .save(override_for(OverrideCategory::Emergency, past))
            .await
            .unwrap();
        store
            .save(override_for(OverrideCategory::Maintenance, None))
            .await
            .unwrap();

        let active = store.find_active_by_target("c1:fan");
        let categories: Vec<OverrideCategory> = active.iter().map(|o| o.category).collect();
        assert_eq!(
            categories,
            vec![OverrideCategory::Maintenance, OverrideCategory::Manual]
        );
    }

    #[tokio::test]
    async fn expired_point_lookup_reads_as_absent() {
        let store = store();
        let past = Some(Utc::now() - Duration::seconds(1));
        store
            .save(override_for(OverrideCategory::Manual, past))
            .await
            .unwrap();

        assert!(store
            .find_by_target_and_category("c1:fan", OverrideCategory::Manual)
            .is_none());
        // Still visible to the sweep via the durable store.
        assert_eq!(store.find_expired().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn delete_clears_both_layers() {
        let store = store();
        store
            .save(override_for(OverrideCategory::Maintenance, None))
            .await
            .unwrap();

        assert!(store
            .delete_by_target_and_category("c1:fan", OverrideCategory::Maintenance)
            .await
            .unwrap());
        assert!(store.find_active_by_target("c1:fan").is_empty());
        assert!(!store
            .delete_by_target_and_category("c1:fan", OverrideCategory::Maintenance)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn warmup_skips_expired_entries() {
        let repository = Arc::new(MemoryOverrideRepository::new());
        repository
            .upsert(override_for(OverrideCategory::Manual, None))
            .await
            .unwrap();
        repository
            .upsert(override_for(
                OverrideCategory::Emergency,
                Some(Utc::now() - Duration::seconds(10)),
            ))
            .await
            .unwrap();

        let store = OverrideStore::new(repository);
        assert_eq!(store.warmup().await.unwrap(), 1);
        assert_eq!(store.find_active_by_target("c1:fan").len(), 1);
    }

    /// Primary failure must leave the cache untouched.
    struct FailingRepository;

    #[async_trait]
    impl OverrideRepository for FailingRepository {
        async fn upsert(&self, _override_entry: Override) -> Result<(), CoreError> {
            Err(CoreError::Storage {
                reason: "primary down".into(),
            })
        }

        async fn delete(
            &self,
            _target_key: &str,
            _category: OverrideCategory,
        ) -> Result<bool, CoreError> {
            Err(CoreError::Storage {
                reason: "primary down".into(),
            })
        }

        async fn load_all(&self) -> Result<Vec<Override>, CoreError> {
            Ok(Vec::new())
        }
    }

    #[tokio::test]
    async fn primary_failure_does_not_populate_cache() {
        let store = OverrideStore::new(Arc::new(FailingRepository));
        let result = store
            .save(override_for(OverrideCategory::Manual, None))
            .await;
        assert!(result.is_err());
        assert!(store.find_active_by_target("c1:fan").is_empty());
    }
}
