//! Property tests for override resolution: the winner is always the
//! maximal element under (category desc, scope DEVICE>SYSTEM,
//! created_at desc), computed over the expiry-filtered candidate set.
#![allow(clippy::unwrap_used)]

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use proptest::prelude::*;

use calcifer_core::model::{
    DeviceId, DeviceValue, FunctionalSystemId, Override, OverrideCategory, OverrideScope,
    OverrideTarget,
};
use calcifer_core::resolve::OverrideResolver;
use calcifer_core::store::{MemoryOverrideRepository, OverrideStore};

fn device_id() -> DeviceId {
    DeviceId::parse("c1:fan").unwrap()
}

fn system_id() -> FunctionalSystemId {
    FunctionalSystemId::new("heating").unwrap()
}

#[derive(Debug, Clone)]
struct OverrideSpec {
    category: OverrideCategory,
    device_scope: bool,
    created_offset_secs: i64,
    expires_offset_secs: Option<i64>,
}

fn category_strategy() -> impl Strategy<Value = OverrideCategory> {
    prop_oneof![
        Just(OverrideCategory::Manual),
        Just(OverrideCategory::Scheduled),
        Just(OverrideCategory::Maintenance),
        Just(OverrideCategory::Emergency),
    ]
}

fn spec_strategy() -> impl Strategy<Value = OverrideSpec> {
    (
        category_strategy(),
        any::<bool>(),
        -86_400i64..0,
        proptest::option::of(-3_600i64..3_600),
    )
        .prop_map(
            |(category, device_scope, created_offset_secs, expires_offset_secs)| OverrideSpec {
                category,
                device_scope,
                created_offset_secs,
                expires_offset_secs,
            },
        )
}

fn materialize(spec: &OverrideSpec, now: DateTime<Utc>) -> Override {
    Override {
        target: if spec.device_scope {
            OverrideTarget::Device(device_id())
        } else {
            OverrideTarget::System(system_id())
        },
        category: spec.category,
        value: DeviceValue::fan(4),
        reason: "prop".into(),
        created_by: "prop".into(),
        created_at: now + Duration::seconds(spec.created_offset_secs),
        expires_at: spec
            .expires_offset_secs
            .map(|offset| now + Duration::seconds(offset)),
    }
}

/// Reference model: filter expired, then take the maximum under the
/// documented precedence key.
fn reference_winner(candidates: &[Override], now: DateTime<Utc>) -> Option<Override> {
    candidates
        .iter()
        .filter(|o| !o.is_expired(now))
        .max_by_key(|o| {
            (
                o.category,
                o.target.scope() == OverrideScope::Device,
                o.created_at,
            )
        })
        .cloned()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// P3: the resolver agrees with the reference maximal element.
    #[test]
    fn resolver_returns_the_maximal_active_override(specs in proptest::collection::vec(spec_strategy(), 0..8)) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()
            .unwrap();

        runtime.block_on(async move {
            let now = Utc::now();
            let store = Arc::new(OverrideStore::new(Arc::new(MemoryOverrideRepository::new())));

            // The store upserts by (target, category); mirror that in the
            // reference set so both sides see identical candidates.
            let mut by_key = std::collections::BTreeMap::new();
            for spec in &specs {
                let o = materialize(spec, now);
                by_key.insert((o.target.key(), o.category), o.clone());
                store.save(o).await.unwrap();
            }
            let candidates: Vec<Override> = by_key.into_values().collect();

            let resolved = OverrideResolver::new(store)
                .resolve_effective(&device_id(), Some(&system_id()));
            let expected = reference_winner(&candidates, Utc::now());

            match (resolved, expected) {
                (None, None) => {}
                (Some(got), Some(want)) => {
                    prop_assert_eq!(got.category, want.category);
                    prop_assert_eq!(got.target.scope(), want.target.scope());
                }
                (got, want) => {
                    return Err(TestCaseError::fail(format!(
                        "resolver {got:?} disagrees with reference {want:?}"
                    )));
                }
            }
            Ok(())
        })?;
    }

    /// P5: permanent overrides are never reported as expired.
    #[test]
    fn permanent_overrides_never_expire(offset_days in 0i64..36_500) {
        let o = Override {
            target: OverrideTarget::Device(device_id()),
            category: OverrideCategory::Manual,
            value: DeviceValue::fan(1),
            reason: "prop".into(),
            created_by: "prop".into(),
            created_at: Utc::now(),
            expires_at: None,
        };
        prop_assert!(!o.is_expired(Utc::now() + Duration::days(offset_days)));
    }

    /// P6: the store holds at most one override per (target, category).
    #[test]
    fn at_most_one_override_per_target_and_category(specs in proptest::collection::vec(spec_strategy(), 1..16)) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()
            .unwrap();

        runtime.block_on(async move {
            let now = Utc::now();
            let store = OverrideStore::new(Arc::new(MemoryOverrideRepository::new()));
            for spec in &specs {
                store.save(materialize(spec, now)).await.unwrap();
            }

            for target_key in ["c1:fan", "heating"] {
                let active = store.find_active_by_target(target_key);
                let mut categories: Vec<OverrideCategory> =
                    active.iter().map(|o| o.category).collect();
                let before = categories.len();
                categories.dedup();
                prop_assert_eq!(before, categories.len(), "duplicate category for {}", target_key);
            }
            Ok(())
        })?;
    }
}
