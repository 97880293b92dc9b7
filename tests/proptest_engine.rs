//! Property-based tests for the fetch-and-cache engines.
//!
//! # Properties Tested
//!
//! 1. **Source equivalence**: a lookup returns exactly the requested ids the
//!    source has, whatever mix of cached, corrupt and unknown keys it meets
//! 2. **Warm cache**: an identical second lookup never reaches the source
//! 3. **Whole groups**: after arbitrary member evictions, every returned group
//!    equals its source group; nothing is returned partially

use cacheaside::backend::{CacheBackend, InMemoryBackend};
use cacheaside::config::{CacheConfig, FireAndForget};
use cacheaside::mapping::{PrefixedGroupMapping, PrefixedMapping};
use cacheaside::repository::{InMemoryGroupedRepository, InMemoryRepository};
use cacheaside::{CacheEntity, CacheService};
use proptest::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use tokio_util::sync::CancellationToken;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
struct Item {
    id: u32,
    label: String,
}

impl CacheEntity for Item {
    type Key = u32;
    fn cache_key(&self) -> Self::Key {
        self.id
    }
    fn cache_prefix() -> &'static str {
        "item"
    }
}

fn item(id: u32) -> Item {
    Item {
        id,
        label: format!("item-{}", id),
    }
}

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("Failed to build runtime")
}

fn awaited_service(backend: InMemoryBackend) -> CacheService<InMemoryBackend> {
    CacheService::with_config(
        backend,
        CacheConfig::default().with_fire_and_forget(FireAndForget::none()),
    )
    .expect("valid config")
}

fn sorted_ids(items: &[Item]) -> Vec<u32> {
    let mut ids: Vec<u32> = items.iter().map(|i| i.id).collect();
    ids.sort_unstable();
    ids
}

/// Which ids start out cached, corrupt or untouched.
#[derive(Clone, Debug)]
enum Seed {
    Untouched,
    Cached,
    Corrupt,
}

fn arb_seed() -> impl Strategy<Value = Seed> {
    prop_oneof![Just(Seed::Untouched), Just(Seed::Cached), Just(Seed::Corrupt)]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_lookup_matches_source(
        source in prop::collection::btree_set(0u32..40, 0..25),
        requested in prop::collection::vec(0u32..40, 0..30),
        seeds in prop::collection::vec(arb_seed(), 40),
    ) {
        let rt = runtime();
        let (first, second, calls) = rt.block_on(async {
            let backend = InMemoryBackend::new();
            let cache = awaited_service(backend.clone());
            let repo = InMemoryRepository::new();
            for id in &source {
                repo.insert(item(*id));
            }

            for (id, seed) in seeds.iter().enumerate() {
                let id = id as u32;
                let key = format!("item:{}", id);
                let value = match seed {
                    Seed::Untouched => continue,
                    Seed::Cached if source.contains(&id) => {
                        serde_json::to_string(&item(id)).expect("encode")
                    }
                    Seed::Cached => continue,
                    Seed::Corrupt => "{\"id\":".to_string(),
                };
                backend.set(&key, value, None).await.expect("seed");
            }

            let token = CancellationToken::new();
            let mapping = PrefixedMapping::<Item>::new();
            let first = cache
                .get_many(&mapping, &repo, &requested, &token)
                .await
                .expect("first lookup");
            let calls_after_first = repo.calls();
            let second = cache
                .get_many(&mapping, &repo, &requested, &token)
                .await
                .expect("second lookup");
            (first, second, repo.calls() - calls_after_first)
        });

        let expected: Vec<u32> = requested
            .iter()
            .copied()
            .filter(|id| source.contains(id))
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();

        prop_assert_eq!(sorted_ids(&first), expected.clone());
        prop_assert_eq!(sorted_ids(&second), expected);
        prop_assert_eq!(calls, 0, "warm cache must not reach the source");
        for found in &first {
            prop_assert_eq!(found, &item(found.id));
        }
    }

    #[test]
    fn prop_groups_are_never_partial(
        groups in prop::collection::btree_map(
            0u64..10,
            prop::collection::btree_set(0u32..20, 0..6),
            0..8,
        ),
        requested in prop::collection::vec(0u64..10, 1..10),
        evicted in prop::collection::btree_set(0u32..20, 0..8),
    ) {
        let rt = runtime();
        let (warm, after_eviction) = rt.block_on(async {
            let backend = InMemoryBackend::new();
            let cache = awaited_service(backend.clone());
            let repo = InMemoryGroupedRepository::new();
            for (outer, members) in &groups {
                repo.insert_group(*outer, members.iter().copied().map(item).collect());
            }

            let mapping = PrefixedGroupMapping::<u64, _>::new(
                "owner",
                "items",
                PrefixedMapping::<Item>::new(),
            );
            let token = CancellationToken::new();

            let warm = cache
                .get_grouped(&mapping, &repo, &requested, &token)
                .await
                .expect("warm-up lookup");

            for id in &evicted {
                backend.delete(&format!("item:{}", id)).await.expect("evict");
            }

            let after_eviction = cache
                .get_grouped(&mapping, &repo, &requested, &token)
                .await
                .expect("lookup after eviction");
            (warm, after_eviction)
        });

        let expected: BTreeMap<u64, Vec<u32>> = requested
            .iter()
            .filter_map(|outer| {
                groups
                    .get(outer)
                    .filter(|members| !members.is_empty())
                    .map(|members| (*outer, members.iter().copied().collect()))
            })
            .collect();

        for result in [warm, after_eviction] {
            let actual: BTreeMap<u64, Vec<u32>> = result
                .iter()
                .map(|(outer, members)| (*outer, sorted_ids(members)))
                .collect();
            prop_assert_eq!(actual, expected.clone());
        }
    }
}
