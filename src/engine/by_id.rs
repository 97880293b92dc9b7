use super::{dedupe, CacheEngine};
use crate::backend::CacheBackend;
use crate::error::Result;
use crate::mapping::EntityCacheMapping;
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::time::Instant;
use tokio_util::sync::CancellationToken;

/// Cache phase outcome of a by-id lookup.
struct Lookup<M: EntityCacheMapping> {
    cached: Vec<M::Entity>,
    missing: Vec<M::Id>,
}

impl<B: CacheBackend> CacheEngine<B> {
    /// Look up entities by id, fetching and caching whatever the cache lacks.
    ///
    /// Ids with a live negative marker are skipped without calling `fetch`.
    /// The rest are read from the cache; ids still missing are passed to
    /// `fetch` in one call. Fetched entities are written back with the
    /// positive TTL, and requested ids that `fetch` did not return get a
    /// negative marker with the negative TTL.
    ///
    /// If the cache phase fails for any reason, including `token` firing,
    /// every requested id is fetched instead.
    ///
    /// The result holds at most one entity per id, in no particular order.
    ///
    /// # Example
    ///
    /// ```ignore
    /// let users = engine
    ///     .get_by_ids_or_fetch_and_cache(&user_mapping, &[1, 2, 5], |missing, token| {
    ///         repo.fetch_by_ids(&missing, &token)
    ///     }, &token)
    ///     .await?;
    /// ```
    ///
    /// # Errors
    ///
    /// Returns whatever `fetch` returns. Cache errors never surface.
    pub async fn get_by_ids_or_fetch_and_cache<M, F, Fut, E>(
        &self,
        mapping: &M,
        ids: &[M::Id],
        fetch: F,
        token: &CancellationToken,
    ) -> std::result::Result<Vec<M::Entity>, E>
    where
        M: EntityCacheMapping,
        F: FnOnce(Vec<M::Id>, CancellationToken) -> Fut,
        Fut: Future<Output = std::result::Result<Vec<M::Entity>, E>>,
    {
        let requested = dedupe(ids);
        if requested.is_empty() {
            return Ok(Vec::new());
        }

        let cache = mapping.cache_name();
        let lookup = match self.lookup_by_ids(mapping, &requested, token).await {
            Ok(lookup) => lookup,
            Err(e) => {
                self.degraded(cache, &e);
                Lookup {
                    cached: Vec::new(),
                    missing: requested,
                }
            }
        };

        if lookup.missing.is_empty() {
            return Ok(lookup.cached);
        }

        self.metrics.record_misses(cache, lookup.missing.len());
        let started = Instant::now();
        let fetched = fetch(lookup.missing.clone(), token.clone()).await?;
        self.metrics
            .record_fallback(cache, lookup.missing.len(), started.elapsed());

        let fetched = self.cache_fetched(mapping, &lookup.missing, fetched).await;

        let mut merged: HashMap<M::Id, M::Entity> = lookup
            .cached
            .into_iter()
            .map(|entity| (mapping.entity_id(&entity), entity))
            .collect();
        merged.extend(fetched);

        Ok(merged.into_values().collect())
    }

    async fn lookup_by_ids<M: EntityCacheMapping>(
        &self,
        mapping: &M,
        requested: &[M::Id],
        token: &CancellationToken,
    ) -> Result<Lookup<M>> {
        let cache = mapping.cache_name();
        let keys: Vec<String> = requested.iter().map(|id| mapping.key_for_id(id)).collect();

        let dead = self.transport.get_null_keys(&keys, token).await?;
        let (alive_ids, alive_keys): (Vec<&M::Id>, Vec<String>) = requested
            .iter()
            .zip(keys)
            .filter(|(_, key)| !dead.contains(key))
            .unzip();

        if !dead.is_empty() {
            debug!("✓ {} {} ids negatively cached", dead.len(), cache);
            self.metrics.record_negative_hits(cache, dead.len());
        }

        let alive: HashSet<&M::Id> = alive_ids.iter().copied().collect();
        let mut cached: HashMap<M::Id, M::Entity> = HashMap::new();
        for entity in self
            .transport
            .get_json_parsed::<M::Entity>(&alive_keys, token)
            .await?
        {
            let id = mapping.entity_id(&entity);
            if alive.contains(&id) {
                cached.insert(id, entity);
            } else {
                debug!("✗ {} entry for id {} under a foreign key, ignoring", cache, id);
            }
        }

        let missing: Vec<M::Id> = alive_ids
            .into_iter()
            .filter(|id| !cached.contains_key(*id))
            .cloned()
            .collect();

        if !cached.is_empty() {
            debug!("✓ Cache HIT: {} {} entities", cached.len(), cache);
            self.metrics.record_hits(cache, cached.len());
        }

        Ok(Lookup {
            cached: cached.into_values().collect(),
            missing,
        })
    }

    /// Write back a fetch result. Returns the fetched entities keyed by id,
    /// without those the fetch returned for ids it was not asked about.
    async fn cache_fetched<M: EntityCacheMapping>(
        &self,
        mapping: &M,
        asked: &[M::Id],
        fetched: Vec<M::Entity>,
    ) -> HashMap<M::Id, M::Entity> {
        let cache = mapping.cache_name();
        let asked_set: HashSet<&M::Id> = asked.iter().collect();

        let mut found: HashMap<M::Id, M::Entity> = HashMap::with_capacity(fetched.len());
        let mut foreign = 0usize;
        for entity in fetched {
            let id = mapping.entity_id(&entity);
            if asked_set.contains(&id) {
                found.insert(id, entity);
            } else {
                foreign += 1;
            }
        }
        if foreign > 0 {
            warn!(
                "⚠ Source returned {} {} entities that were not requested, ignoring them",
                foreign, cache
            );
        }

        let absent: Vec<String> = asked
            .iter()
            .filter(|id| !found.contains_key(*id))
            .map(|id| mapping.key_for_id(id))
            .collect();
        debug!(
            "Caching {} fetched and {} absent {} ids",
            found.len(),
            absent.len(),
            cache
        );
        self.write_null_markers(cache, &absent).await;

        {
            let entries: Vec<(String, &M::Entity)> = found
                .iter()
                .map(|(id, entity)| (mapping.key_for_id(id), entity))
                .collect();
            self.write_entities(cache, &entries).await;
        }

        found
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::InMemoryBackend;
    use crate::config::{CacheConfig, FireAndForget};
    use crate::entity::CacheEntity;
    use crate::error::Error;
    use crate::mapping::PrefixedMapping;
    use serde::{Deserialize, Serialize};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    #[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
    struct User {
        id: u64,
        name: String,
    }

    impl CacheEntity for User {
        type Key = u64;

        fn cache_key(&self) -> u64 {
            self.id
        }

        fn cache_prefix() -> &'static str {
            "user"
        }
    }

    fn user(id: u64) -> User {
        User {
            id,
            name: format!("user-{}", id),
        }
    }

    fn awaited_engine(backend: InMemoryBackend) -> CacheEngine<InMemoryBackend> {
        CacheEngine::new(backend)
            .with_config(CacheConfig::default().with_fire_and_forget(FireAndForget::none()))
    }

    fn sorted_ids(users: &[User]) -> Vec<u64> {
        let mut ids: Vec<u64> = users.iter().map(|u| u.id).collect();
        ids.sort_unstable();
        ids
    }

    #[tokio::test]
    async fn test_empty_request_skips_everything() {
        let engine = awaited_engine(InMemoryBackend::new());
        let calls = AtomicUsize::new(0);

        let users = engine
            .get_by_ids_or_fetch_and_cache(
                &PrefixedMapping::<User>::new(),
                &[],
                |_, _| async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, Error>(Vec::new())
                },
                &CancellationToken::new(),
            )
            .await
            .expect("Lookup failed");

        assert!(users.is_empty());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_duplicate_ids_are_fetched_once() {
        let engine = awaited_engine(InMemoryBackend::new());
        let asked = Mutex::new(Vec::new());

        let users = engine
            .get_by_ids_or_fetch_and_cache(
                &PrefixedMapping::<User>::new(),
                &[4, 4, 2, 4],
                |missing, _| {
                    asked.lock().unwrap().extend(missing.clone());
                    async move { Ok::<_, Error>(missing.into_iter().map(user).collect()) }
                },
                &CancellationToken::new(),
            )
            .await
            .expect("Lookup failed");

        assert_eq!(sorted_ids(&users), vec![2, 4]);
        assert_eq!(*asked.lock().unwrap(), vec![4, 2]);
    }

    #[tokio::test]
    async fn test_foreign_entities_are_dropped_and_not_cached() {
        let backend = InMemoryBackend::new();
        let engine = awaited_engine(backend.clone());

        let users = engine
            .get_by_ids_or_fetch_and_cache(
                &PrefixedMapping::<User>::new(),
                &[1],
                |_, _| async { Ok::<_, Error>(vec![user(1), user(99)]) },
                &CancellationToken::new(),
            )
            .await
            .expect("Lookup failed");

        assert_eq!(sorted_ids(&users), vec![1]);
        assert!(backend.exists("user:1").await.expect("exists"));
        assert!(!backend.exists("user:99").await.expect("exists"));
    }

    #[tokio::test]
    async fn test_source_error_propagates_unmodified() {
        let engine = awaited_engine(InMemoryBackend::new());

        let result = engine
            .get_by_ids_or_fetch_and_cache(
                &PrefixedMapping::<User>::new(),
                &[1],
                |_, _| async { Err::<Vec<User>, _>("db down") },
                &CancellationToken::new(),
            )
            .await;

        assert_eq!(result.unwrap_err(), "db down");
    }

    #[tokio::test]
    async fn test_cancelled_token_fails_open() {
        let engine = awaited_engine(InMemoryBackend::new());
        let token = CancellationToken::new();
        token.cancel();

        let users = engine
            .get_by_ids_or_fetch_and_cache(
                &PrefixedMapping::<User>::new(),
                &[1, 2],
                |missing, fetch_token| async move {
                    assert!(fetch_token.is_cancelled());
                    Ok::<_, Error>(missing.into_iter().map(user).collect())
                },
                &token,
            )
            .await
            .expect("Lookup failed");

        assert_eq!(sorted_ids(&users), vec![1, 2]);
    }
}
