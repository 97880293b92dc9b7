use super::{dedupe, CacheEngine};
use crate::backend::CacheBackend;
use crate::error::Result;
use crate::mapping::{EntityCacheMapping, GroupMapping, GroupMember, GroupMemberId};
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::time::Instant;
use tokio_util::sync::CancellationToken;

/// Cache phase outcome of a grouped lookup.
struct GroupLookup<G: GroupMapping> {
    cached: HashMap<G::OuterId, Vec<GroupMember<G>>>,
    missing: Vec<G::OuterId>,
}

impl<B: CacheBackend> CacheEngine<B> {
    /// Look up one-to-many groups by outer id, fetching and caching whatever
    /// the cache cannot confirm.
    ///
    /// An outer id is served from the cache only when its index set exists
    /// and every member it lists still has a live entry. A single missing
    /// member makes the whole group stale and it is refetched; groups are
    /// never returned partially. Outer ids with a negative marker on either
    /// the outer key or the index key are skipped.
    ///
    /// After `fetch`, each returned group has its members written with the
    /// positive TTL and its index set rebuilt. Requested outer ids that came
    /// back absent or empty get a negative marker on their index key, lose
    /// their index set, and are left out of the result.
    ///
    /// If the cache phase fails for any reason, including `token` firing,
    /// every requested outer id is fetched instead.
    ///
    /// # Errors
    ///
    /// Returns whatever `fetch` returns. Cache errors never surface.
    pub async fn get_grouped_by_outer_id_or_fetch_and_cache<G, F, Fut, E>(
        &self,
        group: &G,
        outer_ids: &[G::OuterId],
        fetch: F,
        token: &CancellationToken,
    ) -> std::result::Result<HashMap<G::OuterId, Vec<GroupMember<G>>>, E>
    where
        G: GroupMapping,
        F: FnOnce(Vec<G::OuterId>, CancellationToken) -> Fut,
        Fut: Future<Output = std::result::Result<HashMap<G::OuterId, Vec<GroupMember<G>>>, E>>,
    {
        let requested = dedupe(outer_ids);
        if requested.is_empty() {
            return Ok(HashMap::new());
        }

        let cache = group.cache_name();
        let lookup = match self.lookup_grouped(group, &requested, token).await {
            Ok(lookup) => lookup,
            Err(e) => {
                self.degraded(cache, &e);
                GroupLookup {
                    cached: HashMap::new(),
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

        let fetched = self.cache_fetched_groups(group, &lookup.missing, fetched).await;

        let mut merged = lookup.cached;
        merged.extend(fetched);
        Ok(merged)
    }

    async fn lookup_grouped<G: GroupMapping>(
        &self,
        group: &G,
        requested: &[G::OuterId],
        token: &CancellationToken,
    ) -> Result<GroupLookup<G>> {
        let cache = group.cache_name();
        let members = group.members();

        let outer_keys: Vec<String> = requested.iter().map(|id| group.outer_key(id)).collect();
        let index_keys: Vec<String> = requested.iter().map(|id| group.index_key(id)).collect();

        let probe: Vec<String> = outer_keys.iter().chain(&index_keys).cloned().collect();
        let dead = self.transport.get_null_keys(&probe, token).await?;

        let alive: Vec<(&G::OuterId, String)> = requested
            .iter()
            .zip(outer_keys.iter().zip(index_keys))
            .filter(|(_, (outer_key, index_key))| {
                !dead.contains(*outer_key) && !dead.contains(index_key)
            })
            .map(|(id, (_, index_key))| (id, index_key))
            .collect();

        let negative = requested.len() - alive.len();
        if negative > 0 {
            debug!("✓ {} {} groups negatively cached", negative, cache);
            self.metrics.record_negative_hits(cache, negative);
        }

        let alive_index_keys: Vec<String> = alive.iter().map(|(_, key)| key.clone()).collect();
        let memberships = self.transport.sets_members(&alive_index_keys, token).await?;

        let mut missing: Vec<G::OuterId> = Vec::new();
        let mut claims: Vec<(&G::OuterId, Vec<GroupMemberId<G>>)> = Vec::new();
        let mut stale = 0usize;

        for (outer_id, index_key) in &alive {
            let tokens = memberships.get(index_key).map(Vec::as_slice).unwrap_or(&[]);
            if tokens.is_empty() {
                missing.push((*outer_id).clone());
                continue;
            }

            let parsed: Option<Vec<GroupMemberId<G>>> = tokens
                .iter()
                .map(|token| members.id_from_index_value(token))
                .collect();
            match parsed {
                Some(ids) => claims.push((*outer_id, ids)),
                None => {
                    debug!("✗ Index {} holds an unreadable member, refetching", index_key);
                    stale += 1;
                    missing.push((*outer_id).clone());
                }
            }
        }

        let member_keys: Vec<String> = claims
            .iter()
            .flat_map(|(_, ids)| ids.iter().map(|id| members.key_for_id(id)))
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();

        let resolved: HashMap<GroupMemberId<G>, GroupMember<G>> = self
            .transport
            .get_json_parsed_with_keys::<GroupMember<G>>(&member_keys, token)
            .await?
            .into_iter()
            .map(|(key, entity)| {
                let id = members
                    .id_from_key(&key)
                    .unwrap_or_else(|| members.entity_id(&entity));
                (id, entity)
            })
            .collect();

        let mut cached = HashMap::with_capacity(claims.len());
        for (outer_id, ids) in claims {
            let group_members: Option<Vec<GroupMember<G>>> =
                ids.iter().map(|id| resolved.get(id).cloned()).collect();
            match group_members {
                Some(entities) => {
                    cached.insert(outer_id.clone(), entities);
                }
                None => {
                    debug!("✗ {} group {} has evicted members, refetching", cache, outer_id);
                    stale += 1;
                    missing.push(outer_id.clone());
                }
            }
        }

        if stale > 0 {
            self.metrics.record_stale_group(cache, stale);
        }
        if !cached.is_empty() {
            debug!("✓ Cache HIT: {} {} groups", cached.len(), cache);
            self.metrics.record_hits(cache, cached.len());
        }

        Ok(GroupLookup { cached, missing })
    }

    /// Write back a grouped fetch result. Returns the non-empty groups for
    /// outer ids that were asked about.
    async fn cache_fetched_groups<G: GroupMapping>(
        &self,
        group: &G,
        asked: &[G::OuterId],
        fetched: HashMap<G::OuterId, Vec<GroupMember<G>>>,
    ) -> HashMap<G::OuterId, Vec<GroupMember<G>>> {
        let cache = group.cache_name();
        let members = group.members();
        let asked_set: HashSet<&G::OuterId> = asked.iter().collect();

        let mut found = HashMap::with_capacity(fetched.len());
        let mut foreign = 0usize;
        for (outer_id, entities) in fetched {
            if !asked_set.contains(&outer_id) {
                foreign += 1;
            } else if !entities.is_empty() {
                found.insert(outer_id, entities);
            }
        }
        if foreign > 0 {
            warn!(
                "⚠ Source returned {} {} groups that were not requested, ignoring them",
                foreign, cache
            );
        }

        let absent: Vec<String> = asked
            .iter()
            .filter(|id| !found.contains_key(*id))
            .map(|id| group.index_key(id))
            .collect();

        debug!(
            "Caching {} fetched and {} absent {} groups",
            found.len(),
            absent.len(),
            cache
        );
        // An absent group's old index must not outlive its marker.
        self.write_null_markers(cache, &absent).await;
        self.drop_index_sets(cache, &absent).await;

        {
            let mut entries: Vec<(String, &GroupMember<G>)> = Vec::new();
            let mut sets: HashMap<String, Vec<String>> = HashMap::with_capacity(found.len());
            for (outer_id, entities) in &found {
                let mut tokens = Vec::with_capacity(entities.len());
                for entity in entities {
                    let id = members.entity_id(entity);
                    entries.push((members.key_for_id(&id), entity));
                    tokens.push(members.index_value(entity));
                }
                sets.insert(group.index_key(outer_id), tokens);
            }

            self.write_entities(cache, &entries).await;
            self.write_index_sets(cache, &sets).await;
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
    use crate::mapping::{PrefixedGroupMapping, PrefixedMapping};
    use serde::{Deserialize, Serialize};

    #[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
    struct Role {
        id: u32,
        name: String,
    }

    impl CacheEntity for Role {
        type Key = u32;

        fn cache_key(&self) -> u32 {
            self.id
        }

        fn cache_prefix() -> &'static str {
            "role"
        }
    }

    type UserRoles = PrefixedGroupMapping<u64, PrefixedMapping<Role>>;

    fn user_roles() -> UserRoles {
        PrefixedGroupMapping::new("user", "roles", PrefixedMapping::new())
    }

    fn role(id: u32) -> Role {
        Role {
            id,
            name: format!("role-{}", id),
        }
    }

    fn awaited_engine(backend: InMemoryBackend) -> CacheEngine<InMemoryBackend> {
        CacheEngine::new(backend)
            .with_config(CacheConfig::default().with_fire_and_forget(FireAndForget::none()))
    }

    #[tokio::test]
    async fn test_empty_group_is_negatively_cached() {
        let backend = InMemoryBackend::new();
        let engine = awaited_engine(backend.clone());
        let token = CancellationToken::new();

        let groups = engine
            .get_grouped_by_outer_id_or_fetch_and_cache(
                &user_roles(),
                &[3],
                |_, _| async {
                    let mut groups = HashMap::new();
                    groups.insert(3u64, Vec::<Role>::new());
                    Ok::<_, Error>(groups)
                },
                &token,
            )
            .await
            .expect("Lookup failed");

        assert!(groups.is_empty());
        assert!(backend.exists("user:3:roles:null").await.expect("exists"));
        assert!(!backend.exists("user:3:roles").await.expect("exists"));
    }

    #[tokio::test]
    async fn test_unreadable_member_token_marks_group_stale() {
        let backend = InMemoryBackend::new();
        let engine = awaited_engine(backend.clone());
        let token = CancellationToken::new();

        backend
            .sadd("user:4:roles", &["1".to_string(), "not-a-number".to_string()])
            .await
            .expect("Failed to sadd");
        backend
            .set("role:1", r#"{"id":1,"name":"role-1"}"#.to_string(), None)
            .await
            .expect("Failed to set");

        let groups = engine
            .get_grouped_by_outer_id_or_fetch_and_cache(
                &user_roles(),
                &[4],
                |missing, _| async move {
                    assert_eq!(missing, vec![4]);
                    let mut groups = HashMap::new();
                    groups.insert(4u64, vec![role(1)]);
                    Ok::<_, Error>(groups)
                },
                &token,
            )
            .await
            .expect("Lookup failed");

        assert_eq!(groups[&4u64], vec![role(1)]);

        // Refetch rewrites the index instead of appending to it.
        let index = backend
            .smembers("user:4:roles")
            .await
            .expect("Failed to read index");
        assert_eq!(index, vec!["1".to_string()]);
    }

    #[tokio::test]
    async fn test_outer_marker_skips_group() {
        let backend = InMemoryBackend::new();
        let engine = awaited_engine(backend.clone());
        let token = CancellationToken::new();

        backend
            .set("user:5:null", "1".to_string(), None)
            .await
            .expect("Failed to set");

        let groups = engine
            .get_grouped_by_outer_id_or_fetch_and_cache(
                &user_roles(),
                &[5],
                |_, _| async { Err::<HashMap<u64, Vec<Role>>, _>("must not be called") },
                &token,
            )
            .await
            .expect("Lookup failed");

        assert!(groups.is_empty());
    }
}
