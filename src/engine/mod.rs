//! Fetch-and-cache engines.
//!
//! [`CacheEngine`] answers batch lookups from the cache and falls back to a
//! caller-supplied fetch for whatever the cache cannot answer, then writes
//! the fetched data (and negative markers for what the source did not have)
//! back into the cache.
//!
//! Two lookup shapes are supported:
//!
//! - [`get_by_ids_or_fetch_and_cache`](CacheEngine::get_by_ids_or_fetch_and_cache):
//!   entities by id.
//! - [`get_grouped_by_outer_id_or_fetch_and_cache`](CacheEngine::get_grouped_by_outer_id_or_fetch_and_cache):
//!   one-to-many groups by outer id, backed by secondary index sets.
//!
//! Both fail open: if the cache phase errors (backend down, token fired) the
//! whole request goes to the fetch and the cache is repopulated from its
//! result.

mod by_id;
mod grouped;

use crate::backend::CacheBackend;
use crate::config::{CacheConfig, FireAndForget};
use crate::error::{Error, Result};
use crate::mapping::{EntityCacheMapping, GroupMapping};
use crate::observability::{CacheMetrics, NoOpMetrics};
use crate::transport::{CacheTransport, WriteMode};
use crate::write_behind::WriteBehind;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::hash::Hash;
use tokio_util::sync::CancellationToken;

/// Cache-aside engine over a backend.
///
/// Stateless apart from its configuration; share it behind an `Arc` (see
/// [`CacheService`](crate::CacheService)).
///
/// # Example
///
/// ```no_run
/// use cacheaside::{CacheEngine, backend::InMemoryBackend};
///
/// let engine = CacheEngine::new(InMemoryBackend::new());
/// ```
pub struct CacheEngine<B: CacheBackend> {
    transport: CacheTransport<B>,
    config: CacheConfig,
    metrics: Box<dyn CacheMetrics>,
}

impl<B: CacheBackend> CacheEngine<B> {
    /// Create an engine with default configuration.
    pub fn new(backend: B) -> Self {
        let config = CacheConfig::default();
        let writes = WriteBehind::new(config.write_behind_capacity);
        CacheEngine {
            transport: CacheTransport::with_write_behind(backend, writes),
            config,
            metrics: Box::new(NoOpMetrics),
        }
    }

    /// Replace the configuration.
    ///
    /// Rebuilds the write-behind pool with the configured capacity; call it
    /// before any lookup so no background writes are left on the old pool.
    pub fn with_config(mut self, config: CacheConfig) -> Self {
        let writes = WriteBehind::new(config.write_behind_capacity);
        self.transport = CacheTransport::with_write_behind(self.transport.backend().clone(), writes);
        self.config = config;
        self
    }

    /// Set custom metrics handler.
    pub fn with_metrics(mut self, metrics: Box<dyn CacheMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn transport(&self) -> &CacheTransport<B> {
        &self.transport
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Wait for every background write-back dispatched so far.
    pub async fn flush(&self) {
        self.transport.flush().await;
    }

    /// Drop cached entries and negative markers for `ids`.
    ///
    /// Call after writing these entities to the source of truth. Returns the
    /// number of keys that existed.
    ///
    /// # Errors
    ///
    /// Returns `Error::BackendError` if the delete fails and
    /// `Error::Cancelled` if the token fires.
    pub async fn invalidate_ids<M: EntityCacheMapping>(
        &self,
        mapping: &M,
        ids: &[M::Id],
        token: &CancellationToken,
    ) -> Result<u64> {
        let keys = with_null_keys(ids.iter().map(|id| mapping.key_for_id(id)));
        let removed = self
            .transport
            .keys_delete(&keys, WriteMode::Await, token)
            .await?;
        debug!(
            "✓ Invalidated {} {} ids ({} keys removed)",
            ids.len(),
            mapping.cache_name(),
            removed
        );
        Ok(removed)
    }

    /// Drop index sets and their negative markers for `outer_ids`.
    ///
    /// Member entries are left alone; invalidate them through
    /// [`invalidate_ids`](Self::invalidate_ids) if they changed too.
    ///
    /// # Errors
    ///
    /// Returns `Error::BackendError` if the delete fails and
    /// `Error::Cancelled` if the token fires.
    pub async fn invalidate_groups<G: GroupMapping>(
        &self,
        group: &G,
        outer_ids: &[G::OuterId],
        token: &CancellationToken,
    ) -> Result<u64> {
        let keys = with_null_keys(outer_ids.iter().map(|id| group.index_key(id)));
        let removed = self
            .transport
            .keys_delete(&keys, WriteMode::Await, token)
            .await?;
        debug!(
            "✓ Invalidated {} {} groups ({} keys removed)",
            outer_ids.len(),
            group.cache_name(),
            removed
        );
        Ok(removed)
    }

    fn degraded(&self, cache: &str, error: &Error) {
        match error {
            Error::Cancelled => debug!("✗ {} lookup cancelled, fetching from source", cache),
            _ => warn!("⚠ {} cache unavailable, fetching from source: {}", cache, error),
        }
        self.metrics.record_degraded(cache, &error.to_string());
    }

    async fn write_entities<T: Serialize>(&self, cache: &str, entries: &[(String, T)]) {
        let mode = FireAndForget::mode(self.config.fire_and_forget.entities);
        let result = self
            .transport
            .string_set(entries, Some(self.config.positive_ttl), mode, &CancellationToken::new())
            .await;
        self.write_finished(cache, "StringSet", result);
    }

    async fn write_null_markers(&self, cache: &str, keys: &[String]) {
        let mode = FireAndForget::mode(self.config.fire_and_forget.null_markers);
        let result = self
            .transport
            .mark_as_null(keys, Some(self.config.negative_ttl), mode, &CancellationToken::new())
            .await;
        self.write_finished(cache, "MarkAsNull", result);
    }

    async fn write_index_sets(&self, cache: &str, sets: &HashMap<String, Vec<String>>) {
        let mode = FireAndForget::mode(self.config.fire_and_forget.index_sets);
        let result = self
            .transport
            .sets_replace(sets, Some(self.config.positive_ttl), mode, &CancellationToken::new())
            .await
            .map(|_| ());
        self.write_finished(cache, "SetsReplace", result);
    }

    async fn drop_index_sets(&self, cache: &str, keys: &[String]) {
        let mode = FireAndForget::mode(self.config.fire_and_forget.index_sets);
        let result = self
            .transport
            .keys_delete(keys, mode, &CancellationToken::new())
            .await
            .map(|_| ());
        self.write_finished(cache, "KeysDelete", result);
    }

    fn write_finished(&self, cache: &str, operation: &str, result: Result<()>) {
        if let Err(e) = result {
            warn!("✗ {} write-back for {} failed: {}", operation, cache, e);
            self.metrics.record_write_failure(operation, &e.to_string());
        }
    }
}

/// Remove duplicates, keeping first-seen order.
pub(crate) fn dedupe<T: Clone + Eq + Hash>(ids: &[T]) -> Vec<T> {
    let mut seen = HashSet::with_capacity(ids.len());
    ids.iter().filter(|id| seen.insert(*id)).cloned().collect()
}

fn with_null_keys(keys: impl Iterator<Item = String>) -> Vec<String> {
    keys.flat_map(|key| {
        let marker = crate::key::CacheKeyBuilder::null_key(&key);
        [key, marker]
    })
    .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::InMemoryBackend;
    use crate::entity::CacheEntity;
    use crate::mapping::{PrefixedGroupMapping, PrefixedMapping};
    use serde::Deserialize;
    use std::time::Duration;

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

    #[test]
    fn test_dedupe_keeps_first_seen_order() {
        assert_eq!(dedupe(&[3, 1, 3, 2, 1]), vec![3, 1, 2]);
        assert!(dedupe::<u32>(&[]).is_empty());
    }

    #[test]
    fn test_with_config_resizes_write_behind() {
        let engine = CacheEngine::new(InMemoryBackend::new()).with_config(
            CacheConfig::default()
                .with_negative_ttl(Duration::from_secs(10))
                .with_write_behind_capacity(8),
        );

        assert_eq!(engine.config().negative_ttl, Duration::from_secs(10));
        assert_eq!(engine.transport().write_behind().in_flight(), 0);
    }

    #[tokio::test]
    async fn test_invalidate_ids_removes_entries_and_markers() {
        let backend = InMemoryBackend::new();
        let engine = CacheEngine::new(backend.clone());
        let roles = PrefixedMapping::<Role>::new();
        let token = CancellationToken::new();

        backend
            .set("role:1", r#"{"id":1,"name":"admin"}"#.to_string(), None)
            .await
            .expect("Failed to set");
        backend
            .set("role:2:null", "1".to_string(), None)
            .await
            .expect("Failed to set");

        let removed = engine
            .invalidate_ids(&roles, &[1, 2, 3], &token)
            .await
            .expect("Failed to invalidate");

        assert_eq!(removed, 2);
        assert!(backend.is_empty().await);
    }

    #[tokio::test]
    async fn test_invalidate_groups_removes_index_sets() {
        let backend = InMemoryBackend::new();
        let engine = CacheEngine::new(backend.clone());
        let user_roles =
            PrefixedGroupMapping::<u64, _>::new("user", "roles", PrefixedMapping::<Role>::new());
        let token = CancellationToken::new();

        backend
            .sadd("user:7:roles", &["1".to_string()])
            .await
            .expect("Failed to sadd");
        backend
            .set("role:1", r#"{"id":1,"name":"admin"}"#.to_string(), None)
            .await
            .expect("Failed to set");

        let removed = engine
            .invalidate_groups(&user_roles, &[7], &token)
            .await
            .expect("Failed to invalidate");

        assert_eq!(removed, 1);
        assert!(backend.exists("role:1").await.expect("exists"));
    }
}
