//! High-level cache service for web applications.
//!
//! Provides a convenient wrapper around [`CacheEngine`] with Arc for easy
//! sharing, plus repository-driven lookups and not-found reporting.

use crate::backend::CacheBackend;
use crate::config::CacheConfig;
use crate::engine::{dedupe, CacheEngine};
use crate::error::{Error, Result};
use crate::mapping::{EntityCacheMapping, GroupMapping, GroupMember};
use crate::observability::CacheMetrics;
use crate::repository::{EntityRepository, GroupedRepository};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// High-level cache service for web applications.
///
/// Wraps [`CacheEngine`] in `Arc` so it can be cloned into every handler or
/// service struct without an external `Arc<Mutex<>>`; the engine only takes
/// `&self`.
///
/// # Example
///
/// ```ignore
/// use cacheaside::{CacheService, backend::InMemoryBackend, mapping::PrefixedMapping};
///
/// pub struct UserService {
///     cache: CacheService<InMemoryBackend>,
///     repo: Arc<UserRepository>,
/// }
///
/// impl UserService {
///     pub async fn get(&self, id: u64, token: &CancellationToken) -> Result<User> {
///         self.cache
///             .get_one(&PrefixedMapping::<User>::new(), &*self.repo, &id, token)
///             .await
///     }
/// }
/// ```
pub struct CacheService<B: CacheBackend> {
    engine: Arc<CacheEngine<B>>,
}

impl<B: CacheBackend> Clone for CacheService<B> {
    fn clone(&self) -> Self {
        CacheService {
            engine: Arc::clone(&self.engine),
        }
    }
}

impl<B: CacheBackend> CacheService<B> {
    /// Create a new cache service with the given backend.
    pub fn new(backend: B) -> Self {
        Self::from_engine(CacheEngine::new(backend))
    }

    /// Create a service with explicit configuration.
    ///
    /// # Errors
    ///
    /// Returns `Error::ConfigError` if the configuration is invalid.
    pub fn with_config(backend: B, config: CacheConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self::from_engine(CacheEngine::new(backend).with_config(config)))
    }

    /// Create a new cache service with custom metrics.
    pub fn with_metrics(backend: B, metrics: Box<dyn CacheMetrics>) -> Self {
        Self::from_engine(CacheEngine::new(backend).with_metrics(metrics))
    }

    /// Wrap an already configured engine.
    pub fn from_engine(engine: CacheEngine<B>) -> Self {
        CacheService {
            engine: Arc::new(engine),
        }
    }

    /// Get a reference to the underlying engine.
    pub fn engine(&self) -> &CacheEngine<B> {
        &self.engine
    }

    /// Fetch-and-cache lookup of the entities among `ids` that exist.
    ///
    /// # Errors
    ///
    /// Returns the repository's error if a fallback fetch fails.
    pub async fn get_many<M, R>(
        &self,
        mapping: &M,
        repository: &R,
        ids: &[M::Id],
        token: &CancellationToken,
    ) -> Result<Vec<M::Entity>>
    where
        M: EntityCacheMapping,
        R: EntityRepository<M::Id, M::Entity>,
    {
        self.engine
            .get_by_ids_or_fetch_and_cache(
                mapping,
                ids,
                |missing, token| async move { repository.fetch_by_ids(&missing, &token).await },
                token,
            )
            .await
    }

    /// Look up a single entity.
    ///
    /// # Errors
    ///
    /// Returns `Error::NotFound` if the entity does not exist and the
    /// repository's error if a fallback fetch fails.
    pub async fn get_one<M, R>(
        &self,
        mapping: &M,
        repository: &R,
        id: &M::Id,
        token: &CancellationToken,
    ) -> Result<M::Entity>
    where
        M: EntityCacheMapping,
        R: EntityRepository<M::Id, M::Entity>,
    {
        self.get_many(mapping, repository, std::slice::from_ref(id), token)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| Error::NotFound(id.to_string()))
    }

    /// Look up entities that must all exist.
    ///
    /// # Errors
    ///
    /// Returns `Error::NotFound` when exactly one id is missing,
    /// `Error::ManyNotFound` when several are, and the repository's error if
    /// a fallback fetch fails.
    pub async fn get_all<M, R>(
        &self,
        mapping: &M,
        repository: &R,
        ids: &[M::Id],
        token: &CancellationToken,
    ) -> Result<Vec<M::Entity>>
    where
        M: EntityCacheMapping,
        R: EntityRepository<M::Id, M::Entity>,
    {
        let entities = self.get_many(mapping, repository, ids, token).await?;

        let found: HashSet<M::Id> = entities.iter().map(|e| mapping.entity_id(e)).collect();
        let mut missing: Vec<String> = dedupe(ids)
            .into_iter()
            .filter(|id| !found.contains(id))
            .map(|id| id.to_string())
            .collect();

        match missing.len() {
            0 => Ok(entities),
            1 => Err(Error::NotFound(missing.remove(0))),
            _ => Err(Error::ManyNotFound(missing)),
        }
    }

    /// Fetch-and-cache lookup of one-to-many groups.
    ///
    /// # Errors
    ///
    /// Returns the repository's error if a fallback fetch fails.
    pub async fn get_grouped<G, R>(
        &self,
        group: &G,
        repository: &R,
        outer_ids: &[G::OuterId],
        token: &CancellationToken,
    ) -> Result<HashMap<G::OuterId, Vec<GroupMember<G>>>>
    where
        G: GroupMapping,
        R: GroupedRepository<G::OuterId, GroupMember<G>>,
    {
        self.engine
            .get_grouped_by_outer_id_or_fetch_and_cache(
                group,
                outer_ids,
                |missing, token| async move { repository.fetch_grouped(&missing, &token).await },
                token,
            )
            .await
    }

    /// See [`CacheEngine::invalidate_ids`].
    ///
    /// # Errors
    ///
    /// Returns `Error::BackendError` if the delete fails.
    pub async fn invalidate_ids<M: EntityCacheMapping>(
        &self,
        mapping: &M,
        ids: &[M::Id],
        token: &CancellationToken,
    ) -> Result<u64> {
        self.engine.invalidate_ids(mapping, ids, token).await
    }

    /// See [`CacheEngine::invalidate_groups`].
    ///
    /// # Errors
    ///
    /// Returns `Error::BackendError` if the delete fails.
    pub async fn invalidate_groups<G: GroupMapping>(
        &self,
        group: &G,
        outer_ids: &[G::OuterId],
        token: &CancellationToken,
    ) -> Result<u64> {
        self.engine.invalidate_groups(group, outer_ids, token).await
    }

    /// Wait for pending background write-backs.
    pub async fn flush(&self) {
        self.engine.flush().await;
    }

    /// Check if the cache backend is reachable.
    ///
    /// # Errors
    ///
    /// Returns `Err` if the backend is not accessible.
    pub async fn health_check(&self) -> Result<bool> {
        self.engine.transport().health_check().await
    }
}
