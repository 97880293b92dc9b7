//! Source-of-truth contracts for the fetch-and-cache engines.
//!
//! The engines only need a fetch closure, but most services wrap their
//! database access in a type. [`EntityRepository`] and [`GroupedRepository`]
//! give those types a shape that [`CacheService`](crate::CacheService) can
//! drive directly:
//!
//! ```ignore
//! impl EntityRepository<u64, User> for UserRepository {
//!     async fn fetch_by_ids(&self, ids: &[u64], token: &CancellationToken) -> Result<Vec<User>> {
//!         // SELECT ... WHERE id = ANY($1)
//!     }
//! }
//!
//! let users = cache.get_many(&PrefixedMapping::<User>::new(), &repo, &[1, 2, 5], &token).await?;
//! ```
//!
//! Both contracts report absence by omission: an id that is not in the
//! returned collection does not exist, and the engine caches that fact.
//! Return `Err` only when the source itself failed.
//!
//! [`InMemoryRepository`] and [`InMemoryGroupedRepository`] are test doubles
//! that count calls and record which ids reached the source.

use crate::entity::CacheEntity;
use crate::error::{Error, Result};
use dashmap::DashMap;
use std::collections::HashMap;
use std::hash::Hash;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use tokio_util::sync::CancellationToken;

/// Batch lookup of entities by id.
#[allow(async_fn_in_trait)]
pub trait EntityRepository<K, T>: Send + Sync {
    /// Fetch the entities that exist among `ids`.
    ///
    /// Missing ids are simply left out; the result may be in any order.
    ///
    /// # Errors
    ///
    /// Returns `Err` if the data source is unavailable or the query fails.
    async fn fetch_by_ids(&self, ids: &[K], token: &CancellationToken) -> Result<Vec<T>>;
}

/// Batch lookup of one-to-many groups by outer id.
#[allow(async_fn_in_trait)]
pub trait GroupedRepository<O, T>: Send + Sync {
    /// Fetch the groups that exist among `outer_ids`.
    ///
    /// Outer ids without a group may be left out or mapped to an empty list;
    /// both are cached as absent.
    ///
    /// # Errors
    ///
    /// Returns `Err` if the data source is unavailable or the query fails.
    async fn fetch_grouped(
        &self,
        outer_ids: &[O],
        token: &CancellationToken,
    ) -> Result<HashMap<O, Vec<T>>>;
}

/// Call bookkeeping shared by the in-memory doubles.
struct CallLog<K> {
    calls: AtomicUsize,
    requested: Mutex<Vec<Vec<K>>>,
    failing: AtomicBool,
}

impl<K: Clone> CallLog<K> {
    fn new() -> Self {
        CallLog {
            calls: AtomicUsize::new(0),
            requested: Mutex::new(Vec::new()),
            failing: AtomicBool::new(false),
        }
    }

    fn record(&self, ids: &[K], token: &CancellationToken) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.lock().push(ids.to_vec());

        if token.is_cancelled() {
            return Err(Error::Cancelled);
        }
        if self.failing.load(Ordering::SeqCst) {
            return Err(Error::RepositoryError(
                "in-memory repository set to fail".to_string(),
            ));
        }
        Ok(())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<Vec<K>>> {
        self.requested
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn reset(&self) {
        self.calls.store(0, Ordering::SeqCst);
        self.lock().clear();
    }
}

/// In-memory [`EntityRepository`] for tests.
///
/// # Example
///
/// ```ignore
/// let repo = InMemoryRepository::new();
/// repo.insert(user(1));
///
/// let cache = CacheService::new(InMemoryBackend::new());
/// cache.get_many(&PrefixedMapping::<User>::new(), &repo, &[1, 2], &token).await?;
/// cache.get_many(&PrefixedMapping::<User>::new(), &repo, &[1, 2], &token).await?;
///
/// assert_eq!(repo.calls(), 1);
/// ```
pub struct InMemoryRepository<T: CacheEntity> {
    data: DashMap<T::Key, T>,
    log: CallLog<T::Key>,
}

impl<T: CacheEntity> InMemoryRepository<T> {
    pub fn new() -> Self {
        InMemoryRepository {
            data: DashMap::new(),
            log: CallLog::new(),
        }
    }

    /// Insert or replace an entity under its own key.
    pub fn insert(&self, entity: T) {
        self.data.insert(entity.cache_key(), entity);
    }

    pub fn remove(&self, id: &T::Key) -> Option<T> {
        self.data.remove(id).map(|(_, entity)| entity)
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Number of `fetch_by_ids` calls so far.
    pub fn calls(&self) -> usize {
        self.log.calls.load(Ordering::SeqCst)
    }

    /// The id batches passed to `fetch_by_ids`, oldest first.
    pub fn requested(&self) -> Vec<Vec<T::Key>> {
        self.log.lock().clone()
    }

    /// Make every following fetch fail with `Error::RepositoryError`.
    pub fn set_failing(&self, failing: bool) {
        self.log.failing.store(failing, Ordering::SeqCst);
    }

    /// Forget recorded calls.
    pub fn reset_calls(&self) {
        self.log.reset();
    }
}

impl<T: CacheEntity> Default for InMemoryRepository<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: CacheEntity> EntityRepository<T::Key, T> for InMemoryRepository<T> {
    async fn fetch_by_ids(&self, ids: &[T::Key], token: &CancellationToken) -> Result<Vec<T>> {
        self.log.record(ids, token)?;
        Ok(ids
            .iter()
            .filter_map(|id| self.data.get(id).map(|entry| entry.value().clone()))
            .collect())
    }
}

/// In-memory [`GroupedRepository`] for tests.
pub struct InMemoryGroupedRepository<O, T>
where
    O: Eq + Hash,
{
    groups: DashMap<O, Vec<T>>,
    log: CallLog<O>,
}

impl<O, T> InMemoryGroupedRepository<O, T>
where
    O: Clone + Eq + Hash,
    T: Clone,
{
    pub fn new() -> Self {
        InMemoryGroupedRepository {
            groups: DashMap::new(),
            log: CallLog::new(),
        }
    }

    /// Insert or replace the members of a group.
    pub fn insert_group(&self, outer_id: O, members: Vec<T>) {
        self.groups.insert(outer_id, members);
    }

    pub fn remove_group(&self, outer_id: &O) -> Option<Vec<T>> {
        self.groups.remove(outer_id).map(|(_, members)| members)
    }

    /// Number of `fetch_grouped` calls so far.
    pub fn calls(&self) -> usize {
        self.log.calls.load(Ordering::SeqCst)
    }

    /// The outer id batches passed to `fetch_grouped`, oldest first.
    pub fn requested(&self) -> Vec<Vec<O>> {
        self.log.lock().clone()
    }

    /// Make every following fetch fail with `Error::RepositoryError`.
    pub fn set_failing(&self, failing: bool) {
        self.log.failing.store(failing, Ordering::SeqCst);
    }

    /// Forget recorded calls.
    pub fn reset_calls(&self) {
        self.log.reset();
    }
}

impl<O, T> Default for InMemoryGroupedRepository<O, T>
where
    O: Clone + Eq + Hash,
    T: Clone,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<O, T> GroupedRepository<O, T> for InMemoryGroupedRepository<O, T>
where
    O: Clone + Eq + Hash + Send + Sync,
    T: Clone + Send + Sync,
{
    async fn fetch_grouped(
        &self,
        outer_ids: &[O],
        token: &CancellationToken,
    ) -> Result<HashMap<O, Vec<T>>> {
        self.log.record(outer_ids, token)?;
        Ok(outer_ids
            .iter()
            .filter_map(|id| {
                self.groups
                    .get(id)
                    .map(|entry| (id.clone(), entry.value().clone()))
            })
            .collect())
    }
}
