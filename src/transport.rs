//! Key/value cache transport.
//!
//! Batch string, set and negative-marker operations over a [`CacheBackend`].
//! Reads race the caller's [`CancellationToken`]; writes can either be
//! awaited or handed to the [`WriteBehind`] pool, in which case they ignore
//! the token and report failures only through the log.

use crate::backend::CacheBackend;
use crate::error::{Error, Result};
use crate::key::{CacheKeyBuilder, NULL_SENTINEL};
use crate::serialization::{decode_value, encode_value};
use crate::write_behind::WriteBehind;
use futures::future::try_join_all;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// How a write is issued.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WriteMode {
    /// Wait for the write and return its error, honouring the token.
    Await,
    /// Dispatch in the background and return immediately. Errors are logged.
    FireAndForget,
}

/// Race `operation` against `token`.
pub(crate) async fn cancellable<T, F>(token: &CancellationToken, operation: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    if token.is_cancelled() {
        return Err(Error::Cancelled);
    }

    tokio::select! {
        biased;
        _ = token.cancelled() => Err(Error::Cancelled),
        result = operation => result,
    }
}

/// Transport over a cache backend.
///
/// # Example
///
/// ```no_run
/// use cacheaside::backend::InMemoryBackend;
/// use cacheaside::transport::{CacheTransport, WriteMode};
/// use tokio_util::sync::CancellationToken;
/// use std::time::Duration;
///
/// # async fn example() -> cacheaside::Result<()> {
/// let transport = CacheTransport::new(InMemoryBackend::new());
/// let token = CancellationToken::new();
///
/// transport
///     .mark_as_null(&["user:9".to_string()], Some(Duration::from_secs(60)), WriteMode::Await, &token)
///     .await?;
///
/// let dead = transport.get_null_keys(&["user:9".to_string()], &token).await?;
/// assert!(dead.contains("user:9"));
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct CacheTransport<B: CacheBackend> {
    backend: B,
    writes: WriteBehind,
}

impl<B: CacheBackend> CacheTransport<B> {
    /// Create a transport with the default write-behind bound.
    pub fn new(backend: B) -> Self {
        Self::with_write_behind(
            backend,
            WriteBehind::new(crate::config::DEFAULT_WRITE_BEHIND_CAPACITY),
        )
    }

    /// Create a transport sharing an existing write-behind pool.
    pub fn with_write_behind(backend: B, writes: WriteBehind) -> Self {
        CacheTransport { backend, writes }
    }

    /// Add members to each named set, (re)applying `ttl` to every touched set.
    ///
    /// Sets with no members are skipped. Returns the number of newly added
    /// members, or `0` for fire-and-forget.
    ///
    /// # Errors
    ///
    /// Returns `Error::BackendError` if an add fails or a TTL could not be
    /// applied, and `Error::Cancelled` if the token fires (awaited mode only).
    pub async fn sets_add(
        &self,
        sets: &HashMap<String, Vec<String>>,
        ttl: Option<Duration>,
        mode: WriteMode,
        token: &CancellationToken,
    ) -> Result<u64> {
        self.write_sets("SetsAdd", sets, ttl, mode, token, false)
            .await
    }

    /// Like [`sets_add`](Self::sets_add), but each touched set is deleted
    /// first so it ends up holding exactly the given members.
    ///
    /// The delete and the adds run as one write, so in fire-and-forget mode
    /// they cannot be reordered.
    ///
    /// # Errors
    ///
    /// Same as [`sets_add`](Self::sets_add).
    pub async fn sets_replace(
        &self,
        sets: &HashMap<String, Vec<String>>,
        ttl: Option<Duration>,
        mode: WriteMode,
        token: &CancellationToken,
    ) -> Result<u64> {
        self.write_sets("SetsReplace", sets, ttl, mode, token, true)
            .await
    }

    /// Read the full membership of each requested set.
    ///
    /// Every requested key is present in the result; missing sets map to an
    /// empty list.
    ///
    /// # Errors
    ///
    /// Returns `Error::BackendError` on transport failure and
    /// `Error::Cancelled` if the token fires.
    pub async fn sets_members(
        &self,
        keys: &[String],
        token: &CancellationToken,
    ) -> Result<HashMap<String, Vec<String>>> {
        if keys.is_empty() {
            return Ok(HashMap::new());
        }

        let reads = try_join_all(keys.iter().map(|key| self.backend.smembers(key)));
        let memberships = cancellable(token, reads).await?;

        Ok(keys.iter().cloned().zip(memberships).collect())
    }

    /// Store values under their keys. Strings pass through, everything else
    /// is JSON-encoded.
    ///
    /// # Errors
    ///
    /// Returns `Error::SerializationError` if a value cannot be encoded and
    /// `Error::BackendError` / `Error::Cancelled` for an awaited write.
    pub async fn string_set<T: Serialize>(
        &self,
        entries: &[(String, T)],
        ttl: Option<Duration>,
        mode: WriteMode,
        token: &CancellationToken,
    ) -> Result<()> {
        if entries.is_empty() {
            return Ok(());
        }

        let encoded = match encode_entries(entries) {
            Ok(encoded) => encoded,
            Err(e) if mode == WriteMode::FireAndForget => {
                warn!("✗ StringSet skipped, value could not be encoded: {}", e);
                return Ok(());
            }
            Err(e) => return Err(e),
        };

        self.write_strings("StringSet", encoded, ttl, mode, token)
            .await
    }

    /// Batch read and decode values.
    ///
    /// Keys that are absent, blank, hold JSON `null`, or fail to decode are
    /// silently dropped from the result.
    ///
    /// # Errors
    ///
    /// Returns `Error::BackendError` on transport failure and
    /// `Error::Cancelled` if the token fires.
    pub async fn get_json_parsed<T: DeserializeOwned>(
        &self,
        keys: &[String],
        token: &CancellationToken,
    ) -> Result<Vec<T>> {
        Ok(self
            .get_json_parsed_with_keys(keys, token)
            .await?
            .into_iter()
            .map(|(_, value)| value)
            .collect())
    }

    /// Same as [`get_json_parsed`](Self::get_json_parsed), keeping the key
    /// each value was read from.
    ///
    /// # Errors
    ///
    /// Returns `Error::BackendError` on transport failure and
    /// `Error::Cancelled` if the token fires.
    pub async fn get_json_parsed_with_keys<T: DeserializeOwned>(
        &self,
        keys: &[String],
        token: &CancellationToken,
    ) -> Result<Vec<(String, T)>> {
        let raw = self.string_get(keys, token).await?;

        let parsed = raw
            .into_iter()
            .filter_map(|(key, value)| match decode_value::<T>(&value) {
                Ok(Some(decoded)) => Some((key, decoded)),
                Ok(None) => {
                    debug!("✗ Cache entry {} is empty, treating as miss", key);
                    None
                }
                Err(e) => {
                    debug!("✗ Cache entry {} is corrupt, treating as miss: {}", key, e);
                    None
                }
            })
            .collect();

        Ok(parsed)
    }

    /// Raw batch read. Absent keys are dropped from the result.
    ///
    /// # Errors
    ///
    /// Returns `Error::BackendError` on transport failure and
    /// `Error::Cancelled` if the token fires.
    pub async fn string_get(
        &self,
        keys: &[String],
        token: &CancellationToken,
    ) -> Result<Vec<(String, String)>> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }

        let values = cancellable(token, self.backend.mget(keys)).await?;

        Ok(keys
            .iter()
            .zip(values)
            .filter_map(|(key, value)| value.map(|v| (key.clone(), v)))
            .collect())
    }

    /// Delete keys. Returns how many existed, or `0` for fire-and-forget.
    ///
    /// # Errors
    ///
    /// Returns `Error::BackendError` / `Error::Cancelled` for an awaited delete.
    pub async fn keys_delete(
        &self,
        keys: &[String],
        mode: WriteMode,
        token: &CancellationToken,
    ) -> Result<u64> {
        if keys.is_empty() {
            return Ok(0);
        }

        match mode {
            WriteMode::FireAndForget => {
                let backend = self.backend.clone();
                let keys = keys.to_vec();
                self.writes.dispatch("KeysDelete", async move {
                    backend.mdelete(&keys).await.map(|_| ())
                });
                Ok(0)
            }
            WriteMode::Await => cancellable(token, self.backend.mdelete(keys)).await,
        }
    }

    /// Write a negative marker for each base key.
    ///
    /// # Errors
    ///
    /// Returns `Error::BackendError` / `Error::Cancelled` for an awaited write.
    pub async fn mark_as_null(
        &self,
        keys: &[String],
        ttl: Option<Duration>,
        mode: WriteMode,
        token: &CancellationToken,
    ) -> Result<()> {
        if keys.is_empty() {
            return Ok(());
        }

        let markers = keys
            .iter()
            .map(|key| (CacheKeyBuilder::null_key(key), NULL_SENTINEL.to_string()))
            .collect();

        self.write_strings("MarkAsNull", markers, ttl, mode, token)
            .await
    }

    /// Return which of the given base keys currently have a live negative marker.
    ///
    /// # Errors
    ///
    /// Returns `Error::BackendError` on transport failure and
    /// `Error::Cancelled` if the token fires.
    pub async fn get_null_keys(
        &self,
        keys: &[String],
        token: &CancellationToken,
    ) -> Result<HashSet<String>> {
        let null_keys: Vec<String> = keys.iter().map(|k| CacheKeyBuilder::null_key(k)).collect();
        let present = self.string_get(&null_keys, token).await?;

        Ok(present
            .into_iter()
            .filter_map(|(null_key, _)| {
                CacheKeyBuilder::base_of_null_key(&null_key).map(str::to_string)
            })
            .collect())
    }

    /// Verify the backend is reachable.
    ///
    /// # Errors
    ///
    /// Returns `Err` if the backend is not accessible.
    pub async fn health_check(&self) -> Result<bool> {
        self.backend.health_check().await
    }

    /// Wait for every background write dispatched so far.
    pub async fn flush(&self) {
        self.writes.flush().await;
    }

    /// Background write pool used by fire-and-forget operations.
    pub fn write_behind(&self) -> &WriteBehind {
        &self.writes
    }

    /// Get backend reference (for advanced use).
    pub fn backend(&self) -> &B {
        &self.backend
    }

    async fn write_sets(
        &self,
        operation: &'static str,
        sets: &HashMap<String, Vec<String>>,
        ttl: Option<Duration>,
        mode: WriteMode,
        token: &CancellationToken,
        replace: bool,
    ) -> Result<u64> {
        let touched: Vec<(String, Vec<String>)> = sets
            .iter()
            .filter(|(_, members)| !members.is_empty())
            .map(|(key, members)| (key.clone(), members.clone()))
            .collect();

        if touched.is_empty() {
            return Ok(0);
        }

        match mode {
            WriteMode::FireAndForget => {
                let backend = self.backend.clone();
                self.writes.dispatch(operation, async move {
                    apply_sets(&backend, &touched, ttl, replace).await.map(|_| ())
                });
                Ok(0)
            }
            WriteMode::Await => {
                cancellable(token, apply_sets(&self.backend, &touched, ttl, replace)).await
            }
        }
    }

    async fn write_strings(
        &self,
        operation: &'static str,
        entries: Vec<(String, String)>,
        ttl: Option<Duration>,
        mode: WriteMode,
        token: &CancellationToken,
    ) -> Result<()> {
        match mode {
            WriteMode::FireAndForget => {
                let backend = self.backend.clone();
                self.writes
                    .dispatch(operation, async move { backend.mset(&entries, ttl).await });
                Ok(())
            }
            WriteMode::Await => cancellable(token, self.backend.mset(&entries, ttl)).await,
        }
    }
}

fn encode_entries<T: Serialize>(entries: &[(String, T)]) -> Result<Vec<(String, String)>> {
    entries
        .iter()
        .map(|(key, value)| Ok((key.clone(), encode_value(value)?)))
        .collect()
}

async fn apply_sets<B: CacheBackend>(
    backend: &B,
    sets: &[(String, Vec<String>)],
    ttl: Option<Duration>,
    replace: bool,
) -> Result<u64> {
    if replace {
        let keys: Vec<String> = sets.iter().map(|(key, _)| key.clone()).collect();
        backend.mdelete(&keys).await?;
    }

    let added: u64 = try_join_all(sets.iter().map(|(key, members)| backend.sadd(key, members)))
        .await?
        .into_iter()
        .sum();

    if let Some(ttl) = ttl {
        let applied = try_join_all(sets.iter().map(|(key, _)| backend.expire(key, ttl))).await?;
        if let Some((key, _)) = sets
            .iter()
            .map(|(key, _)| key)
            .zip(applied)
            .find(|(_, applied)| !applied)
        {
            return Err(Error::BackendError(format!(
                "failed to apply TTL to set {}",
                key
            )));
        }
    }

    debug!("✓ Wrote {} sets (+{} members)", sets.len(), added);
    Ok(added)
}
