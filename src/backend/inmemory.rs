//! In-memory cache backend (default, thread-safe, async).
//!
//! Uses DashMap for lock-free concurrent access with per-key sharding.
//! Holds both plain strings and string sets, mirroring the subset of the
//! Redis data model the transport relies on. TTL expiration is applied
//! lazily on access.

use super::CacheBackend;
use crate::error::{Error, Result};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use std::time::Instant;

/// Value held under a key.
#[derive(Clone, Debug)]
enum StoredValue {
    Str(String),
    Set(HashSet<String>),
}

/// In-memory cache entry with optional expiration.
struct CacheEntry {
    value: StoredValue,
    expires_at: Option<Instant>,
}

impl CacheEntry {
    fn new(value: StoredValue, ttl: Option<Duration>) -> Self {
        let expires_at = ttl.map(|d| Instant::now() + d);
        CacheEntry { value, expires_at }
    }

    fn is_expired(&self) -> bool {
        self.expires_at.is_some_and(|exp| Instant::now() > exp)
    }

    fn size(&self) -> usize {
        match &self.value {
            StoredValue::Str(s) => s.len(),
            StoredValue::Set(members) => members.iter().map(|m| m.len()).sum(),
        }
    }
}

fn wrong_type(key: &str) -> Error {
    Error::BackendError(format!(
        "WRONGTYPE Operation against a key holding the wrong kind of value: {}",
        key
    ))
}

/// Thread-safe async in-memory cache backend.
///
/// # Example
///
/// ```no_run
/// use cacheaside::backend::{CacheBackend, InMemoryBackend};
/// use std::time::Duration;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let backend = InMemoryBackend::new();
///
///     backend.set("user:1", r#"{"id":1}"#.to_string(), Some(Duration::from_secs(300))).await?;
///     backend.sadd("user:1:badge", &["10".to_string(), "11".to_string()]).await?;
///
///     assert!(backend.get("user:1").await?.is_some());
///     assert_eq!(backend.smembers("user:1:badge").await?.len(), 2);
///     Ok(())
/// }
/// ```
#[derive(Clone)]
pub struct InMemoryBackend {
    store: Arc<DashMap<String, CacheEntry>>,
}

impl InMemoryBackend {
    /// Create a new in-memory cache backend.
    pub fn new() -> Self {
        InMemoryBackend {
            store: Arc::new(DashMap::new()),
        }
    }

    /// Get the current number of entries in cache (expired ones included until touched).
    pub async fn len(&self) -> usize {
        self.store.len()
    }

    /// Check if cache is empty.
    pub async fn is_empty(&self) -> bool {
        self.store.is_empty()
    }

    /// Get memory statistics.
    pub async fn stats(&self) -> CacheStats {
        let total_bytes: usize = self.store.iter().map(|entry| entry.size()).sum();
        let expired_count = self.store.iter().filter(|entry| entry.is_expired()).count();
        let set_count = self
            .store
            .iter()
            .filter(|entry| matches!(entry.value, StoredValue::Set(_)))
            .count();

        CacheStats {
            total_entries: self.store.len(),
            expired_entries: expired_count,
            set_entries: set_count,
            total_bytes,
        }
    }

    /// Remaining lifetime of a key, `None` if absent or without TTL.
    pub fn ttl(&self, key: &str) -> Option<Duration> {
        self.store
            .get(key)
            .filter(|entry| !entry.is_expired())
            .and_then(|entry| entry.expires_at)
            .map(|exp| exp.saturating_duration_since(Instant::now()))
    }

    fn read_str(&self, key: &str) -> Result<Option<String>> {
        if let Some(entry) = self.store.get(key) {
            if !entry.is_expired() {
                return match &entry.value {
                    StoredValue::Str(s) => Ok(Some(s.clone())),
                    StoredValue::Set(_) => Err(wrong_type(key)),
                };
            }
        }

        // Lazily evict expired entry if one exists
        self.store.remove_if(key, |_, entry| entry.is_expired());
        Ok(None)
    }
}

impl Default for InMemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl CacheBackend for InMemoryBackend {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let value = self.read_str(key)?;
        if value.is_some() {
            debug!("✓ InMemory GET {} -> HIT", key);
        } else {
            debug!("✓ InMemory GET {} -> MISS", key);
        }
        Ok(value)
    }

    async fn set(&self, key: &str, value: String, ttl: Option<Duration>) -> Result<()> {
        self.store.insert(
            key.to_string(),
            CacheEntry::new(StoredValue::Str(value), ttl),
        );

        if let Some(d) = ttl {
            debug!("✓ InMemory SET {} (TTL: {:?})", key, d);
        } else {
            debug!("✓ InMemory SET {}", key);
        }

        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let existed = self
            .store
            .remove(key)
            .is_some_and(|(_, entry)| !entry.is_expired());
        debug!("✓ InMemory DELETE {}", key);
        Ok(existed)
    }

    async fn sadd(&self, key: &str, members: &[String]) -> Result<u64> {
        let mut entry = match self.store.entry(key.to_string()) {
            Entry::Occupied(mut occupied) => {
                if occupied.get().is_expired() {
                    occupied.insert(CacheEntry::new(StoredValue::Set(HashSet::new()), None));
                }
                occupied.into_ref()
            }
            Entry::Vacant(vacant) => {
                vacant.insert(CacheEntry::new(StoredValue::Set(HashSet::new()), None))
            }
        };

        let set = match &mut entry.value {
            StoredValue::Set(set) => set,
            StoredValue::Str(_) => return Err(wrong_type(key)),
        };

        let added = members
            .iter()
            .filter(|member| set.insert((*member).clone()))
            .count() as u64;

        debug!("✓ InMemory SADD {} (+{})", key, added);
        Ok(added)
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool> {
        match self.store.get_mut(key) {
            Some(mut entry) if !entry.is_expired() => {
                entry.expires_at = Some(Instant::now() + ttl);
                debug!("✓ InMemory EXPIRE {} ({:?})", key, ttl);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn smembers(&self, key: &str) -> Result<Vec<String>> {
        if let Some(entry) = self.store.get(key) {
            if !entry.is_expired() {
                return match &entry.value {
                    StoredValue::Set(set) => Ok(set.iter().cloned().collect()),
                    StoredValue::Str(_) => Err(wrong_type(key)),
                };
            }
        }
        Ok(Vec::new())
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        if let Some(entry) = self.store.get(key) {
            return Ok(!entry.is_expired());
        }

        Ok(false)
    }

    async fn mget(&self, keys: &[String]) -> Result<Vec<Option<String>>> {
        let results = keys
            .iter()
            .map(|k| self.read_str(k))
            .collect::<Result<Vec<_>>>()?;

        debug!("✓ InMemory MGET {} keys", keys.len());
        Ok(results)
    }

    async fn mset(&self, entries: &[(String, String)], ttl: Option<Duration>) -> Result<()> {
        for (key, value) in entries {
            self.store.insert(
                key.clone(),
                CacheEntry::new(StoredValue::Str(value.clone()), ttl),
            );
        }

        debug!("✓ InMemory MSET {} keys", entries.len());
        Ok(())
    }

    async fn mdelete(&self, keys: &[String]) -> Result<u64> {
        let mut removed = 0;
        for key in keys {
            if self
                .store
                .remove(key)
                .is_some_and(|(_, entry)| !entry.is_expired())
            {
                removed += 1;
            }
        }

        debug!("✓ InMemory MDELETE {} keys", keys.len());
        Ok(removed)
    }

    async fn health_check(&self) -> Result<bool> {
        // In-memory backend is always healthy
        Ok(true)
    }

    async fn clear_all(&self) -> Result<()> {
        self.store.clear();
        warn!("⚠ InMemory CLEAR_ALL executed - all cache cleared!");
        Ok(())
    }
}

/// Cache statistics.
#[derive(Clone, Debug)]
pub struct CacheStats {
    pub total_entries: usize,
    pub expired_entries: usize,
    pub set_entries: usize,
    pub total_bytes: usize,
}
