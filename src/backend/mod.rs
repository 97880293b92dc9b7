//! Raw key/value store backends.
//!
//! A [`CacheBackend`] exposes the store primitives the
//! [`CacheTransport`](crate::transport::CacheTransport) builds on: string
//! get/set with TTL, deletion, existence checks and set membership.

use crate::error::Result;
use std::future::Future;
use std::time::Duration;

pub mod inmemory;
#[cfg(feature = "redis")]
pub mod redis;

pub use inmemory::InMemoryBackend;
#[cfg(feature = "redis")]
pub use redis::{PoolStats, RedisBackend, RedisConfig};

/// Trait for cache backend implementations.
///
/// All methods take `&self` so a backend can be shared across tasks; state
/// lives behind interior mutability or in the remote store. Backends are
/// `Clone + 'static` because fire-and-forget writes move a clone into a
/// detached task, and every returned future is `Send` for the same reason.
pub trait CacheBackend: Send + Sync + Clone + 'static {
    /// Retrieve a string value.
    ///
    /// # Returns
    /// - `Ok(Some(value))` - Value found
    /// - `Ok(None)` - Key absent or expired
    ///
    /// # Errors
    /// Returns `Err` if the key holds a set or the backend is unreachable.
    fn get(&self, key: &str) -> impl Future<Output = Result<Option<String>>> + Send;

    /// Store a string value with optional TTL.
    ///
    /// # Errors
    /// Returns `Err` if backend error occurs
    fn set(
        &self,
        key: &str,
        value: String,
        ttl: Option<Duration>,
    ) -> impl Future<Output = Result<()>> + Send;

    /// Remove a key of any type. Returns whether it existed.
    ///
    /// # Errors
    /// Returns `Err` if backend error occurs
    fn delete(&self, key: &str) -> impl Future<Output = Result<bool>> + Send;

    /// Add members to the set at `key`, creating it if needed.
    /// Returns the number of members that were not already present.
    ///
    /// # Errors
    /// Returns `Err` if the key holds a string or the backend is unreachable.
    fn sadd(&self, key: &str, members: &[String]) -> impl Future<Output = Result<u64>> + Send;

    /// (Re)apply a TTL to an existing key. Returns `false` if the key does not exist.
    ///
    /// # Errors
    /// Returns `Err` if backend error occurs
    fn expire(&self, key: &str, ttl: Duration) -> impl Future<Output = Result<bool>> + Send;

    /// Read all members of the set at `key`. A missing key is an empty set.
    ///
    /// # Errors
    /// Returns `Err` if the key holds a string or the backend is unreachable.
    fn smembers(&self, key: &str) -> impl Future<Output = Result<Vec<String>>> + Send;

    /// Check if a key exists.
    ///
    /// # Errors
    /// Returns `Err` if backend error occurs
    fn exists(&self, key: &str) -> impl Future<Output = Result<bool>> + Send {
        async move { Ok(self.get(key).await?.is_some()) }
    }

    /// Bulk get. The result is aligned with `keys`.
    ///
    /// Default implementation calls `get()` for each key.
    /// Override for batch efficiency (e.g., Redis MGET).
    ///
    /// # Errors
    /// Returns `Err` if backend error occurs
    fn mget(&self, keys: &[String]) -> impl Future<Output = Result<Vec<Option<String>>>> + Send {
        async move {
            let mut results = Vec::with_capacity(keys.len());
            for key in keys {
                results.push(self.get(key).await?);
            }
            Ok(results)
        }
    }

    /// Bulk set with a shared TTL.
    ///
    /// Default implementation calls `set()` for each entry.
    /// Override for batch efficiency (e.g., a Redis pipeline).
    ///
    /// # Errors
    /// Returns `Err` if backend error occurs
    fn mset(
        &self,
        entries: &[(String, String)],
        ttl: Option<Duration>,
    ) -> impl Future<Output = Result<()>> + Send {
        async move {
            for (key, value) in entries {
                self.set(key, value.clone(), ttl).await?;
            }
            Ok(())
        }
    }

    /// Bulk delete. Returns the number of keys that existed.
    ///
    /// # Errors
    /// Returns `Err` if backend error occurs
    fn mdelete(&self, keys: &[String]) -> impl Future<Output = Result<u64>> + Send {
        async move {
            let mut removed = 0;
            for key in keys {
                if self.delete(key).await? {
                    removed += 1;
                }
            }
            Ok(removed)
        }
    }

    /// Health check - verify backend is accessible.
    ///
    /// # Errors
    /// Returns `Err` if backend is not accessible
    fn health_check(&self) -> impl Future<Output = Result<bool>> + Send {
        async { Ok(true) }
    }

    /// Clear the whole store (use with caution).
    ///
    /// # Errors
    /// Returns `Err` if operation is not implemented or fails
    fn clear_all(&self) -> impl Future<Output = Result<()>> + Send {
        async {
            Err(crate::error::Error::NotImplemented(
                "clear_all not implemented for this backend".to_string(),
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_backend_exists_default() {
        let backend = InMemoryBackend::new();
        backend
            .set("key", "value".to_string(), None)
            .await
            .expect("Failed to set key");
        assert!(backend.exists("key").await.expect("Failed to check exists"));
        assert!(!backend
            .exists("nonexistent")
            .await
            .expect("Failed to check exists"));
    }

    #[tokio::test]
    async fn test_backend_bulk_ops() {
        let backend = InMemoryBackend::new();
        backend
            .mset(
                &[
                    ("a".to_string(), "1".to_string()),
                    ("b".to_string(), "2".to_string()),
                ],
                None,
            )
            .await
            .expect("Failed to mset");

        let values = backend
            .mget(&["a".to_string(), "missing".to_string(), "b".to_string()])
            .await
            .expect("Failed to mget");
        assert_eq!(
            values,
            vec![Some("1".to_string()), None, Some("2".to_string())]
        );

        let removed = backend
            .mdelete(&["a".to_string(), "missing".to_string()])
            .await
            .expect("Failed to mdelete");
        assert_eq!(removed, 1);
    }
}
