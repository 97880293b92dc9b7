//! Entity trait for types with a natural id and key prefix.

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt::Display;
use std::hash::Hash;
use std::str::FromStr;

/// Trait for entities with a natural id and a fixed key prefix.
///
/// Implementing it is the short route to a cache mapping: wrap the type in
/// [`PrefixedMapping`](crate::mapping::PrefixedMapping) instead of
/// implementing [`EntityCacheMapping`](crate::mapping::EntityCacheMapping)
/// by hand.
///
/// # Example
///
/// ```
/// use serde::{Deserialize, Serialize};
/// use cacheaside::CacheEntity;
///
/// #[derive(Clone, Serialize, Deserialize)]
/// pub struct Role {
///     pub id: u32,
///     pub name: String,
/// }
///
/// impl CacheEntity for Role {
///     type Key = u32;
///
///     fn cache_key(&self) -> Self::Key {
///         self.id
///     }
///
///     fn cache_prefix() -> &'static str {
///         "role"
///     }
/// }
/// ```
pub trait CacheEntity: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    /// Type of the entity's id. `Display` and `FromStr` must round-trip,
    /// since ids are embedded in keys and set members as text.
    type Key: Display + FromStr + Clone + Eq + Hash + Send + Sync + 'static;

    /// Return the entity's id.
    fn cache_key(&self) -> Self::Key;

    /// Return the key prefix for this entity type, e.g. `"user"`.
    ///
    /// Final cache key format: `"{prefix}:{key}"`
    fn cache_prefix() -> &'static str;
}
