//! Per-entity cache key schemes.
//!
//! The engines never build keys themselves. An [`EntityCacheMapping`] is
//! implemented once per entity type and decides how ids turn into keys and
//! set members and back; a [`GroupMapping`] adds the two key spaces of a
//! one-to-many relation (the outer entity's own key and its index set).

use crate::entity::CacheEntity;
use crate::key::CacheKeyBuilder;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt::{self, Display};
use std::hash::Hash;
use std::marker::PhantomData;
use std::str::FromStr;

/// Key scheme of one cached entity type.
pub trait EntityCacheMapping: Send + Sync {
    /// Entity id.
    type Id: Clone + Eq + Hash + Display + Send + Sync + 'static;
    /// Cached entity.
    type Entity: Serialize + DeserializeOwned + Clone + Send + Sync + 'static;

    /// Cache key holding the entity with this id.
    fn key_for_id(&self, id: &Self::Id) -> String;

    /// Recover the id from a key produced by [`key_for_id`](Self::key_for_id).
    fn id_from_key(&self, key: &str) -> Option<Self::Id>;

    /// Id of an entity.
    fn entity_id(&self, entity: &Self::Entity) -> Self::Id;

    /// Member token stored in index sets for this entity.
    fn index_value(&self, entity: &Self::Entity) -> String;

    /// Recover the id from a member token.
    fn id_from_index_value(&self, value: &str) -> Option<Self::Id>;

    /// Short name used in logs and metrics.
    fn cache_name(&self) -> &str {
        "entity"
    }
}

/// Key scheme of a one-to-many relation, e.g. "roles of user X".
pub trait GroupMapping: Send + Sync {
    /// Id of the grouping (outer) entity.
    type OuterId: Clone + Eq + Hash + Display + Send + Sync + 'static;
    /// Mapping of the grouped (member) entities.
    type Members: EntityCacheMapping;

    /// Mapping used for member entries.
    fn members(&self) -> &Self::Members;

    /// The outer entity's own cache key. A negative marker on it means the
    /// outer entity, and therefore the whole group, does not exist.
    fn outer_key(&self, outer_id: &Self::OuterId) -> String;

    /// Key of the index set listing the group's member tokens.
    fn index_key(&self, outer_id: &Self::OuterId) -> String;

    /// Short name used in logs and metrics.
    fn cache_name(&self) -> &str {
        "group"
    }
}

/// Member entity type of a group mapping.
pub type GroupMember<G> = <<G as GroupMapping>::Members as EntityCacheMapping>::Entity;

/// Member id type of a group mapping.
pub type GroupMemberId<G> = <<G as GroupMapping>::Members as EntityCacheMapping>::Id;

/// `"{prefix}:{id}"` mapping for any [`CacheEntity`].
///
/// Member tokens are the id's `Display` form.
///
/// # Example
///
/// ```
/// # use serde::{Deserialize, Serialize};
/// use cacheaside::mapping::{EntityCacheMapping, PrefixedMapping};
/// # use cacheaside::CacheEntity;
/// # #[derive(Clone, Serialize, Deserialize)]
/// # struct User { id: u64 }
/// # impl CacheEntity for User {
/// #     type Key = u64;
/// #     fn cache_key(&self) -> u64 { self.id }
/// #     fn cache_prefix() -> &'static str { "user" }
/// # }
///
/// let users = PrefixedMapping::<User>::new();
/// assert_eq!(users.key_for_id(&42), "user:42");
/// assert_eq!(users.id_from_key("user:42"), Some(42));
/// ```
pub struct PrefixedMapping<E> {
    _entity: PhantomData<fn() -> E>,
}

impl<E> PrefixedMapping<E> {
    pub fn new() -> Self {
        PrefixedMapping {
            _entity: PhantomData,
        }
    }
}

impl<E> Default for PrefixedMapping<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> Clone for PrefixedMapping<E> {
    fn clone(&self) -> Self {
        Self::new()
    }
}

impl<E: CacheEntity> fmt::Debug for PrefixedMapping<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PrefixedMapping")
            .field("prefix", &E::cache_prefix())
            .finish()
    }
}

impl<E: CacheEntity> EntityCacheMapping for PrefixedMapping<E> {
    type Id = E::Key;
    type Entity = E;

    fn key_for_id(&self, id: &E::Key) -> String {
        CacheKeyBuilder::build(E::cache_prefix(), id)
    }

    fn id_from_key(&self, key: &str) -> Option<E::Key> {
        CacheKeyBuilder::id_part(E::cache_prefix(), key)?.parse().ok()
    }

    fn entity_id(&self, entity: &E) -> E::Key {
        entity.cache_key()
    }

    fn index_value(&self, entity: &E) -> String {
        entity.cache_key().to_string()
    }

    fn id_from_index_value(&self, value: &str) -> Option<E::Key> {
        value.parse().ok()
    }

    fn cache_name(&self) -> &str {
        E::cache_prefix()
    }
}

/// Group mapping built from prefixes.
///
/// ```text
/// outer key   {outer_prefix}:{outer_id}
/// index key   {outer_prefix}:{outer_id}:{index_name}
/// ```
///
/// Using the outer entity's own prefix means a negative marker written by a
/// by-id lookup of that entity also marks its groups as absent.
pub struct PrefixedGroupMapping<O, M> {
    outer_prefix: &'static str,
    index_name: &'static str,
    members: M,
    _outer: PhantomData<fn() -> O>,
}

impl<O, M> PrefixedGroupMapping<O, M> {
    pub fn new(outer_prefix: &'static str, index_name: &'static str, members: M) -> Self {
        PrefixedGroupMapping {
            outer_prefix,
            index_name,
            members,
            _outer: PhantomData,
        }
    }
}

impl<O, M> GroupMapping for PrefixedGroupMapping<O, M>
where
    O: Clone + Eq + Hash + Display + FromStr + Send + Sync + 'static,
    M: EntityCacheMapping,
{
    type OuterId = O;
    type Members = M;

    fn members(&self) -> &M {
        &self.members
    }

    fn outer_key(&self, outer_id: &O) -> String {
        CacheKeyBuilder::build(self.outer_prefix, outer_id)
    }

    fn index_key(&self, outer_id: &O) -> String {
        let outer = outer_id.to_string();
        CacheKeyBuilder::build_composite(&[self.outer_prefix, &outer, self.index_name])
    }

    fn cache_name(&self) -> &str {
        self.index_name
    }
}
