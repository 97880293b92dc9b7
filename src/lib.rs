//! # cacheaside
//!
//! A cache-aside fetch-and-cache engine for batch lookups.
//!
//! Services ask for many entities at once; the engine answers what it can
//! from a key/value cache, hands the rest to a fallback fetch against the
//! source of truth, and writes the result back in the background.
//!
//! ## Features
//!
//! - **Batch by-id lookups** with a negative cache, so ids the source does
//!   not have stop reaching it until the marker expires
//! - **Grouped lookups** ("roles of user X") backed by secondary index sets,
//!   refetching a whole group as soon as one member entry is gone
//! - **Fail open:** a cache outage or a fired cancellation token degrades to
//!   the source instead of failing the request
//! - **Bounded write-behind:** write-backs run on detached tasks under a
//!   concurrency limit and never block the read path
//! - **Backend agnostic:** in-memory and Redis backends behind [`CacheBackend`]
//!
//! ## Quick Start
//!
//! ```ignore
//! use cacheaside::{
//!     CacheEntity, CacheService,
//!     backend::InMemoryBackend,
//!     mapping::PrefixedMapping,
//! };
//! use serde::{Deserialize, Serialize};
//! use tokio_util::sync::CancellationToken;
//!
//! // 1. Define your entity
//! #[derive(Clone, Serialize, Deserialize)]
//! struct User {
//!     id: u64,
//!     name: String,
//! }
//!
//! // 2. Implement CacheEntity
//! impl CacheEntity for User {
//!     type Key = u64;
//!     fn cache_key(&self) -> Self::Key { self.id }
//!     fn cache_prefix() -> &'static str { "user" }
//! }
//!
//! // 3. Create the service (cheap to clone)
//! let cache = CacheService::new(InMemoryBackend::new());
//! let users = PrefixedMapping::<User>::new();
//! let token = CancellationToken::new();
//!
//! // 4a. With a repository implementing EntityRepository
//! let found = cache.get_many(&users, &repository, &[1, 2, 5], &token).await?;
//!
//! // 4b. Or with a plain closure
//! let found = cache
//!     .engine()
//!     .get_by_ids_or_fetch_and_cache(&users, &[1, 2, 5], |missing, token| async move {
//!         load_users(&missing, &token).await
//!     }, &token)
//!     .await?;
//! ```
//!
//! ## Cache layout
//!
//! | Entry | Key | Value |
//! |---|---|---|
//! | entity | `{prefix}:{id}` | JSON |
//! | negative marker | `{key}:null` | `"1"` |
//! | index set | `{outer_prefix}:{outer_id}:{index}` | member ids |

#[macro_use]
extern crate log;

pub mod backend;
pub mod config;
pub mod engine;
pub mod entity;
pub mod error;
pub mod key;
pub mod mapping;
pub mod observability;
pub mod repository;
pub mod serialization;
pub mod service;
pub mod transport;
pub mod write_behind;

// Re-exports for convenience
pub use backend::CacheBackend;
pub use config::CacheConfig;
pub use engine::CacheEngine;
pub use entity::CacheEntity;
pub use error::{Error, Result};
pub use mapping::{EntityCacheMapping, GroupMapping};
pub use repository::{EntityRepository, GroupedRepository};
pub use service::CacheService;
pub use transport::{CacheTransport, WriteMode};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
