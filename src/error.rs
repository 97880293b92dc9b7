//! Error types for the cache-aside engine.

use std::fmt;

/// Result type for cache operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for the cache-aside engine.
///
/// Most of these never reach callers of the fetch-and-cache engines: read-side
/// transport failures degrade to the source of truth and write-side failures
/// are logged. They are returned directly by the transport, the backends and
/// the [`CacheService`](crate::CacheService) convenience methods.
#[derive(Debug, Clone)]
pub enum Error {
    /// Serialization failed when converting a value to its cached string form.
    SerializationError(String),

    /// Deserialization failed when converting a cached string back to a value.
    ///
    /// The engines never surface this: an undecodable entry is treated as a
    /// cache miss for that single key.
    DeserializationError(String),

    /// Backend storage error (Redis connection lost, protocol error, etc).
    ///
    /// Also returned when a TTL could not be applied to a set written with
    /// [`WriteMode::Await`](crate::transport::WriteMode::Await).
    BackendError(String),

    /// Source-of-truth repository error.
    ///
    /// Returned by [`EntityRepository`](crate::repository::EntityRepository)
    /// implementations and passed through the engines unmodified.
    RepositoryError(String),

    /// The caller's cancellation token fired while a cache read was pending.
    Cancelled,

    /// Invalid configuration (zero TTL, bad connection string, ...).
    ConfigError(String),

    /// Feature not implemented by this backend.
    NotImplemented(String),

    /// A single requested id exists neither in the cache nor in the source.
    NotFound(String),

    /// Several requested ids exist neither in the cache nor in the source.
    ManyNotFound(Vec<String>),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::SerializationError(msg) => write!(f, "Serialization error: {}", msg),
            Error::DeserializationError(msg) => write!(f, "Deserialization error: {}", msg),
            Error::BackendError(msg) => write!(f, "Backend error: {}", msg),
            Error::RepositoryError(msg) => write!(f, "Repository error: {}", msg),
            Error::Cancelled => write!(f, "Operation cancelled"),
            Error::ConfigError(msg) => write!(f, "Config error: {}", msg),
            Error::NotImplemented(msg) => write!(f, "Not implemented: {}", msg),
            Error::NotFound(id) => write!(f, "Entity {} not found", id),
            Error::ManyNotFound(ids) => write!(f, "Entities not found: {}", ids.join(", ")),
        }
    }
}

impl std::error::Error for Error {}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        if e.is_io() {
            Error::BackendError(e.to_string())
        } else if e.is_syntax() || e.is_eof() || e.is_data() {
            Error::DeserializationError(e.to_string())
        } else {
            Error::SerializationError(e.to_string())
        }
    }
}

#[cfg(feature = "redis")]
impl From<redis::RedisError> for Error {
    fn from(e: redis::RedisError) -> Self {
        Error::BackendError(format!("Redis error: {}", e))
    }
}
