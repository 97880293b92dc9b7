//! Engine configuration: TTLs, write modes and the background write bound.

use crate::error::{Error, Result};
use crate::transport::WriteMode;
use std::time::Duration;

/// Default lifetime of a cached entity or index set.
pub const DEFAULT_POSITIVE_TTL: Duration = Duration::from_secs(3600);

/// Default lifetime of a negative marker.
pub const DEFAULT_NEGATIVE_TTL: Duration = Duration::from_secs(300);

/// Default number of background writes allowed in flight at once.
pub const DEFAULT_WRITE_BEHIND_CAPACITY: usize = 256;

/// Which write-back categories are dispatched as fire-and-forget.
///
/// A category that is not fire-and-forget is awaited by the engine before it
/// returns; failures are still logged and swallowed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FireAndForget {
    /// Entity entries written after a fetch.
    pub entities: bool,
    /// Negative markers for ids the source confirmed absent.
    pub null_markers: bool,
    /// Secondary index sets written by the grouped engine.
    pub index_sets: bool,
}

impl Default for FireAndForget {
    fn default() -> Self {
        FireAndForget {
            entities: true,
            null_markers: true,
            index_sets: true,
        }
    }
}

impl FireAndForget {
    /// Await every write-back category.
    pub fn none() -> Self {
        FireAndForget {
            entities: false,
            null_markers: false,
            index_sets: false,
        }
    }

    pub(crate) fn mode(flag: bool) -> WriteMode {
        if flag {
            WriteMode::FireAndForget
        } else {
            WriteMode::Await
        }
    }
}

/// Configuration for [`CacheEngine`](crate::CacheEngine).
///
/// # Example
///
/// ```
/// use cacheaside::config::CacheConfig;
/// use std::time::Duration;
///
/// let config = CacheConfig::default()
///     .with_positive_ttl(Duration::from_secs(600))
///     .with_negative_ttl(Duration::from_secs(30));
///
/// assert!(config.validate().is_ok());
/// ```
#[derive(Clone, Debug)]
pub struct CacheConfig {
    /// TTL applied to entity entries and index sets.
    pub positive_ttl: Duration,

    /// TTL applied to negative markers.
    ///
    /// Bounds how long a false negative can persist after the source starts
    /// returning the entity, so it should be shorter than `positive_ttl`.
    pub negative_ttl: Duration,

    /// Fire-and-forget flag per write-back category.
    pub fire_and_forget: FireAndForget,

    /// Maximum number of background writes in flight.
    pub write_behind_capacity: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        CacheConfig {
            positive_ttl: DEFAULT_POSITIVE_TTL,
            negative_ttl: DEFAULT_NEGATIVE_TTL,
            fire_and_forget: FireAndForget::default(),
            write_behind_capacity: DEFAULT_WRITE_BEHIND_CAPACITY,
        }
    }
}

impl CacheConfig {
    pub fn with_positive_ttl(mut self, ttl: Duration) -> Self {
        self.positive_ttl = ttl;
        self
    }

    pub fn with_negative_ttl(mut self, ttl: Duration) -> Self {
        self.negative_ttl = ttl;
        self
    }

    pub fn with_fire_and_forget(mut self, fire_and_forget: FireAndForget) -> Self {
        self.fire_and_forget = fire_and_forget;
        self
    }

    pub fn with_write_behind_capacity(mut self, capacity: usize) -> Self {
        self.write_behind_capacity = capacity;
        self
    }

    /// Build configuration from environment variables, falling back to defaults.
    ///
    /// | Variable | Meaning |
    /// |---|---|
    /// | `CACHE_POSITIVE_TTL_SECS` | positive TTL in seconds |
    /// | `CACHE_NEGATIVE_TTL_SECS` | negative TTL in seconds |
    /// | `CACHE_FIRE_AND_FORGET_ENTITIES` | `true`/`false` |
    /// | `CACHE_FIRE_AND_FORGET_NULL_MARKERS` | `true`/`false` |
    /// | `CACHE_FIRE_AND_FORGET_INDEX_SETS` | `true`/`false` |
    /// | `CACHE_WRITE_BEHIND_CAPACITY` | background write bound |
    ///
    /// # Errors
    ///
    /// Returns `Error::ConfigError` if a variable is set but unparseable, or
    /// if the resulting configuration fails [`validate`](Self::validate).
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub(crate) fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = CacheConfig::default();

        if let Some(secs) = parse_var::<u64, _>(&lookup, "CACHE_POSITIVE_TTL_SECS")? {
            config.positive_ttl = Duration::from_secs(secs);
        }
        if let Some(secs) = parse_var::<u64, _>(&lookup, "CACHE_NEGATIVE_TTL_SECS")? {
            config.negative_ttl = Duration::from_secs(secs);
        }
        if let Some(flag) = parse_var::<bool, _>(&lookup, "CACHE_FIRE_AND_FORGET_ENTITIES")? {
            config.fire_and_forget.entities = flag;
        }
        if let Some(flag) = parse_var::<bool, _>(&lookup, "CACHE_FIRE_AND_FORGET_NULL_MARKERS")? {
            config.fire_and_forget.null_markers = flag;
        }
        if let Some(flag) = parse_var::<bool, _>(&lookup, "CACHE_FIRE_AND_FORGET_INDEX_SETS")? {
            config.fire_and_forget.index_sets = flag;
        }
        if let Some(capacity) = parse_var::<usize, _>(&lookup, "CACHE_WRITE_BEHIND_CAPACITY")? {
            config.write_behind_capacity = capacity;
        }

        config.validate()?;
        Ok(config)
    }

    /// Check the configuration for values the engine cannot work with.
    ///
    /// # Errors
    ///
    /// Returns `Error::ConfigError` for a zero TTL, a zero write-behind
    /// capacity, or a negative TTL longer than the positive TTL.
    pub fn validate(&self) -> Result<()> {
        // Redis SET EX rejects 0 and sub-second TTLs round down to it.
        if self.positive_ttl.as_secs() == 0 {
            return Err(Error::ConfigError(
                "positive TTL must be at least one second".to_string(),
            ));
        }
        if self.negative_ttl.as_secs() == 0 {
            return Err(Error::ConfigError(
                "negative TTL must be at least one second".to_string(),
            ));
        }
        if self.negative_ttl > self.positive_ttl {
            return Err(Error::ConfigError(format!(
                "negative TTL ({:?}) must not exceed positive TTL ({:?})",
                self.negative_ttl, self.positive_ttl
            )));
        }
        if self.write_behind_capacity == 0 {
            return Err(Error::ConfigError(
                "write-behind capacity must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

fn parse_var<T, F>(lookup: &F, name: &str) -> Result<Option<T>>
where
    T: std::str::FromStr,
    F: Fn(&str) -> Option<String>,
{
    match lookup(name) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| Error::ConfigError(format!("{} has invalid value '{}'", name, raw))),
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name: &str| vars.get(name).cloned()
    }

    #[test]
    fn test_default_config_is_valid() {
        let config = CacheConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.positive_ttl, DEFAULT_POSITIVE_TTL);
        assert_eq!(config.negative_ttl, DEFAULT_NEGATIVE_TTL);
        assert_eq!(config.fire_and_forget, FireAndForget::default());
    }

    #[test]
    fn test_from_lookup_overrides() {
        let config = CacheConfig::from_lookup(lookup_from(&[
            ("CACHE_POSITIVE_TTL_SECS", "120"),
            ("CACHE_NEGATIVE_TTL_SECS", "10"),
            ("CACHE_FIRE_AND_FORGET_INDEX_SETS", "false"),
            ("CACHE_WRITE_BEHIND_CAPACITY", "8"),
        ]))
        .expect("valid config");

        assert_eq!(config.positive_ttl, Duration::from_secs(120));
        assert_eq!(config.negative_ttl, Duration::from_secs(10));
        assert!(config.fire_and_forget.entities);
        assert!(!config.fire_and_forget.index_sets);
        assert_eq!(config.write_behind_capacity, 8);
    }

    #[test]
    fn test_from_lookup_rejects_garbage() {
        let result = CacheConfig::from_lookup(lookup_from(&[("CACHE_NEGATIVE_TTL_SECS", "soon")]));
        assert!(matches!(result, Err(Error::ConfigError(_))));
    }

    #[test]
    fn test_validate_rejects_long_negative_ttl() {
        let config = CacheConfig::default()
            .with_positive_ttl(Duration::from_secs(60))
            .with_negative_ttl(Duration::from_secs(600));
        assert!(matches!(config.validate(), Err(Error::ConfigError(_))));
    }

    #[test]
    fn test_validate_rejects_zero_values() {
        let config = CacheConfig::default().with_negative_ttl(Duration::from_millis(500));
        assert!(config.validate().is_err());

        let config = CacheConfig::default().with_write_behind_capacity(0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_fire_and_forget_mode() {
        assert_eq!(FireAndForget::mode(true), WriteMode::FireAndForget);
        assert_eq!(FireAndForget::mode(false), WriteMode::Await);
    }
}
