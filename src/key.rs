//! Cache key shapes.
//!
//! ```text
//! entry          {prefix}:{id}
//! negative mark  {prefix}:{id}:null
//! index set      {outer_prefix}:{outer_id}:{index_name}
//! ```

/// Suffix appended to a base key to form its negative-marker key.
pub const NULL_SUFFIX: &str = ":null";

/// Value stored under a negative-marker key.
pub const NULL_SENTINEL: &str = "1";

/// Builder for cache keys.
pub struct CacheKeyBuilder;

impl CacheKeyBuilder {
    /// Build full cache key from a prefix and id.
    pub fn build(prefix: &str, id: &dyn std::fmt::Display) -> String {
        format!("{}:{}", prefix, id)
    }

    /// Build composite key from multiple parts.
    pub fn build_composite(parts: &[&str]) -> String {
        parts.join(":")
    }

    /// Negative-marker key for a base key.
    pub fn null_key(base: &str) -> String {
        format!("{}{}", base, NULL_SUFFIX)
    }

    /// Base key of a negative-marker key, if `key` is one.
    pub fn base_of_null_key(key: &str) -> Option<&str> {
        key.strip_suffix(NULL_SUFFIX)
    }

    /// Strip `"{prefix}:"` from a key, returning the id portion.
    ///
    /// Ids may themselves contain `:`; everything after the first
    /// `"{prefix}:"` is returned.
    pub fn id_part<'a>(prefix: &str, key: &'a str) -> Option<&'a str> {
        key.strip_prefix(prefix)
            .and_then(|rest| rest.strip_prefix(':'))
            .filter(|id| !id.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_key_builder() {
        let key = CacheKeyBuilder::build("user", &"123");
        assert_eq!(key, "user:123");
    }

    #[test]
    fn test_composite_key_builder() {
        let key = CacheKeyBuilder::build_composite(&["user", "123", "badge"]);
        assert_eq!(key, "user:123:badge");
    }

    #[test]
    fn test_null_key_roundtrip() {
        let null_key = CacheKeyBuilder::null_key("user:42");
        assert_eq!(null_key, "user:42:null");
        assert_eq!(CacheKeyBuilder::base_of_null_key(&null_key), Some("user:42"));
        assert_eq!(CacheKeyBuilder::base_of_null_key("user:42"), None);
    }

    #[test]
    fn test_id_part() {
        assert_eq!(CacheKeyBuilder::id_part("user", "user:42"), Some("42"));
        assert_eq!(CacheKeyBuilder::id_part("user", "user:a:b"), Some("a:b"));
        assert_eq!(CacheKeyBuilder::id_part("user", "username:42"), None);
        assert_eq!(CacheKeyBuilder::id_part("user", "user:"), None);
    }
}
