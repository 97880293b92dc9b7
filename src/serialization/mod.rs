//! JSON value codec for cached strings.
//!
//! Every cached entity is stored as a UTF-8 JSON string so that other
//! processes sharing the cache (including non-Rust ones) can read it. Set
//! members and negative-marker sentinels are plain strings.
//!
//! # Format
//!
//! ```text
//! value: String       -> stored verbatim          ("alice"      -> alice)
//! value: anything else -> serde_json::to_string   ({"id":1,...} -> {"id":1,...})
//! ```
//!
//! # Example
//!
//! ```rust
//! use cacheaside::serialization::{decode_value, encode_value};
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Serialize, Deserialize, PartialEq, Debug)]
//! struct User {
//!     id: u64,
//!     name: String,
//! }
//!
//! # fn main() -> cacheaside::Result<()> {
//! let user = User { id: 1, name: "Alice".to_string() };
//! let raw = encode_value(&user)?;
//! assert_eq!(raw, r#"{"id":1,"name":"Alice"}"#);
//!
//! let decoded: Option<User> = decode_value(&raw)?;
//! assert_eq!(decoded, Some(user));
//! # Ok(())
//! # }
//! ```

use crate::error::{Error, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

/// Encode a value into its cached string form.
///
/// Strings pass through unchanged, everything else is JSON-encoded.
///
/// # Errors
///
/// Returns `Error::SerializationError` if the value cannot be represented as JSON.
pub fn encode_value<T: Serialize + ?Sized>(value: &T) -> Result<String> {
    let json = serde_json::to_value(value).map_err(|e| {
        error!("Cache serialization failed: {}", e);
        Error::SerializationError(e.to_string())
    })?;

    match json {
        Value::String(s) => Ok(s),
        other => Ok(other.to_string()),
    }
}

/// Decode a cached string.
///
/// Returns `Ok(None)` when the stored value is blank or the JSON `null`; both
/// are treated as absent, so an empty `String` does not survive a round
/// trip. A raw string that is not valid JSON is retried as a JSON
/// string so that values written by [`encode_value`] from a `String` decode
/// back into `String`.
///
/// # Errors
///
/// Returns `Error::DeserializationError` if the string decodes into neither form.
pub fn decode_value<T: DeserializeOwned>(raw: &str) -> Result<Option<T>> {
    if raw.trim().is_empty() {
        return Ok(None);
    }

    let parsed: std::result::Result<Value, _> = serde_json::from_str(raw);

    match parsed {
        Ok(Value::Null) => Ok(None),
        Ok(value) => match serde_json::from_value::<T>(value) {
            Ok(decoded) => Ok(Some(decoded)),
            // A pass-through string that happens to look like JSON ("42", "true").
            Err(e) => serde_json::from_value::<T>(Value::String(raw.to_string()))
                .map(Some)
                .map_err(|_| Error::DeserializationError(e.to_string())),
        },
        Err(e) => serde_json::from_value::<T>(Value::String(raw.to_string()))
            .map(Some)
            .map_err(|_| Error::DeserializationError(e.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Badge {
        id: u32,
        title: String,
    }

    #[test]
    fn test_strings_pass_through() {
        assert_eq!(encode_value("plain").expect("encode"), "plain");
        let decoded: Option<String> = decode_value("plain").expect("decode");
        assert_eq!(decoded.as_deref(), Some("plain"));
    }

    #[test]
    fn test_numeric_looking_string_decodes_as_string() {
        let decoded: Option<String> = decode_value("42").expect("decode");
        assert_eq!(decoded.as_deref(), Some("42"));
    }

    #[test]
    fn test_struct_is_json_encoded() {
        let badge = Badge {
            id: 7,
            title: "Helper".to_string(),
        };
        let raw = encode_value(&badge).expect("encode");
        assert_eq!(raw, r#"{"id":7,"title":"Helper"}"#);
    }

    #[test]
    fn test_null_is_absent() {
        let decoded: Option<Badge> = decode_value("null").expect("decode");
        assert!(decoded.is_none());
    }

    #[test]
    fn test_blank_is_absent() {
        let decoded: Option<Badge> = decode_value("").expect("decode");
        assert!(decoded.is_none());

        let decoded: Option<String> = decode_value("  ").expect("decode");
        assert!(decoded.is_none());
    }

    #[test]
    fn test_garbage_is_error() {
        let result: Result<Option<Badge>> = decode_value("{\"id\": tru");
        assert!(matches!(result, Err(Error::DeserializationError(_))));

        let result: Result<Option<Badge>> = decode_value(r#"{"id":"nope"}"#);
        assert!(matches!(result, Err(Error::DeserializationError(_))));
    }
}
