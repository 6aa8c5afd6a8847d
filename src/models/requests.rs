//! Request DTOs for the cache server API
//!
//! Defines the structure of incoming HTTP request bodies and query strings.

use serde::Deserialize;
use serde_json::Value;

use crate::cache::Ttl;

/// Longest key accepted over HTTP
pub const MAX_KEY_LENGTH: usize = 256;

/// Request body for PUT /set and PUT /add
///
/// # Fields
/// - `key`: The cache key to store the value under
/// - `value`: Any JSON value
/// - `ttl`: Optional TTL in seconds, negative for no expiry
#[derive(Debug, Clone, Deserialize)]
pub struct SetRequest {
    /// The cache key
    pub key: String,
    /// The value to store
    pub value: Value,
    /// Optional TTL in seconds
    #[serde(default)]
    pub ttl: Option<i64>,
}

impl SetRequest {
    /// Validates the request data
    ///
    /// Returns an error message if validation fails, None if valid.
    pub fn validate(&self) -> Option<String> {
        validate_key(&self.key)
    }

    /// TTL to store the entry with, falling back to `default`.
    pub fn ttl_or(&self, default: Ttl) -> Ttl {
        self.ttl.map(Ttl::from_secs).unwrap_or(default)
    }
}

/// Request body for POST /incr/:key and POST /decr/:key
#[derive(Debug, Clone, Default, Deserialize)]
pub struct IncrRequest {
    /// Amount to move the counter by (default: 1)
    #[serde(default)]
    pub delta: Option<i64>,
}

impl IncrRequest {
    pub fn delta(&self) -> i64 {
        self.delta.unwrap_or(1)
    }
}

/// Query string for GET /keys and DELETE /keys
#[derive(Debug, Clone, Default, Deserialize)]
pub struct KeysQuery {
    /// `LIKE` pattern, `%` and `_` are wildcards
    #[serde(default)]
    pub pattern: Option<String>,
}

/// Checks a key taken from a request body or path.
pub fn validate_key(key: &str) -> Option<String> {
    if key.is_empty() {
        return Some("Key cannot be empty".to_string());
    }
    if key.chars().count() > MAX_KEY_LENGTH {
        return Some(format!(
            "Key exceeds maximum length of {} characters",
            MAX_KEY_LENGTH
        ));
    }
    None
}
