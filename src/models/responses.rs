//! Response DTOs for the cache server API
//!
//! Defines the structure of outgoing HTTP response bodies.

use serde::Serialize;
use serde_json::Value;

/// Response body for GET /get/:key
#[derive(Debug, Clone, Serialize)]
pub struct GetResponse {
    /// The requested key
    pub key: String,
    /// The stored value
    pub value: Value,
}

impl GetResponse {
    /// Creates a new GetResponse
    pub fn new(key: impl Into<String>, value: Value) -> Self {
        Self {
            key: key.into(),
            value,
        }
    }
}

/// Response body for PUT /set
#[derive(Debug, Clone, Serialize)]
pub struct SetResponse {
    /// Success message
    pub message: String,
    /// The key that was set
    pub key: String,
}

impl SetResponse {
    /// Creates a new SetResponse
    pub fn new(key: impl Into<String>) -> Self {
        let key = key.into();
        Self {
            message: format!("Key '{}' set successfully", key),
            key,
        }
    }
}

/// Response body for PUT /add
#[derive(Debug, Clone, Serialize)]
pub struct AddResponse {
    pub key: String,
    /// False when a live entry already held the key
    pub stored: bool,
}

impl AddResponse {
    pub fn new(key: impl Into<String>, stored: bool) -> Self {
        Self {
            key: key.into(),
            stored,
        }
    }
}

/// Response body for DELETE /del/:key
#[derive(Debug, Clone, Serialize)]
pub struct DeleteResponse {
    /// Result message
    pub message: String,
    /// The key that was targeted
    pub key: String,
    /// Whether a row was removed
    pub deleted: bool,
}

impl DeleteResponse {
    /// Creates a new DeleteResponse
    pub fn new(key: impl Into<String>, deleted: bool) -> Self {
        let key = key.into();
        let message = if deleted {
            format!("Key '{}' deleted successfully", key)
        } else {
            format!("Key '{}' was not present", key)
        };
        Self {
            message,
            key,
            deleted,
        }
    }
}

/// Response body for GET /ttl/:key
///
/// `ttl` is the whole seconds left, `-1` for no expiry, `-2` when the key
/// is absent or expired.
#[derive(Debug, Clone, Serialize)]
pub struct TtlResponse {
    pub key: String,
    pub ttl: i64,
}

impl TtlResponse {
    pub fn new(key: impl Into<String>, ttl: i64) -> Self {
        Self {
            key: key.into(),
            ttl,
        }
    }
}

/// Response body for POST /incr/:key and POST /decr/:key
#[derive(Debug, Clone, Serialize)]
pub struct CounterResponse {
    pub key: String,
    /// Counter value after the adjustment
    pub value: i64,
}

impl CounterResponse {
    pub fn new(key: impl Into<String>, value: i64) -> Self {
        Self {
            key: key.into(),
            value,
        }
    }
}

/// Response body for GET /keys
#[derive(Debug, Clone, Serialize)]
pub struct KeysResponse {
    pub keys: Vec<String>,
    pub count: usize,
}

impl KeysResponse {
    pub fn new(keys: Vec<String>) -> Self {
        Self {
            count: keys.len(),
            keys,
        }
    }
}

/// Response body for DELETE /keys
#[derive(Debug, Clone, Serialize)]
pub struct ClearResponse {
    /// Number of rows removed
    pub removed: usize,
}

impl ClearResponse {
    pub fn new(removed: usize) -> Self {
        Self { removed }
    }
}

/// Response body for GET /health
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Health status
    pub status: String,
    /// Current timestamp in ISO 8601 format
    pub timestamp: String,
}

impl HealthResponse {
    /// Creates a new HealthResponse with current timestamp
    pub fn healthy() -> Self {
        Self {
            status: "healthy".to_string(),
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_get_response_serialize() {
        let resp = GetResponse::new("test_key", json!({"n": 1}));
        let json = serde_json::to_value(&resp).unwrap();
        assert_eq!(json, json!({"key": "test_key", "value": {"n": 1}}));
    }

    #[test]
    fn test_set_response_serialize() {
        let resp = SetResponse::new("my_key");
        let json = serde_json::to_string(&resp).unwrap();
        assert!(json.contains("my_key"));
        assert!(json.contains("successfully"));
    }

    #[test]
    fn test_delete_response_message() {
        assert!(DeleteResponse::new("k", true).message.contains("deleted"));
        assert!(DeleteResponse::new("k", false).message.contains("not present"));
    }

    #[test]
    fn test_keys_response_count() {
        let resp = KeysResponse::new(vec!["a".to_string(), "b".to_string()]);
        assert_eq!(resp.count, 2);
    }

    #[test]
    fn test_health_response_serialize() {
        let resp = HealthResponse::healthy();
        let json = serde_json::to_string(&resp).unwrap();
        assert!(json.contains("healthy"));
        assert!(json.contains("timestamp"));
    }
}
