//! Schema and SQL statements of the `cache` relation.
//!
//! `now` is always bound by the caller so every liveness check in one
//! operation agrees on the same instant.

pub const CREATE_TABLE: &str =
    "CREATE TABLE IF NOT EXISTS cache (key TEXT PRIMARY KEY, value BLOB, expiry REAL)";
pub const CREATE_INDEX: &str = "CREATE UNIQUE INDEX IF NOT EXISTS cache_key ON cache(key)";

// The conflict branch only fires when the existing row is dead.
pub const ADD: &str = "INSERT INTO cache (key, value, expiry) VALUES (?1, ?2, ?3) \
     ON CONFLICT(key) DO UPDATE SET value = excluded.value, expiry = excluded.expiry \
     WHERE cache.expiry <> -1.0 AND cache.expiry <= ?4";
pub const SET: &str = "INSERT INTO cache (key, value, expiry) VALUES (?1, ?2, ?3) \
     ON CONFLICT(key) DO UPDATE SET value = excluded.value, expiry = excluded.expiry";

pub const GET: &str = "SELECT value, expiry FROM cache WHERE key = ?1";
pub const EXPIRY: &str = "SELECT expiry FROM cache WHERE key = ?1";
pub const GET_LIVE: &str =
    "SELECT value FROM cache WHERE key = ?1 AND (expiry = -1.0 OR expiry > ?2)";
pub const UPDATE: &str =
    "UPDATE cache SET value = ?2 WHERE key = ?1 AND (expiry = -1.0 OR expiry > ?3)";
pub const TOUCH: &str =
    "UPDATE cache SET expiry = ?2 WHERE key = ?1 AND (expiry = -1.0 OR expiry > ?3)";
pub const DELETE: &str = "DELETE FROM cache WHERE key = ?1";
pub const CLEAR: &str = "DELETE FROM cache";

// Eviction only removes rows still dead at the bound threshold, so a
// concurrent rewrite of the same key survives.
pub const EVICT: &str =
    "DELETE FROM cache WHERE key = ?1 AND expiry <> -1.0 AND expiry <= ?2";

// Key sets are bound as one `rarray` parameter.
pub const GET_MANY: &str = "SELECT key, value, expiry FROM cache WHERE key IN rarray(?1)";
pub const EXPIRY_MANY: &str = "SELECT key, expiry FROM cache WHERE key IN rarray(?1)";
pub const DELETE_MANY: &str = "DELETE FROM cache WHERE key IN rarray(?1)";
pub const EVICT_MANY: &str =
    "DELETE FROM cache WHERE key IN rarray(?1) AND expiry <> -1.0 AND expiry <= ?2";

pub const ALL_KEYS: &str = "SELECT key, expiry FROM cache ORDER BY key ASC";
pub const MATCHING_KEYS: &str =
    "SELECT key, expiry FROM cache WHERE key LIKE ?1 ORDER BY key ASC";
pub const CLEAR_MATCHING: &str = "DELETE FROM cache WHERE key LIKE ?1";

pub const OPTIMIZE: &str = "PRAGMA optimize";
