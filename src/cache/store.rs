//! Cache Store Module
//!
//! The entry store: schema setup, single-key operations, and TTL introspection.

use std::fs;
use std::ops::Deref;

use rusqlite::{params, Connection, OptionalExtension};
use serde::{de::DeserializeOwned, Serialize};
use tracing::{debug, info};

use crate::cache::connection::{ConnectionManager, Lease};
use crate::cache::entry::{now_timestamp, Expiry, Ttl};
use crate::cache::{schema, Codec, JsonCodec, TTL_MISSING};
use crate::config::CacheConfig;
use crate::error::{CacheError, Result};

// == Cache ==
/// Disk-backed key/value cache with per-entry TTL.
///
/// Share it between threads through `Arc<Cache>`; each thread works on its own
/// connection. Values go through the codec `C`, JSON by default.
pub struct Cache<C: Codec = JsonCodec> {
    pub(super) connections: ConnectionManager,
    pub(super) codec: C,
}

impl Cache<JsonCodec> {
    /// Opens (creating if needed) the cache described by `config`.
    pub fn open(config: CacheConfig) -> Result<Self> {
        Self::with_codec(config, JsonCodec)
    }
}

impl<C: Codec> Cache<C> {
    // == Constructor ==
    /// Opens the cache with a custom value codec.
    ///
    /// Creates the database directory, the `cache` table and its key index.
    pub fn with_codec(config: CacheConfig, codec: C) -> Result<Self> {
        if !config.in_memory {
            if let Some(dir) = &config.path {
                fs::create_dir_all(dir).map_err(|e| {
                    CacheError::connection(format!(
                        "Failed to create cache directory {}: {}",
                        dir.display(),
                        e
                    ))
                })?;
            }
        }

        let target = config.connection_string();
        let cache = Self {
            connections: ConnectionManager::new(config),
            codec,
        };

        cache.connections.with_connection(|conn| {
            conn.execute(schema::CREATE_TABLE, [])?;
            conn.execute(schema::CREATE_INDEX, [])?;
            Ok(())
        })?;

        info!("Cache opened at {}", target);
        Ok(cache)
    }

    pub fn config(&self) -> &CacheConfig {
        self.connections.config()
    }

    pub fn connections(&self) -> &ConnectionManager {
        &self.connections
    }

    /// TTL configured as the default for this cache.
    pub fn default_ttl(&self) -> Ttl {
        Ttl::secs(self.config().default_ttl)
    }

    // == Scoped Use ==
    /// Takes a lease on this thread's connection for the lifetime of the guard.
    pub fn acquire(&self) -> Result<CacheGuard<'_, C>> {
        let lease = self.connections.acquire()?;
        Ok(CacheGuard {
            cache: self,
            _lease: lease,
        })
    }

    /// Optimizes and closes the current thread's connection.
    pub fn close(&self) -> Result<()> {
        self.connections.close()
    }

    // == Add ==
    /// Stores the value only if the key is absent or its entry is dead.
    ///
    /// Returns whether the value was stored. Runs as a single upsert, so two
    /// racing `add` calls cannot both win.
    pub fn add<T: Serialize + ?Sized>(&self, key: &str, value: &T, ttl: Ttl) -> Result<bool> {
        let bytes = self.codec.encode(value)?;
        let now = now_timestamp();
        let expiry = ttl.expiry_from(now).to_stored();

        let changed = self.connections.with_connection(|conn| {
            Ok(conn.execute(schema::ADD, params![key, bytes, expiry, now])?)
        })?;
        Ok(changed > 0)
    }

    // == Set ==
    /// Stores the value unconditionally, replacing any entry live or dead.
    pub fn set<T: Serialize + ?Sized>(&self, key: &str, value: &T, ttl: Ttl) -> Result<()> {
        let bytes = self.codec.encode(value)?;
        let expiry = ttl.expiry().to_stored();

        self.connections.with_connection(|conn| {
            conn.execute(schema::SET, params![key, bytes, expiry])?;
            Ok(())
        })
    }

    // == Get ==
    /// Returns the live value under `key`.
    ///
    /// A dead entry is deleted as a side effect and reported as `None`.
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        let bytes = self
            .connections
            .with_connection(|conn| read_live(conn, key, now_timestamp()))?;
        bytes.map(|b| self.codec.decode(&b)).transpose()
    }

    /// Returns the live value under `key`, or `default`.
    pub fn get_or<T: DeserializeOwned>(&self, key: &str, default: T) -> Result<T> {
        Ok(self.get(key)?.unwrap_or(default))
    }

    /// Indexed access: fails with `KeyNotFound` when the key is absent or dead.
    pub fn fetch<T: DeserializeOwned>(&self, key: &str) -> Result<T> {
        self.get(key)?
            .ok_or_else(|| CacheError::KeyNotFound(key.to_string()))
    }

    /// Whether a live entry exists under `key`. Never evicts.
    pub fn contains(&self, key: &str) -> Result<bool> {
        let now = now_timestamp();
        self.connections.with_connection(|conn| {
            let found = conn
                .query_row(schema::GET_LIVE, params![key, now], |_| Ok(()))
                .optional()?;
            Ok(found.is_some())
        })
    }

    // == Update ==
    /// Replaces the value of a live entry, keeping its expiry.
    ///
    /// Returns false (and changes nothing) if the key is absent or dead.
    pub fn update<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<bool> {
        let bytes = self.codec.encode(value)?;
        let now = now_timestamp();

        let changed = self.connections.with_connection(|conn| {
            Ok(conn.execute(schema::UPDATE, params![key, bytes, now])?)
        })?;
        Ok(changed > 0)
    }

    // == Touch ==
    /// Gives a live entry a new expiry. No-op on absent or dead entries.
    pub fn touch(&self, key: &str, ttl: Ttl) -> Result<bool> {
        let now = now_timestamp();
        let expiry = ttl.expiry_from(now).to_stored();

        let changed = self.connections.with_connection(|conn| {
            Ok(conn.execute(schema::TOUCH, params![key, expiry, now])?)
        })?;
        Ok(changed > 0)
    }

    // == Delete ==
    /// Removes the entry under `key`. Returns whether a row was removed.
    pub fn delete(&self, key: &str) -> Result<bool> {
        let changed = self
            .connections
            .with_connection(|conn| Ok(conn.execute(schema::DELETE, params![key])?))?;
        Ok(changed > 0)
    }

    // == Get Or Set ==
    /// Returns the live value under `key`, or stores `default` with `ttl` and returns it.
    pub fn get_or_set<T>(&self, key: &str, default: T, ttl: Ttl) -> Result<T>
    where
        T: Serialize + DeserializeOwned,
    {
        self.connections.with_connection(|conn| {
            let now = now_timestamp();
            if let Some(bytes) = read_live(conn, key, now)? {
                return self.codec.decode(&bytes);
            }

            let bytes = self.codec.encode(&default)?;
            let expiry = ttl.expiry_from(now).to_stored();
            conn.execute(schema::SET, params![key, bytes, expiry])?;
            Ok(default)
        })
    }

    // == Clear ==
    /// Removes every entry. Returns the number of rows removed.
    pub fn clear(&self) -> Result<usize> {
        self.connections
            .with_connection(|conn| Ok(conn.execute(schema::CLEAR, [])?))
    }

    // == Counters ==
    /// Adds `delta` to an integer value and returns the new value.
    ///
    /// Not atomic: the read and the write-back are separate statements, so a
    /// concurrent writer may interleave between them.
    pub fn incr(&self, key: &str, delta: i64) -> Result<i64> {
        self.adjust(key, |current| current.checked_add(delta))
    }

    /// Subtracts `delta` from an integer value and returns the new value.
    ///
    /// Not atomic, see [`Cache::incr`].
    pub fn decr(&self, key: &str, delta: i64) -> Result<i64> {
        self.adjust(key, |current| current.checked_sub(delta))
    }

    fn adjust(&self, key: &str, op: impl FnOnce(i64) -> Option<i64>) -> Result<i64> {
        let now = now_timestamp();
        let bytes: Option<Vec<u8>> = self.connections.with_connection(|conn| {
            Ok(conn
                .query_row(schema::GET_LIVE, params![key, now], |row| row.get(0))
                .optional()?)
        })?;

        let bytes = bytes.ok_or_else(|| {
            CacheError::InvalidOperation("Nonexistent or expired cache key.".to_string())
        })?;
        let current: i64 = self
            .codec
            .decode(&bytes)
            .map_err(|_| CacheError::InvalidOperation("Value is not a number.".to_string()))?;
        let next = op(current)
            .ok_or_else(|| CacheError::InvalidOperation("Value out of range.".to_string()))?;

        self.update(key, &next)?;
        Ok(next)
    }

    // == Time To Live ==
    /// Remaining lifetime of `key` in whole seconds.
    ///
    /// Returns `TTL_NO_EXPIRY` (-1) for entries that never expire and
    /// `TTL_MISSING` (-2) for absent entries. An entry with no whole second
    /// left counts as expired and is evicted.
    pub fn ttl(&self, key: &str) -> Result<i64> {
        self.connections.with_connection(|conn| {
            let now = now_timestamp();
            let stored: Option<f64> = conn
                .query_row(schema::EXPIRY, params![key], |row| row.get(0))
                .optional()?;

            let Some(stored) = stored else {
                return Ok(TTL_MISSING);
            };

            let remaining = Expiry::from_stored(stored).remaining_at(now);
            if remaining == TTL_MISSING {
                conn.execute(schema::EVICT, params![key, now + 1.0])?;
                debug!("Evicted expired key {}", key);
            }
            Ok(remaining)
        })
    }
}

/// Reads the value under `key` if it is live at `now`, evicting it if dead.
fn read_live(conn: &Connection, key: &str, now: f64) -> Result<Option<Vec<u8>>> {
    let row: Option<(Vec<u8>, f64)> = conn
        .query_row(schema::GET, params![key], |row| Ok((row.get(0)?, row.get(1)?)))
        .optional()?;

    match row {
        Some((value, expiry)) if Expiry::from_stored(expiry).is_live_at(now) => Ok(Some(value)),
        Some(_) => {
            conn.execute(schema::EVICT, params![key, now])?;
            debug!("Evicted expired key {}", key);
            Ok(None)
        }
        None => Ok(None),
    }
}

// == Cache Guard ==
/// Scoped use of a cache: keeps this thread's connection open until dropped.
pub struct CacheGuard<'a, C: Codec = JsonCodec> {
    cache: &'a Cache<C>,
    _lease: Lease<'a>,
}

impl<C: Codec> Deref for CacheGuard<'_, C> {
    type Target = Cache<C>;

    fn deref(&self) -> &Self::Target {
        self.cache
    }
}
