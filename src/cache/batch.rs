//! Batch Operations
//!
//! Multi-key versions of the entry store operations. Value batches run one
//! prepared statement per row inside a single transaction; key sets are bound
//! as one `rarray` parameter.

use std::collections::HashMap;
use std::rc::Rc;

use rusqlite::types::Value;
use rusqlite::vtab::array::Array;
use rusqlite::{params, Connection, TransactionBehavior};
use serde::{de::DeserializeOwned, Serialize};
use tracing::debug;

use crate::cache::entry::{now_timestamp, Expiry, Ttl};
use crate::cache::{schema, Cache, Codec, TTL_MISSING};
use crate::error::Result;

impl<C: Codec> Cache<C> {
    // == Add Many ==
    /// `add` for every pair, all with the same TTL, in one transaction.
    ///
    /// Returns how many entries were stored.
    pub fn add_many<I, K, V>(&self, entries: I, ttl: Ttl) -> Result<usize>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Serialize,
    {
        let rows = self.encode_entries(entries)?;
        if rows.is_empty() {
            return Ok(0);
        }

        let now = now_timestamp();
        let expiry = ttl.expiry_from(now).to_stored();
        self.in_transaction(|conn| {
            let mut stmt = conn.prepare_cached(schema::ADD)?;
            let mut stored = 0;
            for (key, bytes) in &rows {
                stored += stmt.execute(params![key, bytes, expiry, now])?;
            }
            Ok(stored)
        })
    }

    // == Set Many ==
    /// `set` for every pair, all with the same TTL, in one transaction.
    pub fn set_many<I, K, V>(&self, entries: I, ttl: Ttl) -> Result<()>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Serialize,
    {
        let rows = self.encode_entries(entries)?;
        if rows.is_empty() {
            return Ok(());
        }

        let expiry = ttl.expiry().to_stored();
        self.in_transaction(|conn| {
            let mut stmt = conn.prepare_cached(schema::SET)?;
            for (key, bytes) in &rows {
                stmt.execute(params![key, bytes, expiry])?;
            }
            Ok(())
        })
    }

    // == Get Many ==
    /// Live values for the given keys; absent and dead keys are left out.
    ///
    /// Dead entries found along the way are deleted in one statement.
    pub fn get_many<K, T>(&self, keys: &[K]) -> Result<HashMap<String, T>>
    where
        K: AsRef<str>,
        T: DeserializeOwned,
    {
        if keys.is_empty() {
            return Ok(HashMap::new());
        }

        let live = self.connections.with_connection(|conn| {
            let now = now_timestamp();
            let rows: Vec<(String, Vec<u8>, f64)> = {
                let mut stmt = conn.prepare_cached(schema::GET_MANY)?;
                let rows = stmt
                    .query_map(params![key_array(keys)], |row| {
                        Ok((row.get(0)?, row.get(1)?, row.get(2)?))
                    })?
                    .collect::<rusqlite::Result<_>>()?;
                rows
            };

            let mut live = Vec::with_capacity(rows.len());
            let mut dead = Vec::new();
            for (key, value, expiry) in rows {
                if Expiry::from_stored(expiry).is_live_at(now) {
                    live.push((key, value));
                } else {
                    dead.push(key);
                }
            }

            evict_keys(conn, &dead, now)?;
            Ok(live)
        })?;

        live.into_iter()
            .map(|(key, bytes)| self.codec.decode(&bytes).map(|value| (key, value)))
            .collect()
    }

    // == Update Many ==
    /// `update` for every pair in one transaction. Returns how many changed.
    pub fn update_many<I, K, V>(&self, entries: I) -> Result<usize>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Serialize,
    {
        let rows = self.encode_entries(entries)?;
        if rows.is_empty() {
            return Ok(0);
        }

        let now = now_timestamp();
        self.in_transaction(|conn| {
            let mut stmt = conn.prepare_cached(schema::UPDATE)?;
            let mut changed = 0;
            for (key, bytes) in &rows {
                changed += stmt.execute(params![key, bytes, now])?;
            }
            Ok(changed)
        })
    }

    // == Touch Many ==
    /// `touch` for every key in one transaction. Returns how many changed.
    pub fn touch_many<K: AsRef<str>>(&self, keys: &[K], ttl: Ttl) -> Result<usize> {
        if keys.is_empty() {
            return Ok(0);
        }

        let now = now_timestamp();
        let expiry = ttl.expiry_from(now).to_stored();
        self.in_transaction(|conn| {
            let mut stmt = conn.prepare_cached(schema::TOUCH)?;
            let mut changed = 0;
            for key in keys {
                changed += stmt.execute(params![key.as_ref(), expiry, now])?;
            }
            Ok(changed)
        })
    }

    // == Delete Many ==
    /// Removes all given keys in one statement. Returns how many rows went.
    pub fn delete_many<K: AsRef<str>>(&self, keys: &[K]) -> Result<usize> {
        if keys.is_empty() {
            return Ok(0);
        }

        self.connections.with_connection(|conn| {
            Ok(conn.execute(schema::DELETE_MANY, params![key_array(keys)])?)
        })
    }

    // == Ttl Many ==
    /// `ttl` for every key in one select, evicting expired keys in one delete.
    pub fn ttl_many<K: AsRef<str>>(&self, keys: &[K]) -> Result<HashMap<String, i64>> {
        if keys.is_empty() {
            return Ok(HashMap::new());
        }

        self.connections.with_connection(|conn| {
            let now = now_timestamp();
            let stored: HashMap<String, f64> = {
                let mut stmt = conn.prepare_cached(schema::EXPIRY_MANY)?;
                let rows = stmt
                    .query_map(params![key_array(keys)], |row| Ok((row.get(0)?, row.get(1)?)))?
                    .collect::<rusqlite::Result<_>>()?;
                rows
            };

            let mut results = HashMap::with_capacity(keys.len());
            let mut expired = Vec::new();
            for key in keys {
                let key = key.as_ref();
                let remaining = match stored.get(key) {
                    None => TTL_MISSING,
                    Some(&expiry) => {
                        let remaining = Expiry::from_stored(expiry).remaining_at(now);
                        if remaining == TTL_MISSING {
                            expired.push(key.to_string());
                        }
                        remaining
                    }
                };
                results.insert(key.to_string(), remaining);
            }

            evict_keys(conn, &expired, now + 1.0)?;
            Ok(results)
        })
    }

    /// Encodes every value before any statement runs.
    fn encode_entries<I, K, V>(&self, entries: I) -> Result<Vec<(String, Vec<u8>)>>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Serialize,
    {
        entries
            .into_iter()
            .map(|(key, value)| {
                self.codec
                    .encode(&value)
                    .map(|bytes| (key.as_ref().to_string(), bytes))
            })
            .collect()
    }

    /// Runs `f` inside one transaction on this thread's connection.
    fn in_transaction<R>(&self, f: impl FnOnce(&Connection) -> Result<R>) -> Result<R> {
        let behavior: TransactionBehavior = self.config().transaction_mode.into();
        self.connections.with_connection(|conn| {
            let tx = conn.transaction_with_behavior(behavior)?;
            let result = f(&tx)?;
            tx.commit()?;
            Ok(result)
        })
    }
}

/// Binds a key set as a single `rarray` parameter.
pub(super) fn key_array<K: AsRef<str>>(keys: &[K]) -> Array {
    Rc::new(
        keys.iter()
            .map(|key| Value::Text(key.as_ref().to_string()))
            .collect(),
    )
}

/// Deletes the given keys if they are still dead at `threshold`.
pub(super) fn evict_keys(conn: &Connection, keys: &[String], threshold: f64) -> Result<usize> {
    if keys.is_empty() {
        return Ok(0);
    }

    let removed = conn.execute(schema::EVICT_MANY, params![key_array(keys), threshold])?;
    debug!("Evicted {} expired keys", removed);
    Ok(removed)
}
