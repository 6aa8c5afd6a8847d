//! Key Index Operations
//!
//! Key enumeration and pattern-based lookup and removal.
//!
//! Patterns follow SQLite's `LIKE`: `%` matches any run of characters, `_`
//! matches exactly one, and only ASCII letters compare case-insensitively
//! (`'A'` matches `'a'`, `'Ä'` does not match `'ä'`). There is no escape
//! character, so a literal `%` or `_` cannot be searched for.

use rusqlite::{params, Connection, Row};

use crate::cache::batch::evict_keys;
use crate::cache::entry::{now_timestamp, Expiry};
use crate::cache::{schema, Cache, Codec};
use crate::error::Result;

impl<C: Codec> Cache<C> {
    // == Get All Keys ==
    /// All live keys in ascending order. Dead entries seen are deleted.
    pub fn get_all_keys(&self) -> Result<Vec<String>> {
        self.connections.with_connection(|conn| {
            let rows = {
                let mut stmt = conn.prepare_cached(schema::ALL_KEYS)?;
                let rows = stmt
                    .query_map([], key_and_expiry)?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                rows
            };
            split_live(conn, rows)
        })
    }

    // == Find Matching Keys ==
    /// Live keys matching a `LIKE` pattern, in ascending order.
    pub fn find_matching_keys(&self, pattern: &str) -> Result<Vec<String>> {
        self.connections.with_connection(|conn| {
            let rows = {
                let mut stmt = conn.prepare_cached(schema::MATCHING_KEYS)?;
                let rows = stmt
                    .query_map(params![pattern], key_and_expiry)?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                rows
            };
            split_live(conn, rows)
        })
    }

    pub fn find_keys_starting_with(&self, prefix: &str) -> Result<Vec<String>> {
        self.find_matching_keys(&format!("{}%", prefix))
    }

    pub fn find_keys_ending_with(&self, suffix: &str) -> Result<Vec<String>> {
        self.find_matching_keys(&format!("%{}", suffix))
    }

    pub fn find_keys_containing(&self, fragment: &str) -> Result<Vec<String>> {
        self.find_matching_keys(&format!("%{}%", fragment))
    }

    // == Clear Matching Keys ==
    /// Deletes every key matching a `LIKE` pattern, live or dead.
    ///
    /// Returns the number of rows removed. An empty pattern only matches the
    /// empty key.
    pub fn clear_matching_keys(&self, pattern: &str) -> Result<usize> {
        self.connections
            .with_connection(|conn| Ok(conn.execute(schema::CLEAR_MATCHING, params![pattern])?))
    }

    pub fn clear_keys_starting_with(&self, prefix: &str) -> Result<usize> {
        self.clear_matching_keys(&format!("{}%", prefix))
    }

    pub fn clear_keys_ending_with(&self, suffix: &str) -> Result<usize> {
        self.clear_matching_keys(&format!("%{}", suffix))
    }

    pub fn clear_keys_containing(&self, fragment: &str) -> Result<usize> {
        self.clear_matching_keys(&format!("%{}%", fragment))
    }
}

fn key_and_expiry(row: &Row<'_>) -> rusqlite::Result<(String, f64)> {
    Ok((row.get(0)?, row.get(1)?))
}

/// Keeps live keys in scan order and evicts the dead ones in one statement.
fn split_live(conn: &Connection, rows: Vec<(String, f64)>) -> Result<Vec<String>> {
    let now = now_timestamp();
    let (live, dead): (Vec<_>, Vec<_>) = rows
        .into_iter()
        .partition(|(_, expiry)| Expiry::from_stored(*expiry).is_live_at(now));

    let dead: Vec<String> = dead.into_iter().map(|(key, _)| key).collect();
    evict_keys(conn, &dead, now)?;

    Ok(live.into_iter().map(|(key, _)| key).collect())
}
