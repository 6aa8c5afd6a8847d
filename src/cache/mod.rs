//! Cache Module
//!
//! Disk-backed key/value storage with per-entry TTL, built on SQLite.

mod batch;
mod codec;
mod connection;
mod entry;
mod keys;
mod memoize;
mod schema;
mod store;


// Re-export public types
pub use codec::{Codec, JsonCodec};
pub use connection::{ConnectionManager, Lease};
pub use entry::{now_timestamp, Expiry, Ttl, NO_EXPIRY};
pub use memoize::Memoized;
pub use store::{Cache, CacheGuard};

// == Public Constants ==
/// TTL in seconds used when the caller does not choose one
pub const DEFAULT_TTL_SECS: u64 = 300;

/// `ttl` result for an entry that never expires
pub const TTL_NO_EXPIRY: i64 = -1;

/// `ttl` result for an absent or expired entry
pub const TTL_MISSING: i64 = -2;
