//! sqlite_cache - A disk-backed key/value cache on SQLite
//!
//! Values are serialized and stored with a per-entry expiry. Expired entries
//! are invisible to reads and removed lazily when a read comes across them.
//!
//! ```no_run
//! use sqlite_cache::{Cache, CacheConfig, Ttl};
//!
//! # fn main() -> sqlite_cache::Result<()> {
//! let cache = Cache::open(CacheConfig::new("/tmp/app/cache.db"))?;
//! cache.set("greeting", "hello", Ttl::secs(60))?;
//! let _greeting: Option<String> = cache.get("greeting")?;
//! # Ok(())
//! # }
//! ```

pub mod api;
pub mod cache;
pub mod config;
pub mod error;
pub mod models;

pub use api::{create_router, AppState};
pub use cache::{Cache, CacheGuard, Codec, Expiry, JsonCodec, Memoized, Ttl};
pub use config::{CacheConfig, Config, Pragmas, TransactionMode};
pub use error::{CacheError, Result};
