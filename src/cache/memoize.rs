//! Memoization Helper
//!
//! Wraps a function so its results are cached under a key derived from the
//! function identity and the call arguments.

use std::fmt::Debug;

use serde::{de::DeserializeOwned, Serialize};

use crate::cache::{Cache, Codec, JsonCodec, Ttl};
use crate::error::Result;

/// A function whose results are cached in a [`Cache`].
///
/// Multiple arguments are passed as a tuple. Arguments must have a stable
/// `Debug` form: it is part of the cache key, after the identity.
pub struct Memoized<'c, F, C: Codec = JsonCodec> {
    cache: &'c Cache<C>,
    identity: String,
    ttl: Ttl,
    func: F,
}

impl<C: Codec> Cache<C> {
    /// Memoizes `func` under `identity`.
    ///
    /// Two functions memoized under the same identity share cache entries.
    /// For named functions, [`memoize!`](crate::memoize) derives the identity
    /// from the path.
    pub fn memoize<F>(&self, identity: impl Into<String>, ttl: Ttl, func: F) -> Memoized<'_, F, C> {
        Memoized {
            cache: self,
            identity: identity.into(),
            ttl,
            func,
        }
    }
}

impl<F, C: Codec> Memoized<'_, F, C> {
    /// Returns the cached result for `args`, calling the function on a miss.
    ///
    /// A cached `None` or unit result is a hit like any other value.
    pub fn call<A, R>(&self, args: A) -> Result<R>
    where
        F: Fn(A) -> R,
        A: Debug,
        R: Serialize + DeserializeOwned,
    {
        let key = self.key_for(&args);
        if let Some(hit) = self.cache.get::<R>(&key)? {
            return Ok(hit);
        }

        let result = (self.func)(args);
        self.cache.set(&key, &result, self.ttl)?;
        Ok(result)
    }

    /// Cache key used for a call with `args`.
    pub fn key_for<A: Debug>(&self, args: &A) -> String {
        format!("{}-{:?}", self.identity, args)
    }
}

/// Memoizes a named function, identified by the calling module and its path.
///
/// ```no_run
/// use sqlite_cache::{memoize, Cache, CacheConfig, Ttl};
///
/// fn square(x: u64) -> u64 {
///     x * x
/// }
///
/// # fn main() -> sqlite_cache::Result<()> {
/// let cache = Cache::open(CacheConfig::new("cache.db"))?;
/// let memo = memoize!(cache, Ttl::secs(60), square);
/// assert_eq!(memo.call(3)?, 9);
/// # Ok(())
/// # }
/// ```
#[macro_export]
macro_rules! memoize {
    ($cache:expr, $ttl:expr, $func:path) => {
        $cache.memoize(
            concat!(module_path!(), "::", stringify!($func)),
            $ttl,
            $func,
        )
    };
}
