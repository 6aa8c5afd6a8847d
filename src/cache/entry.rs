//! Cache Entry Module
//!
//! Expiry model for stored entries: TTL requests, the persisted expiry column,
//! and liveness checks.

use std::time::Duration;

use chrono::Utc;

use crate::cache::{DEFAULT_TTL_SECS, TTL_MISSING, TTL_NO_EXPIRY};

/// Stored `expiry` value meaning "never expires".
pub const NO_EXPIRY: f64 = -1.0;

// == Ttl ==
/// Requested lifetime of an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Ttl {
    /// Expires this many seconds from now
    Seconds(u64),
    /// Kept until removed
    Never,
}

impl Ttl {
    pub fn secs(seconds: u64) -> Self {
        Ttl::Seconds(seconds)
    }

    /// Signed form: negative values mean the entry never expires.
    pub fn from_secs(seconds: i64) -> Self {
        if seconds < 0 {
            Ttl::Never
        } else {
            Ttl::Seconds(seconds as u64)
        }
    }

    /// Expiry of an entry written at `now`.
    pub fn expiry_from(self, now: f64) -> Expiry {
        match self {
            Ttl::Seconds(secs) => Expiry::At(now + secs as f64),
            Ttl::Never => Expiry::Never,
        }
    }

    /// Expiry of an entry written right now.
    pub fn expiry(self) -> Expiry {
        self.expiry_from(now_timestamp())
    }
}

impl Default for Ttl {
    fn default() -> Self {
        Ttl::Seconds(DEFAULT_TTL_SECS)
    }
}

/// Rounds up to whole seconds, so a non-zero duration never yields a dead entry.
impl From<Duration> for Ttl {
    fn from(duration: Duration) -> Self {
        let partial = u64::from(duration.subsec_nanos() > 0);
        Ttl::Seconds(duration.as_secs().saturating_add(partial))
    }
}

// == Expiry ==
/// Persisted expiry of an entry.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Expiry {
    Never,
    /// Unix timestamp in seconds after which the entry is dead
    At(f64),
}

impl Expiry {
    /// Reads the stored column value; the `-1` sentinel is `Never`.
    pub fn from_stored(value: f64) -> Self {
        if value == NO_EXPIRY {
            Expiry::Never
        } else {
            Expiry::At(value)
        }
    }

    /// Column value written to the store.
    pub fn to_stored(self) -> f64 {
        match self {
            Expiry::Never => NO_EXPIRY,
            Expiry::At(ts) => ts,
        }
    }

    /// Live iff the entry never expires or its expiry is strictly after `now`.
    pub fn is_live_at(self, now: f64) -> bool {
        match self {
            Expiry::Never => true,
            Expiry::At(ts) => ts > now,
        }
    }

    pub fn is_live(self) -> bool {
        self.is_live_at(now_timestamp())
    }

    /// Remaining lifetime as reported by `ttl`.
    ///
    /// Whole seconds rounded down, `TTL_NO_EXPIRY` for entries that never
    /// expire, and `TTL_MISSING` once the remainder is zero or less.
    pub fn remaining_at(self, now: f64) -> i64 {
        match self {
            Expiry::Never => TTL_NO_EXPIRY,
            Expiry::At(ts) => {
                let remaining = (ts - now).floor() as i64;
                if remaining <= 0 {
                    TTL_MISSING
                } else {
                    remaining
                }
            }
        }
    }
}

// == Utility Functions ==
/// Returns current Unix timestamp in seconds, with sub-second precision.
pub fn now_timestamp() -> f64 {
    Utc::now().timestamp_micros() as f64 / 1_000_000.0
}
