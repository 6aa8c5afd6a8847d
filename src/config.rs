//! Configuration Module
//!
//! Handles loading and managing cache and server configuration from environment variables.

use std::collections::BTreeMap;
use std::env;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use rusqlite::TransactionBehavior;

use crate::cache::DEFAULT_TTL_SECS;

/// Server configuration parameters.
///
/// All values can be configured via environment variables with sensible defaults.
#[derive(Debug, Clone)]
pub struct Config {
    /// Cache storage configuration
    pub cache: CacheConfig,
    /// HTTP server port
    pub server_port: u16,
}

impl Config {
    /// Creates a new Config by loading values from environment variables.
    ///
    /// # Environment Variables
    /// - `SERVER_PORT` - HTTP server port (default: 3000)
    /// - everything read by [`CacheConfig::from_env`]
    pub fn from_env() -> Self {
        Self {
            cache: CacheConfig::from_env(),
            server_port: env_or("SERVER_PORT", 3000),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            cache: CacheConfig::default(),
            server_port: 3000,
        }
    }
}

// == Cache Config ==
/// Storage location, locking and tuning for one cache database.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Database file name
    pub filename: String,
    /// Directory holding the database, current directory if None
    pub path: Option<PathBuf>,
    /// Keep the database in shared process memory instead of on disk
    pub in_memory: bool,
    /// How long a connection waits on a locked database
    pub timeout: Duration,
    /// Default TTL in seconds used by callers that do not pick one
    pub default_ttl: u64,
    /// Locking behavior of batch transactions
    pub transaction_mode: TransactionMode,
    /// Engine tuning applied once per connection
    pub pragmas: Pragmas,
}

impl CacheConfig {
    /// Creates a config for the database file at `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let filename = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| ".cache".to_string());
        let dir = path
            .parent()
            .filter(|parent| !parent.as_os_str().is_empty())
            .map(PathBuf::from);

        Self {
            filename,
            path: dir,
            ..Self::default()
        }
    }

    /// Creates a config for a named database held in shared process memory.
    pub fn in_memory(name: impl Into<String>) -> Self {
        Self {
            filename: name.into(),
            in_memory: true,
            ..Self::default()
        }
    }

    /// Loads the cache configuration from environment variables.
    ///
    /// # Environment Variables
    /// - `CACHE_FILENAME` - Database file name (default: .cache)
    /// - `CACHE_PATH` - Directory of the database (default: current directory)
    /// - `CACHE_IN_MEMORY` - Use a shared in-memory database (default: false)
    /// - `CACHE_TIMEOUT` - Lock wait in seconds (default: 5)
    /// - `CACHE_DEFAULT_TTL` - Default TTL in seconds (default: 300)
    /// - `CACHE_SYNCHRONOUS` - `synchronous` pragma (default: off)
    /// - `CACHE_JOURNAL_MODE` - `journal_mode` pragma (default: wal)
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let pragmas = Pragmas {
            synchronous: env_or("CACHE_SYNCHRONOUS", defaults.pragmas.synchronous),
            journal_mode: env_or("CACHE_JOURNAL_MODE", defaults.pragmas.journal_mode),
            ..defaults.pragmas
        };

        Self {
            filename: env::var("CACHE_FILENAME").unwrap_or(defaults.filename),
            path: env::var("CACHE_PATH").ok().map(PathBuf::from),
            in_memory: env_or("CACHE_IN_MEMORY", defaults.in_memory),
            timeout: Duration::from_secs(env_or("CACHE_TIMEOUT", 5)),
            default_ttl: env_or("CACHE_DEFAULT_TTL", defaults.default_ttl),
            transaction_mode: defaults.transaction_mode,
            pragmas,
        }
    }

    /// Full path of the database file.
    pub fn database_path(&self) -> PathBuf {
        match &self.path {
            Some(dir) => dir.join(&self.filename),
            None => PathBuf::from(&self.filename),
        }
    }

    /// Connection string handed to the engine.
    ///
    /// In-memory databases use a named shared-cache URI so every thread of the
    /// process sees the same data.
    pub fn connection_string(&self) -> String {
        let path = self.database_path().to_string_lossy().into_owned();
        if self.in_memory {
            format!("file:{}?mode=memory&cache=shared", uri_escape(&path))
        } else {
            path
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_pragmas(mut self, pragmas: Pragmas) -> Self {
        self.pragmas = pragmas;
        self
    }

    pub fn with_transaction_mode(mut self, mode: TransactionMode) -> Self {
        self.transaction_mode = mode;
        self
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            filename: ".cache".to_string(),
            path: None,
            in_memory: false,
            timeout: Duration::from_secs(5),
            default_ttl: DEFAULT_TTL_SECS,
            transaction_mode: TransactionMode::Immediate,
            pragmas: Pragmas::default(),
        }
    }
}

fn env_or<T: FromStr>(name: &str, default: T) -> T {
    env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn uri_escape(path: &str) -> String {
    let mut escaped = String::with_capacity(path.len());
    for c in path.chars() {
        match c {
            '%' => escaped.push_str("%25"),
            '?' => escaped.push_str("%3f"),
            '#' => escaped.push_str("%23"),
            _ => escaped.push(c),
        }
    }
    escaped
}

// == Transaction Mode ==
/// Lock acquisition behavior for multi-statement transactions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionMode {
    Deferred,
    Immediate,
    Exclusive,
}

impl From<TransactionMode> for TransactionBehavior {
    fn from(mode: TransactionMode) -> Self {
        match mode {
            TransactionMode::Deferred => TransactionBehavior::Deferred,
            TransactionMode::Immediate => TransactionBehavior::Immediate,
            TransactionMode::Exclusive => TransactionBehavior::Exclusive,
        }
    }
}

// == Pragmas ==
/// Engine tuning parameters, applied once when a connection is created.
///
/// Defaults favor write throughput over crash durability.
#[derive(Debug, Clone, PartialEq)]
pub struct Pragmas {
    pub mmap_size: u64,
    pub cache_size: i64,
    pub wal_autocheckpoint: u32,
    pub auto_vacuum: AutoVacuum,
    pub synchronous: Synchronous,
    pub journal_mode: JournalMode,
    pub temp_store: TempStore,
    /// Any other pragma, as `name -> value`
    pub extra: BTreeMap<String, String>,
}

impl Pragmas {
    /// Pragmas as `(name, value)` pairs in application order.
    ///
    /// `auto_vacuum` comes first since it only takes effect before the schema exists.
    pub fn to_pairs(&self) -> Vec<(String, String)> {
        let mut pairs = vec![
            ("auto_vacuum".to_string(), self.auto_vacuum.to_string()),
            ("mmap_size".to_string(), self.mmap_size.to_string()),
            ("cache_size".to_string(), self.cache_size.to_string()),
            (
                "wal_autocheckpoint".to_string(),
                self.wal_autocheckpoint.to_string(),
            ),
            ("synchronous".to_string(), self.synchronous.to_string()),
            ("journal_mode".to_string(), self.journal_mode.to_string()),
            ("temp_store".to_string(), self.temp_store.to_string()),
        ];
        pairs.extend(self.extra.iter().map(|(k, v)| (k.clone(), v.clone())));
        pairs
    }
}

impl Default for Pragmas {
    fn default() -> Self {
        Self {
            mmap_size: 1 << 26,
            cache_size: 8192,
            wal_autocheckpoint: 1000,
            auto_vacuum: AutoVacuum::None,
            synchronous: Synchronous::Off,
            journal_mode: JournalMode::Wal,
            temp_store: TempStore::Memory,
            extra: BTreeMap::new(),
        }
    }
}

/// Declares a pragma keyword enum with its textual form.
macro_rules! pragma_enum {
    ($(#[$meta:meta])* $name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq)]
        pub enum $name {
            $($variant),+
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                let text = match self {
                    $($name::$variant => $text),+
                };
                f.write_str(text)
            }
        }

        impl FromStr for $name {
            type Err = String;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s.to_ascii_lowercase().as_str() {
                    $($text => Ok($name::$variant),)+
                    other => Err(format!(
                        "unknown {} value: {}",
                        stringify!($name),
                        other
                    )),
                }
            }
        }
    };
}

pragma_enum!(
    /// `PRAGMA auto_vacuum`
    AutoVacuum { None => "none", Full => "full", Incremental => "incremental" }
);
pragma_enum!(
    /// `PRAGMA synchronous`
    Synchronous { Off => "off", Normal => "normal", Full => "full", Extra => "extra" }
);
pragma_enum!(
    /// `PRAGMA journal_mode`
    JournalMode {
        Delete => "delete",
        Truncate => "truncate",
        Persist => "persist",
        Memory => "memory",
        Wal => "wal",
        Off => "off",
    }
);
pragma_enum!(
    /// `PRAGMA temp_store`
    TempStore { Default => "default", File => "file", Memory => "memory" }
);
