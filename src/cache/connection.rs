//! Connection Manager
//!
//! Owns one SQLite connection per calling thread. Connections are opened and
//! tuned lazily, counted by leases, and closed exactly once: on the last
//! lease, on `close`, when the thread exits, or when the manager is dropped.

use std::cell::RefCell;
use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::thread::{self, ThreadId};

use rusqlite::{Connection, OpenFlags};
use tracing::{debug, warn};

use crate::cache::schema;
use crate::config::CacheConfig;
use crate::error::{CacheError, Result};

type Handle = Arc<Mutex<Connection>>;
type Registry = Mutex<HashMap<ThreadId, Slot>>;

static NEXT_MANAGER_ID: AtomicU64 = AtomicU64::new(0);

thread_local! {
    /// Exit hooks of the current thread, keyed by manager id.
    static EXIT_HOOKS: RefCell<HashMap<u64, ExitHook>> = RefCell::new(HashMap::new());
}

/// Registry entry for one thread.
struct Slot {
    conn: Handle,
    /// Outstanding leases held by the thread
    open_count: usize,
}

// == Connection Manager ==
/// Registry mapping thread identity to that thread's connection and open-count.
///
/// A handle is only ever used by the thread that created it. The registry
/// lock is never held while a statement runs.
pub struct ConnectionManager {
    id: u64,
    config: CacheConfig,
    slots: Arc<Registry>,
}

impl ConnectionManager {
    pub fn new(config: CacheConfig) -> Self {
        Self {
            id: NEXT_MANAGER_ID.fetch_add(1, Ordering::Relaxed),
            config,
            slots: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    // == With Connection ==
    /// Runs `f` on the current thread's connection, opening it on first use.
    ///
    /// Does not change the thread's open-count. Must not be nested on one thread.
    pub fn with_connection<R>(&self, f: impl FnOnce(&mut Connection) -> Result<R>) -> Result<R> {
        let handle = self.handle()?;
        let mut conn = handle.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut conn)
    }

    // == Acquire ==
    /// Opens (if needed) the current thread's connection and takes a lease on it.
    ///
    /// The connection is closed when the last lease on this thread is dropped.
    pub fn acquire(&self) -> Result<Lease<'_>> {
        let id = thread::current().id();
        self.handle()?;

        let mut slots = self.slots()?;
        let slot = slots
            .get_mut(&id)
            .ok_or_else(|| CacheError::connection("Connection vanished while acquiring"))?;
        slot.open_count += 1;

        Ok(Lease {
            manager: self,
            _thread_bound: PhantomData,
        })
    }

    // == Release ==
    /// Drops one lease of the current thread, closing the connection at zero.
    pub fn release(&self) -> Result<()> {
        let id = thread::current().id();
        let slot = {
            let mut slots = self.slots()?;
            match slots.get_mut(&id) {
                None => return Ok(()),
                Some(slot) => {
                    slot.open_count = slot.open_count.saturating_sub(1);
                    if slot.open_count > 0 {
                        return Ok(());
                    }
                }
            }
            slots.remove(&id)
        };

        match slot {
            Some(slot) => close_handle(id, slot.conn),
            None => Ok(()),
        }
    }

    // == Close ==
    /// Force-closes the current thread's connection, ignoring outstanding leases.
    ///
    /// The next operation on this thread opens a fresh connection.
    pub fn close(&self) -> Result<()> {
        let id = thread::current().id();
        let slot = self.slots()?.remove(&id);

        match slot {
            Some(slot) => close_handle(id, slot.conn),
            None => Ok(()),
        }
    }

    /// Whether the current thread holds an open connection.
    pub fn is_open(&self) -> bool {
        let id = thread::current().id();
        self.slots()
            .map(|slots| slots.contains_key(&id))
            .unwrap_or(false)
    }

    /// Outstanding leases of the current thread.
    pub fn open_count(&self) -> usize {
        let id = thread::current().id();
        self.slots()
            .ok()
            .and_then(|slots| slots.get(&id).map(|slot| slot.open_count))
            .unwrap_or(0)
    }

    /// Open connections across all threads.
    pub fn connection_count(&self) -> usize {
        self.slots().map(|slots| slots.len()).unwrap_or(0)
    }

    fn slots(&self) -> Result<MutexGuard<'_, HashMap<ThreadId, Slot>>> {
        self.slots
            .lock()
            .map_err(|e| CacheError::connection(format!("Failed to lock connection registry: {}", e)))
    }

    /// Current thread's handle, opening a tuned connection if there is none.
    fn handle(&self) -> Result<Handle> {
        let id = thread::current().id();
        if let Some(slot) = self.slots()?.get(&id) {
            return Ok(slot.conn.clone());
        }

        // Opened without the registry lock: tuning may wait on the busy timeout
        let handle = Arc::new(Mutex::new(open_connection(&self.config)?));
        self.slots()?.insert(
            id,
            Slot {
                conn: handle.clone(),
                open_count: 0,
            },
        );
        debug!("Opened cache connection for {:?}", id);
        self.register_exit_hook(id);

        Ok(handle)
    }

    /// Arranges for this thread's slot to be closed when the thread exits.
    fn register_exit_hook(&self, thread: ThreadId) {
        let registered = EXIT_HOOKS.try_with(|hooks| {
            let mut hooks = hooks.borrow_mut();
            hooks.retain(|_, hook| hook.slots.strong_count() > 0);
            hooks.entry(self.id).or_insert_with(|| ExitHook {
                thread,
                slots: Arc::downgrade(&self.slots),
            });
        });

        if registered.is_err() {
            warn!("Thread {:?} is exiting, its cache connection stays open until close", thread);
        }
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        let slots = std::mem::take(&mut *self.slots.lock().unwrap_or_else(PoisonError::into_inner));

        for (id, slot) in slots {
            if let Err(e) = close_handle(id, slot.conn) {
                warn!("Failed to close cache connection for {:?}: {}", id, e);
            }
        }
    }
}

// == Exit Hook ==
/// Thread-local owner that closes the thread's connection when the thread exits.
///
/// Holds the registry weakly: a manager dropped first has already closed
/// every connection.
struct ExitHook {
    thread: ThreadId,
    slots: Weak<Registry>,
}

impl Drop for ExitHook {
    fn drop(&mut self) {
        let Some(slots) = self.slots.upgrade() else {
            return;
        };
        let slot = slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.thread);

        if let Some(slot) = slot {
            if let Err(e) = close_handle(self.thread, slot.conn) {
                warn!("Failed to close cache connection for {:?}: {}", self.thread, e);
            }
        }
    }
}

// == Lease ==
/// Scoped hold on the current thread's connection.
///
/// Not `Send`: it must be released on the thread that acquired it.
pub struct Lease<'a> {
    manager: &'a ConnectionManager,
    _thread_bound: PhantomData<*const ()>,
}

impl Drop for Lease<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.manager.release() {
            warn!("Failed to release cache connection: {}", e);
        }
    }
}

// == Connection Setup ==
fn open_connection(config: &CacheConfig) -> Result<Connection> {
    let target = config.connection_string();
    let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
        | OpenFlags::SQLITE_OPEN_CREATE
        | OpenFlags::SQLITE_OPEN_URI
        | OpenFlags::SQLITE_OPEN_NO_MUTEX;

    let conn = Connection::open_with_flags(&target, flags).map_err(|e| CacheError::Connection {
        message: format!("Failed to open cache database {}: {}", target, e),
        source: Some(e),
    })?;

    conn.busy_timeout(config.timeout)
        .map_err(|e| CacheError::Connection {
            message: format!("Failed to set busy timeout: {}", e),
            source: Some(e),
        })?;

    for (name, value) in config.pragmas.to_pairs() {
        apply_pragma(&conn, &name, &value)?;
    }

    rusqlite::vtab::array::load_module(&conn).map_err(|e| CacheError::Connection {
        message: format!("Failed to register rarray module: {}", e),
        source: Some(e),
    })?;

    Ok(conn)
}

/// Applies one pragma, draining any row the engine reports back.
fn apply_pragma(conn: &Connection, name: &str, value: &str) -> Result<()> {
    // Pragmas cannot be bound as parameters
    if !is_pragma_token(name) || !is_pragma_token(value) {
        return Err(CacheError::connection(format!(
            "Invalid pragma {}={}",
            name, value
        )));
    }

    let sql = format!("PRAGMA {}={}", name, value);
    let run = || -> rusqlite::Result<()> {
        let mut stmt = conn.prepare(&sql)?;
        let mut rows = stmt.query([])?;
        while rows.next()?.is_some() {}
        Ok(())
    };

    run().map_err(|e| CacheError::Connection {
        message: format!("Failed to apply pragma {}: {}", name, e),
        source: Some(e),
    })
}

fn is_pragma_token(s: &str) -> bool {
    !s.is_empty()
        && s
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

/// Runs `PRAGMA optimize` and closes the connection.
///
/// A handle still borrowed by an in-flight call on its own thread is closed
/// when that call finishes, without the optimize step.
fn close_handle(thread: ThreadId, handle: Handle) -> Result<()> {
    let mutex = match Arc::try_unwrap(handle) {
        Ok(mutex) => mutex,
        Err(_) => {
            debug!("Connection for {:?} still in use, closing on last release", thread);
            return Ok(());
        }
    };

    let conn = mutex.into_inner().unwrap_or_else(PoisonError::into_inner);
    conn.execute_batch(schema::OPTIMIZE)?;
    conn.close().map_err(|(_, e)| CacheError::Connection {
        message: format!("Failed to close cache connection: {}", e),
        source: Some(e),
    })?;

    debug!("Closed cache connection for {:?}", thread);
    Ok(())
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use tempfile::TempDir;

    use crate::config::Pragmas;

    fn create_test_manager() -> (TempDir, ConnectionManager) {
        let temp_dir = TempDir::new().unwrap();
        let config = CacheConfig::new(temp_dir.path().join("cache.db"));
        (temp_dir, ConnectionManager::new(config))
    }

    fn journal_mode(manager: &ConnectionManager) -> String {
        manager
            .with_connection(|conn| {
                Ok(conn.query_row("PRAGMA journal_mode", [], |row| row.get(0))?)
            })
            .unwrap()
    }

    #[test]
    fn test_connection_opened_lazily() {
        let (_dir, manager) = create_test_manager();
        assert!(!manager.is_open());
        assert_eq!(manager.connection_count(), 0);

        manager.with_connection(|_| Ok(())).unwrap();

        assert!(manager.is_open());
        assert_eq!(manager.connection_count(), 1);
        assert_eq!(manager.open_count(), 0);
    }

    #[test]
    fn test_pragmas_applied_on_creation() {
        let (_dir, manager) = create_test_manager();

        assert_eq!(journal_mode(&manager), "wal");
        let synchronous: i64 = manager
            .with_connection(|conn| {
                Ok(conn.query_row("PRAGMA synchronous", [], |row| row.get(0))?)
            })
            .unwrap();
        assert_eq!(synchronous, 0);
    }

    #[test]
    fn test_one_connection_per_thread() {
        let (_dir, manager) = create_test_manager();
        manager.with_connection(|_| Ok(())).unwrap();

        thread::scope(|s| {
            s.spawn(|| {
                assert!(!manager.is_open(), "New thread must not see another thread's handle");
                manager.with_connection(|_| Ok(())).unwrap();
                assert!(manager.is_open());
                assert_eq!(manager.connection_count(), 2);
            });
        });

        assert!(manager.is_open());
    }

    #[test]
    fn test_exited_threads_close_their_connections() {
        let (_dir, manager) = create_test_manager();
        manager.with_connection(|_| Ok(())).unwrap();

        thread::scope(|s| {
            for _ in 0..20 {
                s.spawn(|| manager.with_connection(|_| Ok(())).unwrap());
            }
        });

        assert_eq!(manager.connection_count(), 1);
        assert!(manager.is_open());
    }

    #[test]
    fn test_thread_exit_after_close_is_harmless() {
        let (_dir, manager) = create_test_manager();

        thread::scope(|s| {
            s.spawn(|| {
                manager.with_connection(|_| Ok(())).unwrap();
                manager.close().unwrap();
                // Reopening registers no second hook
                manager.with_connection(|_| Ok(())).unwrap();
            });
        });

        assert_eq!(manager.connection_count(), 0);
    }

    #[test]
    fn test_thread_outliving_manager() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("cache.db");
        let (opened_tx, opened_rx) = std::sync::mpsc::channel();
        let (dropped_tx, dropped_rx) = std::sync::mpsc::channel::<()>();

        let worker = thread::spawn(move || {
            let manager = ConnectionManager::new(CacheConfig::new(path));
            manager.with_connection(|_| Ok(())).unwrap();
            opened_tx.send(manager).unwrap_or_else(|_| panic!("receiver gone"));
            dropped_rx.recv().unwrap();
        });

        let manager = opened_rx.recv().unwrap();
        assert_eq!(manager.connection_count(), 1);
        drop(manager);
        dropped_tx.send(()).unwrap();

        worker.join().unwrap();
    }

    #[test]
    fn test_leases_close_at_zero() {
        let (_dir, manager) = create_test_manager();

        let first = manager.acquire().unwrap();
        let second = manager.acquire().unwrap();
        assert_eq!(manager.open_count(), 2);

        drop(first);
        assert_eq!(manager.open_count(), 1);
        assert!(manager.is_open());

        drop(second);
        assert!(!manager.is_open());
    }

    #[test]
    fn test_lease_released_on_panic() {
        let (_dir, manager) = create_test_manager();

        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _lease = manager.acquire().unwrap();
            panic!("boom");
        }));

        assert!(result.is_err());
        assert!(!manager.is_open());
    }

    #[test]
    fn test_close_then_reopen() {
        let (_dir, manager) = create_test_manager();
        manager.with_connection(|_| Ok(())).unwrap();

        manager.close().unwrap();
        assert!(!manager.is_open());

        // Closing twice is harmless
        manager.close().unwrap();

        assert_eq!(journal_mode(&manager), "wal");
        assert!(manager.is_open());
    }

    #[test]
    fn test_invalid_pragma_name_rejected() {
        let temp_dir = TempDir::new().unwrap();
        let mut extra = BTreeMap::new();
        extra.insert("cache_size; DROP TABLE cache".to_string(), "1".to_string());
        let config = CacheConfig::new(temp_dir.path().join("cache.db")).with_pragmas(Pragmas {
            extra,
            ..Pragmas::default()
        });
        let manager = ConnectionManager::new(config);

        let result = manager.with_connection(|_| Ok(()));
        assert!(matches!(result, Err(CacheError::Connection { .. })));
        assert!(!manager.is_open(), "No partial state may be kept");
    }

    #[test]
    fn test_engine_rejected_pragma_fails() {
        let temp_dir = TempDir::new().unwrap();
        let mut extra = BTreeMap::new();
        extra.insert("cache_size".to_string(), "-".to_string());
        let config = CacheConfig::new(temp_dir.path().join("cache.db")).with_pragmas(Pragmas {
            extra,
            ..Pragmas::default()
        });
        let manager = ConnectionManager::new(config);

        let result = manager.acquire();
        assert!(matches!(result, Err(CacheError::Connection { .. })));
        assert_eq!(manager.connection_count(), 0);
    }

    #[test]
    fn test_unopenable_path_is_connection_error() {
        let temp_dir = TempDir::new().unwrap();
        let config = CacheConfig::new(temp_dir.path().join("missing").join("cache.db"));
        let manager = ConnectionManager::new(config);

        let result = manager.with_connection(|_| Ok(()));
        assert!(matches!(result, Err(CacheError::Connection { .. })));
    }

    #[test]
    fn test_drop_closes_every_thread() {
        let (_dir, manager) = create_test_manager();
        let (opened_tx, opened_rx) = std::sync::mpsc::channel();
        let (release_tx, release_rx) = std::sync::mpsc::channel::<()>();
        manager.with_connection(|_| Ok(())).unwrap();

        thread::scope(|s| {
            let manager = &manager;
            s.spawn(move || {
                manager.with_connection(|_| Ok(())).unwrap();
                opened_tx.send(()).unwrap();
                release_rx.recv().unwrap();
            });
            opened_rx.recv().unwrap();
            assert_eq!(manager.connection_count(), 2);
            release_tx.send(()).unwrap();
        });

        drop(manager);
    }
}
