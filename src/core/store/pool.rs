//! Concurrency-gated SQLite sessions.
//!
//! A [`SessionPool`] hands out at most `size` connections at a time.
//! Acquisition waits up to the pool timeout, then fails with
//! [`Error::PoolTimeout`]. Connections are opened lazily, kept idle after
//! use, and configured with the store pragmas on open.

use crate::error::{Error, Result};
use log::{debug, trace};
use rusqlite::Connection;
use std::ops::{Deref, DerefMut};
use std::path::{Path, PathBuf};
use std::sync::{Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

/// How long a connection waits on a locked database before SQLITE_BUSY.
const BUSY_TIMEOUT: Duration = Duration::from_millis(250);

/// Open a connection with the per-connection pragmas applied.
pub fn open_connection(path: &Path) -> Result<Connection> {
    let conn = Connection::open(path)?;
    conn.busy_timeout(BUSY_TIMEOUT)?;
    let mode: String = conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
    if !mode.eq_ignore_ascii_case("wal") {
        debug!("{} runs in {} journal mode", path.display(), mode);
    }
    conn.pragma_update(None, "synchronous", "NORMAL")?;
    conn.pragma_update(None, "foreign_keys", true)?;
    conn.pragma_update(None, "temp_store", "MEMORY")?;
    conn.pragma_update(None, "cache_size", 10_000)?;
    let _: i64 = conn.pragma_update_and_check(None, "mmap_size", 268_435_456i64, |row| row.get(0))?;
    Ok(conn)
}

struct State {
    available: usize,
    idle: Vec<Connection>,
}

pub struct SessionPool {
    kind: &'static str,
    path: PathBuf,
    size: usize,
    timeout: Duration,
    state: Mutex<State>,
    freed: Condvar,
}

impl SessionPool {
    pub fn new(kind: &'static str, path: &Path, size: usize, timeout: Duration) -> Self {
        let size = size.max(1);
        Self {
            kind,
            path: path.to_path_buf(),
            size,
            timeout,
            state: Mutex::new(State { available: size, idle: Vec::new() }),
            freed: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Wait until `n` permits are free, then take them.
    fn take(&self, n: usize) -> Result<MutexGuard<'_, State>> {
        let deadline = Instant::now() + self.timeout;
        let mut state = self.lock();
        while state.available < n {
            let now = Instant::now();
            if now >= deadline {
                return Err(Error::PoolTimeout { kind: self.kind, timeout: self.timeout });
            }
            state = self.freed.wait_timeout(state, deadline - now).unwrap_or_else(|e| e.into_inner()).0;
        }
        state.available -= n;
        Ok(state)
    }

    fn give_back(&self, n: usize, conn: Option<Connection>) {
        let mut state = self.lock();
        state.available += n;
        if let Some(conn) = conn {
            state.idle.push(conn);
        }
        drop(state);
        if n == 1 {
            self.freed.notify_one();
        } else {
            self.freed.notify_all();
        }
    }

    /// Borrow one session.
    pub fn acquire(&self) -> Result<Session<'_>> {
        let mut state = self.take(1)?;
        let idle = state.idle.pop();
        drop(state);
        let conn = match idle {
            Some(conn) => conn,
            None => match open_connection(&self.path) {
                Ok(conn) => {
                    trace!("Opened {} session on {}", self.kind, self.path.display());
                    conn
                }
                Err(e) => {
                    self.give_back(1, None);
                    return Err(e);
                }
            },
        };
        Ok(Session { pool: self, conn: Some(conn) })
    }

    /// Take every permit and close idle connections. While the guard
    /// lives no session of this pool is open.
    pub fn exclusive(&self) -> Result<Exclusive<'_>> {
        let mut state = self.take(self.size)?;
        let closed = state.idle.len();
        state.idle.clear();
        drop(state);
        debug!("Closed {} idle {} sessions", closed, self.kind);
        Ok(Exclusive { pool: self })
    }

    /// Hand a connection to the idle list.
    pub(crate) fn park(&self, conn: Connection) {
        self.lock().idle.push(conn);
    }

    #[must_use]
    pub fn size(&self) -> usize {
        self.size
    }

    /// Permits not currently held.
    #[must_use]
    pub fn available(&self) -> usize {
        self.lock().available
    }
}

impl std::fmt::Debug for SessionPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionPool")
            .field("kind", &self.kind)
            .field("path", &self.path)
            .field("size", &self.size)
            .field("available", &self.available())
            .finish()
    }
}

/// A borrowed connection. Returned to the pool on drop.
pub struct Session<'a> {
    pool: &'a SessionPool,
    conn: Option<Connection>,
}

impl Deref for Session<'_> {
    type Target = Connection;

    fn deref(&self) -> &Connection {
        // only taken in Drop
        self.conn.as_ref().unwrap_or_else(|| unreachable!("session used after release"))
    }
}

impl DerefMut for Session<'_> {
    fn deref_mut(&mut self) -> &mut Connection {
        self.conn.as_mut().unwrap_or_else(|| unreachable!("session used after release"))
    }
}

impl Drop for Session<'_> {
    fn drop(&mut self) {
        self.pool.give_back(1, self.conn.take());
    }
}

/// All permits of a pool; see [`SessionPool::exclusive`].
pub struct Exclusive<'a> {
    pool: &'a SessionPool,
}

impl Drop for Exclusive<'_> {
    fn drop(&mut self) {
        self.pool.give_back(self.pool.size, None);
    }
}
