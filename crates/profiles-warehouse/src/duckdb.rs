//! Pooled `DuckDB` connections split by access mode.

use std::ops::{Deref, DerefMut};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use ::duckdb::Connection;

/// Whether a pooled connection may write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessMode {
    ReadOnly,
    ReadWrite,
}

#[derive(Default)]
struct IdleConnections {
    readers: Vec<Connection>,
    writers: Vec<Connection>,
}

impl IdleConnections {
    fn slot(&mut self, mode: AccessMode) -> &mut Vec<Connection> {
        match mode {
            AccessMode::ReadOnly => &mut self.readers,
            AccessMode::ReadWrite => &mut self.writers,
        }
    }
}

struct PoolShared {
    db_path: PathBuf,
    capacity: usize,
    root: Mutex<Option<Connection>>,
    idle: Mutex<IdleConnections>,
}

/// Hands out connections to one database file and keeps up to `capacity` idle
/// connections per access mode for reuse.
///
/// Every connection is cloned from a single root connection so readers and
/// writers share one database instance and see each other's commits.
#[derive(Clone)]
pub struct ConnectionPool {
    shared: Arc<PoolShared>,
}

impl ConnectionPool {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>, capacity: usize) -> Self {
        Self {
            shared: Arc::new(PoolShared {
                db_path: path.into(),
                capacity: capacity.max(1),
                root: Mutex::new(None),
                idle: Mutex::new(IdleConnections::default()),
            }),
        }
    }

    /// Take an idle connection for `mode`, opening a new one when none is idle.
    ///
    /// # Errors
    /// Returns an error when the database file cannot be opened or configured.
    ///
    /// # Panics
    /// Panics if the idle-list mutex is poisoned.
    pub fn acquire(&self, mode: AccessMode) -> Result<PooledConnection, ::duckdb::Error> {
        let reused = self
            .shared
            .idle
            .lock()
            .expect("duckdb idle connection mutex poisoned")
            .slot(mode)
            .pop();

        let connection = match reused {
            Some(connection) => connection,
            None => self.connect()?,
        };

        Ok(PooledConnection {
            mode,
            shared: Arc::clone(&self.shared),
            connection: Some(connection),
        })
    }

    fn connect(&self) -> Result<Connection, ::duckdb::Error> {
        let mut root = self
            .shared
            .root
            .lock()
            .expect("duckdb root connection mutex poisoned");
        let connection = match root.as_ref() {
            Some(root) => root.try_clone()?,
            None => {
                let opened = Connection::open(self.shared.db_path.as_path())?;
                let connection = opened.try_clone()?;
                *root = Some(opened);
                connection
            }
        };
        connection.execute_batch("PRAGMA disable_progress_bar;")?;
        Ok(connection)
    }

    #[must_use]
    pub fn db_path(&self) -> &Path {
        self.shared.db_path.as_path()
    }
}

/// Connection checked out of a [`ConnectionPool`]; returned on drop.
pub struct PooledConnection {
    mode: AccessMode,
    shared: Arc<PoolShared>,
    connection: Option<Connection>,
}

impl Deref for PooledConnection {
    type Target = Connection;

    fn deref(&self) -> &Self::Target {
        self.connection
            .as_ref()
            .expect("pooled connection already released")
    }
}

impl DerefMut for PooledConnection {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.connection
            .as_mut()
            .expect("pooled connection already released")
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        let Some(connection) = self.connection.take() else {
            return;
        };

        let mut idle = self
            .shared
            .idle
            .lock()
            .expect("duckdb idle connection mutex poisoned");
        let capacity = self.shared.capacity;
        let slot = idle.slot(self.mode);
        if slot.len() < capacity {
            slot.push(connection);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn released_connections_are_reused_up_to_capacity() {
        let temp = tempdir().expect("tempdir");
        let pool = ConnectionPool::new(temp.path().join("pool.duckdb"), 1);

        let first = pool.acquire(AccessMode::ReadWrite).expect("first");
        let second = pool.acquire(AccessMode::ReadWrite).expect("second");
        drop(first);
        drop(second);

        let idle = pool.shared.idle.lock().expect("lock");
        assert_eq!(idle.writers.len(), 1);
        assert!(idle.readers.is_empty());
    }
}
