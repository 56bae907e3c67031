//! SQLite connection handling shared by the master registry and every
//! per-workspace store.
//!
//! Each `Database` wraps a single `rusqlite::Connection` behind a mutex and
//! runs blocking calls via `tokio::task::spawn_blocking`. Required pragmas (WAL journaling,
//! foreign keys, a 5s busy timeout) are set once on open.

pub mod master_schema;
pub mod schema;

use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use rusqlite::Connection;

use crate::error::{CoreError, CoreResult};

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Open (or create) a database file, creating parent directories as
    /// needed. The directory-creation handle is not retained past this
    /// call.
    pub fn open(db_path: &Path) -> CoreResult<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| CoreError::Internal(format!("cannot create {parent:?}: {e}")))?;
        }

        let conn = Connection::open(db_path)
            .map_err(|e| CoreError::Internal(format!("failed to open {db_path:?}: {e}")))?;
        Self::configure(&conn)?;

        tracing::info!(path = %db_path.display(), "database opened");
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// In-memory database, used by tests.
    pub fn open_in_memory() -> CoreResult<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| CoreError::Internal(format!("failed to open in-memory db: {e}")))?;
        Self::configure(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn configure(conn: &Connection) -> CoreResult<()> {
        conn.busy_timeout(BUSY_TIMEOUT)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
        Ok(())
    }

    /// Run a closure with exclusive access to the connection. Acquisition
    /// (the mutex lock) is a scoped resource released on every exit path,
    /// including panics unwinding through `?`.
    pub fn with_conn<F, T>(&self, f: F) -> CoreResult<T>
    where
        F: FnOnce(&Connection) -> rusqlite::Result<T>,
    {
        let conn = self
            .conn
            .lock()
            .map_err(|_| CoreError::Internal("database mutex poisoned".into()))?;
        Ok(f(&conn)?)
    }

    /// Async-friendly variant: runs the closure on the blocking thread
    /// pool so callers never block the async runtime on disk I/O.
    pub async fn with_conn_async<F, T>(&self, f: F) -> CoreResult<T>
    where
        F: FnOnce(&Connection) -> rusqlite::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let db = self.clone();
        tokio::task::spawn_blocking(move || db.with_conn(f))
            .await
            .map_err(|e| CoreError::Internal(format!("task join error: {e}")))?
    }

    /// Run a closure inside a single transaction: every multi-row mutation
    /// occurs inside one transaction that commits only if every row
    /// succeeds. Unlike `with_conn`, the closure returns a full
    /// `CoreResult` directly — domain validation failures (not just
    /// `rusqlite::Error`s) abort the transaction, which is dropped
    /// un-committed and so rolls back.
    pub fn with_tx<F, T>(&self, f: F) -> CoreResult<T>
    where
        F: FnOnce(&rusqlite::Transaction<'_>) -> CoreResult<T>,
    {
        let mut conn = self
            .conn
            .lock()
            .map_err(|_| CoreError::Internal("database mutex poisoned".into()))?;
        let tx = conn.transaction()?;
        let result = f(&tx)?;
        tx.commit()?;
        Ok(result)
    }

    pub async fn with_tx_async<F, T>(&self, f: F) -> CoreResult<T>
    where
        F: FnOnce(&rusqlite::Transaction<'_>) -> CoreResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let db = self.clone();
        tokio::task::spawn_blocking(move || db.with_tx(f))
            .await
            .map_err(|e| CoreError::Internal(format!("task join error: {e}")))?
    }
}
