use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rusqlite::{Connection, OpenFlags};

use crate::error::{CollectError, CollectResult};

/// A live database connection scoped to one collection tick.
///
/// Queries run on the blocking pool. The connection closes when the last
/// handle is dropped, on every exit path of the tick.
#[derive(Clone)]
pub struct DbSession {
    connection: Arc<Mutex<Connection>>,
}

impl DbSession {
    pub fn new(connection: Connection) -> Self {
        Self {
            connection: Arc::new(Mutex::new(connection)),
        }
    }

    /// Run `func` against the connection on the blocking pool
    pub async fn with_connection<T, F>(&self, func: F) -> CollectResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> CollectResult<T> + Send + 'static,
    {
        let connection = Arc::clone(&self.connection);
        tokio::task::spawn_blocking(move || {
            let guard = connection
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            func(&guard)
        })
        .await
        .map_err(|error| CollectError::TransientIo(format!("query task failed: {}", error)))?
    }
}

/// Hands out one session per tick
#[async_trait]
pub trait ConnectionProvider: Send + Sync {
    async fn acquire(&self) -> CollectResult<DbSession>;
}

/// Opens the SQLite database read-only for every tick
#[derive(Debug, Clone)]
pub struct SqliteConnectionProvider {
    db_path: PathBuf,
}

impl SqliteConnectionProvider {
    pub fn new(db_path: impl AsRef<Path>) -> Self {
        Self {
            db_path: db_path.as_ref().to_path_buf(),
        }
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }
}

#[async_trait]
impl ConnectionProvider for SqliteConnectionProvider {
    async fn acquire(&self) -> CollectResult<DbSession> {
        let db_path = self.db_path.clone();
        let connection = tokio::task::spawn_blocking(move || {
            Connection::open_with_flags(
                &db_path,
                OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
            )
        })
        .await
        .map_err(|error| CollectError::TransientIo(format!("connect task failed: {}", error)))?
        .map_err(|error| {
            CollectError::TransientIo(format!(
                "cannot open {}: {}",
                self.db_path.display(),
                error
            ))
        })?;

        Ok(DbSession::new(connection))
    }
}
