//! Shared database service wrapper used by the API.

use std::path::PathBuf;
use std::sync::Arc;

use rusqlite::Connection;
use tokio::sync::Mutex;

use crate::db::{Database, SqliteReplicationStore};
use crate::models::{Checkpoint, PullResponse, PushRow, WireDocument};
use crate::replication;
use crate::{Collection, Error, Result};

/// Thread-safe handle for replication requests.
///
/// Pushes serialize on a single writer connection. Pulls against a file
/// database open their own read-only connection per request, so they never
/// queue behind a push.
#[derive(Clone)]
pub struct DatabaseService {
    writer: Arc<Mutex<Database>>,
    db_path: Option<PathBuf>,
}

impl DatabaseService {
    /// Open a database service at the given filesystem path.
    pub async fn open_path(db_path: impl Into<PathBuf>) -> Result<Self> {
        let db_path = db_path.into();
        if let Some(parent) = db_path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|error| {
                Error::Database(format!("Cannot create {}: {error}", parent.display()))
            })?;
        }

        let path = db_path.clone();
        let db = run_blocking(move || Database::open(&path)).await?;
        tracing::info!("Opened planner database at {}", db_path.display());

        Ok(Self {
            writer: Arc::new(Mutex::new(db)),
            db_path: Some(db_path),
        })
    }

    /// Open an in-memory database service (primarily for tests).
    pub fn open_in_memory() -> Result<Self> {
        let db = Database::open_in_memory()?;
        Ok(Self {
            writer: Arc::new(Mutex::new(db)),
            db_path: None,
        })
    }

    /// Pull the next batch of `collection` changes for `owner`.
    pub async fn pull(
        &self,
        collection: Collection,
        owner: String,
        checkpoint: Option<Checkpoint>,
        batch_size: usize,
    ) -> Result<PullResponse> {
        self.read(move |conn| {
            let store = SqliteReplicationStore::new(conn, collection.config());
            replication::pull(&store, &owner, checkpoint, batch_size)
        })
        .await
    }

    /// Apply a batch of writes to `collection` for `owner`.
    pub async fn push(
        &self,
        collection: Collection,
        owner: String,
        rows: Vec<PushRow>,
    ) -> Result<Vec<WireDocument>> {
        let writer = Arc::clone(&self.writer);
        run_blocking(move || {
            let mut db = writer.blocking_lock();
            replication::push(db.connection_mut(), collection, &owner, &rows)
        })
        .await
    }

    async fn read<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T> + Send + 'static,
    {
        if let Some(path) = self.db_path.clone() {
            return run_blocking(move || {
                let conn = Database::open_reader(&path)?;
                f(&conn)
            })
            .await;
        }

        // In-memory databases exist only on the writer connection
        let writer = Arc::clone(&self.writer);
        run_blocking(move || {
            let db = writer.blocking_lock();
            f(db.connection())
        })
        .await
    }
}

/// Run synchronous `SQLite` work off the async executor.
async fn run_blocking<T, F>(f: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|error| Error::Database(format!("Database task failed: {error}")))?
}
