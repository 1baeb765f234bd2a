//! SQLite 共通: 接続の初期化とスキーマ
//!
//! 失敗タスクストアとロックは同じ DB ファイルを使える。
//! WAL + busy_timeout で複数プロセスからの同時アクセスに耐える。

use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use rusqlite::Connection;

use crate::domain::errors::{LockError, StoreError};

pub type SharedConnection = Arc<Mutex<Connection>>;

const SCHEMA: &str = r#"
    CREATE TABLE IF NOT EXISTS failed_tasks (
        id              TEXT PRIMARY KEY,
        identifier      TEXT NOT NULL,
        payload         BLOB,
        failure_reason  TEXT NOT NULL,
        attempt         INTEGER NOT NULL DEFAULT 0,
        created_at_ms   INTEGER NOT NULL
    );
    CREATE INDEX IF NOT EXISTS idx_failed_tasks_attempt ON failed_tasks(attempt, id);

    CREATE TABLE IF NOT EXISTS cron_locks (
        key             TEXT PRIMARY KEY,
        token           TEXT NOT NULL,
        expires_at_ms   INTEGER NOT NULL
    );
"#;

pub fn open_database(path: impl AsRef<Path>) -> rusqlite::Result<SharedConnection> {
    let conn = Connection::open(path)?;
    conn.busy_timeout(Duration::from_secs(5))?;
    conn.pragma_update_and_check(None, "journal_mode", "WAL", |_| Ok(()))?;
    conn.pragma_update(None, "synchronous", "NORMAL")?;
    conn.execute_batch(SCHEMA)?;
    Ok(Arc::new(Mutex::new(conn)))
}

/// In-memory database, private to this connection. Tests only need one.
pub fn open_in_memory() -> rusqlite::Result<SharedConnection> {
    let conn = Connection::open_in_memory()?;
    conn.execute_batch(SCHEMA)?;
    Ok(Arc::new(Mutex::new(conn)))
}

#[derive(Debug, thiserror::Error)]
pub(crate) enum BlockingError {
    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),

    #[error("blocking task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

impl BlockingError {
    /// Busy/locked database and a lost blocking task mean "try later";
    /// everything else is a query problem.
    pub(crate) fn is_unavailable(&self) -> bool {
        match self {
            Self::Sqlite(rusqlite::Error::SqliteFailure(e, _)) => matches!(
                e.code,
                rusqlite::ErrorCode::DatabaseBusy
                    | rusqlite::ErrorCode::DatabaseLocked
                    | rusqlite::ErrorCode::CannotOpen
            ),
            Self::Sqlite(_) => false,
            Self::Join(_) => true,
        }
    }
}

/// Runs `f` on the blocking pool with the connection locked.
pub(crate) async fn with_connection<R, F>(conn: &SharedConnection, f: F) -> Result<R, BlockingError>
where
    R: Send + 'static,
    F: FnOnce(&mut Connection) -> rusqlite::Result<R> + Send + 'static,
{
    let conn = conn.clone();
    let result = tokio::task::spawn_blocking(move || {
        let mut guard = conn.lock().unwrap_or_else(|p| p.into_inner());
        f(&mut guard)
    })
    .await?;
    Ok(result?)
}

impl From<BlockingError> for StoreError {
    fn from(err: BlockingError) -> Self {
        if err.is_unavailable() {
            StoreError::Unavailable(err.to_string())
        } else {
            StoreError::Query(err.to_string())
        }
    }
}

impl From<BlockingError> for LockError {
    fn from(err: BlockingError) -> Self {
        LockError::Unavailable(err.to_string())
    }
}
