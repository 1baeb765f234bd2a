//! SqliteLock - rusqlite によるプロセス間ロック
//!
//! `BEGIN IMMEDIATE` で書き込みロックを取ってから
//! 期限切れ行の削除 → `INSERT OR IGNORE` を行うので、取得は原子的。

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rusqlite::{TransactionBehavior, params};

use super::sqlite::{SharedConnection, open_database, open_in_memory, with_connection};
use crate::domain::errors::LockError;
use crate::ports::lock::ttl_to_chrono;
use crate::ports::{Clock, IdGenerator, Lease, LockBackend, SystemClock, UlidGenerator};

pub struct SqliteLock {
    conn: SharedConnection,
    ids: UlidGenerator<Arc<dyn Clock>>,
    clock: Arc<dyn Clock>,
}

impl SqliteLock {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, LockError> {
        let conn = open_database(path).map_err(|e| LockError::Unavailable(e.to_string()))?;
        Ok(Self::from_connection(conn, Arc::new(SystemClock)))
    }

    pub fn in_memory() -> Result<Self, LockError> {
        let conn = open_in_memory().map_err(|e| LockError::Unavailable(e.to_string()))?;
        Ok(Self::from_connection(conn, Arc::new(SystemClock)))
    }

    pub fn from_connection(conn: SharedConnection, clock: Arc<dyn Clock>) -> Self {
        Self {
            conn,
            ids: UlidGenerator::new(clock.clone()),
            clock,
        }
    }
}

#[async_trait]
impl LockBackend for SqliteLock {
    async fn try_acquire(&self, key: &str, ttl: Duration) -> Result<Option<Lease>, LockError> {
        let now = self.clock.now();
        let lease = Lease {
            key: key.to_string(),
            token: self.ids.lease_token(),
            expires_at: now.checked_add_signed(ttl_to_chrono(ttl)).unwrap_or(now),
        };

        let row = lease.clone();
        let now_ms = now.timestamp_millis();
        let acquired = with_connection(&self.conn, move |conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            tx.execute(
                "DELETE FROM cron_locks WHERE key = ?1 AND expires_at_ms <= ?2",
                params![row.key, now_ms],
            )?;
            let inserted = tx.execute(
                "INSERT OR IGNORE INTO cron_locks (key, token, expires_at_ms) VALUES (?1, ?2, ?3)",
                params![row.key, row.token.to_key(), row.expires_at.timestamp_millis()],
            )?;
            tx.commit()?;
            Ok(inserted == 1)
        })
        .await?;

        Ok(acquired.then_some(lease))
    }

    async fn release(&self, lease: &Lease) -> Result<(), LockError> {
        let key = lease.key.clone();
        let token = lease.token.to_key();
        with_connection(&self.conn, move |conn| {
            conn.execute(
                "DELETE FROM cron_locks WHERE key = ?1 AND token = ?2",
                params![key, token],
            )
        })
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::FixedClock;
    use chrono::{TimeZone, Utc};
    use tempfile::TempDir;

    #[tokio::test]
    async fn two_connections_contend_for_one_key() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("locks.db");
        let a = SqliteLock::open(&path).unwrap();
        let b = SqliteLock::open(&path).unwrap();
        let ttl = Duration::from_secs(60);

        let lease = a.try_acquire("cron:report", ttl).await.unwrap().unwrap();
        assert!(b.try_acquire("cron:report", ttl).await.unwrap().is_none());

        // 他人のリースは解放できない
        let foreign = Lease {
            token: b.ids.lease_token(),
            ..lease.clone()
        };
        b.release(&foreign).await.unwrap();
        assert!(b.try_acquire("cron:report", ttl).await.unwrap().is_none());

        a.release(&lease).await.unwrap();
        a.release(&lease).await.unwrap();
        assert!(b.try_acquire("cron:report", ttl).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn expired_row_is_taken_over() {
        let clock = FixedClock::new(Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap());
        let conn = open_in_memory().unwrap();
        let lock = SqliteLock::from_connection(conn, Arc::new(clock.clone()));
        let ttl = Duration::from_secs(30);

        lock.try_acquire("k", ttl).await.unwrap().unwrap();
        clock.advance(chrono::Duration::seconds(29));
        assert!(lock.try_acquire("k", ttl).await.unwrap().is_none());

        clock.advance(chrono::Duration::seconds(1));
        assert!(lock.try_acquire("k", ttl).await.unwrap().is_some());
    }
}
