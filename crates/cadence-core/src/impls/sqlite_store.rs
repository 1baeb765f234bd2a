//! SqliteFailureStore - rusqlite による失敗タスクストア
//!
//! id は ULID の文字列表現で保存する。文字列順 = 作成順なので
//! keyset paging は `id > ?` / `ORDER BY id` で済む。

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{OptionalExtension, Row, params};

use super::sqlite::{SharedConnection, open_database, open_in_memory, with_connection};
use crate::domain::errors::StoreError;
use crate::domain::{FailedTaskId, FailedTaskRecord, NewFailedTask, Payload};
use crate::ports::{Clock, FailedTaskQuery, FailureStore, IdGenerator, SystemClock, UlidGenerator};

const COLUMNS: &str = "id, identifier, payload, failure_reason, attempt, created_at_ms";

pub struct SqliteFailureStore {
    conn: SharedConnection,
    ids: Arc<dyn IdGenerator>,
    clock: Arc<dyn Clock>,
}

impl SqliteFailureStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let conn = open_database(path).map_err(|e| StoreError::Unavailable(e.to_string()))?;
        Ok(Self::from_connection(conn, Arc::new(SystemClock)))
    }

    pub fn in_memory() -> Result<Self, StoreError> {
        let conn = open_in_memory().map_err(|e| StoreError::Unavailable(e.to_string()))?;
        Ok(Self::from_connection(conn, Arc::new(SystemClock)))
    }

    pub fn from_connection(conn: SharedConnection, clock: Arc<dyn Clock>) -> Self {
        Self {
            conn,
            ids: Arc::new(UlidGenerator::new(clock.clone())),
            clock,
        }
    }
}

fn row_to_record(row: &Row<'_>) -> rusqlite::Result<FailedTaskRecord> {
    let raw_id: String = row.get(0)?;
    let id = raw_id
        .parse::<FailedTaskId>()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(0, Type::Text, Box::new(e)))?;
    let created_at_ms: i64 = row.get(5)?;
    let created_at = DateTime::<Utc>::from_timestamp_millis(created_at_ms).ok_or(
        rusqlite::Error::IntegralValueOutOfRange(5, created_at_ms),
    )?;

    Ok(FailedTaskRecord {
        id,
        identifier: row.get(1)?,
        payload: row.get::<_, Option<Vec<u8>>>(2)?.map(Payload::from_bytes),
        failure_reason: row.get(3)?,
        attempt: row.get::<_, i64>(4)?.clamp(0, u32::MAX as i64) as u32,
        created_at,
    })
}

#[async_trait]
impl FailureStore for SqliteFailureStore {
    async fn create(&self, new: NewFailedTask) -> Result<FailedTaskRecord, StoreError> {
        let record = new.into_record(self.ids.failed_task_id(), self.clock.now());
        let row = record.clone();
        with_connection(&self.conn, move |conn| {
            conn.execute(
                "INSERT INTO failed_tasks (id, identifier, payload, failure_reason, attempt, created_at_ms)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    row.id.to_key(),
                    row.identifier,
                    row.payload.map(Payload::into_bytes),
                    row.failure_reason,
                    row.attempt as i64,
                    row.created_at.timestamp_millis(),
                ],
            )
        })
        .await?;
        Ok(record)
    }

    async fn query(&self, query: &FailedTaskQuery) -> Result<Vec<FailedTaskRecord>, StoreError> {
        let attempt_below = query.attempt_below.map(i64::from);
        let after = query.after.map(|id| id.to_key());
        let up_to = query.up_to.map(|id| id.to_key());
        let limit = query.limit as i64;

        let rows = with_connection(&self.conn, move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {COLUMNS} FROM failed_tasks
                 WHERE (?1 IS NULL OR attempt < ?1)
                   AND (?2 IS NULL OR id > ?2)
                   AND (?3 IS NULL OR id <= ?3)
                 ORDER BY id ASC
                 LIMIT ?4"
            ))?;
            stmt.query_map(params![attempt_below, after, up_to, limit], row_to_record)?
                .collect::<rusqlite::Result<Vec<_>>>()
        })
        .await?;
        Ok(rows)
    }

    async fn delete(&self, record: &FailedTaskRecord) -> Result<(), StoreError> {
        let key = record.id.to_key();
        with_connection(&self.conn, move |conn| {
            conn.execute("DELETE FROM failed_tasks WHERE id = ?1", params![key])
        })
        .await?;
        Ok(())
    }

    async fn delete_many(&self, ids: &[FailedTaskId]) -> Result<usize, StoreError> {
        let keys: Vec<String> = ids.iter().map(|id| id.to_key()).collect();
        let removed = with_connection(&self.conn, move |conn| {
            let tx = conn.transaction()?;
            let mut removed = 0;
            {
                let mut stmt = tx.prepare_cached("DELETE FROM failed_tasks WHERE id = ?1")?;
                for key in &keys {
                    removed += stmt.execute(params![key])?;
                }
            }
            tx.commit()?;
            Ok(removed)
        })
        .await?;
        Ok(removed)
    }

    async fn latest_id(&self) -> Result<Option<FailedTaskId>, StoreError> {
        let raw = with_connection(&self.conn, |conn| {
            conn.query_row("SELECT MAX(id) FROM failed_tasks", [], |row| {
                row.get::<_, Option<String>>(0)
            })
            .optional()
            .map(Option::flatten)
        })
        .await?;

        raw.map(|s| {
            s.parse::<FailedTaskId>().map_err(|e| StoreError::Corrupt {
                id: s.clone(),
                reason: e.to_string(),
            })
        })
        .transpose()
    }

    async fn count(&self) -> Result<u64, StoreError> {
        let count = with_connection(&self.conn, |conn| {
            conn.query_row("SELECT COUNT(*) FROM failed_tasks", [], |row| row.get::<_, i64>(0))
        })
        .await?;
        Ok(count.max(0) as u64)
    }

    async fn list_page(&self, offset: usize, limit: usize) -> Result<Vec<FailedTaskRecord>, StoreError> {
        let (offset, limit) = (offset as i64, limit as i64);
        let rows = with_connection(&self.conn, move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {COLUMNS} FROM failed_tasks ORDER BY id DESC LIMIT ?1 OFFSET ?2"
            ))?;
            stmt.query_map(params![limit, offset], row_to_record)?
                .collect::<rusqlite::Result<Vec<_>>>()
        })
        .await?;
        Ok(rows)
    }

    async fn clear(&self) -> Result<u64, StoreError> {
        let removed = with_connection(&self.conn, |conn| conn.execute("DELETE FROM failed_tasks", []))
            .await?;
        Ok(removed as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::TaskRequest;
    use crate::ports::FailedTaskStream;
    use tempfile::TempDir;

    fn failure(identifier: &str, attempt: u32) -> NewFailedTask {
        let request = TaskRequest::new(identifier, Payload::from_bytes(r#"{"n":1}"#)).with_attempt(attempt);
        NewFailedTask::from_request(&request, "boom")
    }

    #[tokio::test]
    async fn records_round_trip_through_the_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("cadence.db");

        let created = {
            let store = SqliteFailureStore::open(&path).unwrap();
            store.create(failure("mail.send", 2)).await.unwrap()
        };

        // 別接続（別プロセス相当）から読める
        let store = SqliteFailureStore::open(&path).unwrap();
        let rows = store.query(&FailedTaskQuery::attempt_below(10, 10)).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].id, created.id);
        assert_eq!(rows[0].identifier, "mail.send");
        assert_eq!(rows[0].attempt, 2);
        assert_eq!(rows[0].payload.as_ref().unwrap().as_bytes(), br#"{"n":1}"#);
        assert_eq!(rows[0].created_at.timestamp_millis(), created.created_at.timestamp_millis());
    }

    #[tokio::test]
    async fn null_payload_is_preserved() {
        let store = SqliteFailureStore::in_memory().unwrap();
        let mut new = failure("x", 0);
        new.payload = None;
        store.create(new).await.unwrap();

        let rows = store.list_page(0, 10).await.unwrap();
        assert!(rows[0].payload.is_none());
    }

    #[tokio::test]
    async fn stream_and_delete_many() {
        let store = SqliteFailureStore::in_memory().unwrap();
        for (i, attempt) in [0, 1, 0, 0, 2].into_iter().enumerate() {
            store.create(failure(&format!("t{i}"), attempt)).await.unwrap();
        }

        let mut stream = FailedTaskStream::open(&store, 1, 2).await.unwrap();
        let mut picked = Vec::new();
        loop {
            let batch = stream.next_batch().await.unwrap();
            if batch.is_empty() {
                break;
            }
            picked.extend(batch);
        }
        let names: Vec<_> = picked.iter().map(|r| r.identifier.as_str()).collect();
        assert_eq!(names, vec!["t0", "t2", "t3"]);

        let ids: Vec<_> = picked.iter().map(|r| r.id).collect();
        assert_eq!(store.delete_many(&ids).await.unwrap(), 3);
        assert_eq!(store.count().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn latest_id_list_page_and_clear() {
        let store = SqliteFailureStore::in_memory().unwrap();
        assert_eq!(store.latest_id().await.unwrap(), None);

        let a = store.create(failure("a", 0)).await.unwrap();
        let b = store.create(failure("b", 0)).await.unwrap();
        assert_eq!(store.latest_id().await.unwrap(), Some(b.id));

        let page = store.list_page(0, 1).await.unwrap();
        assert_eq!(page[0].id, b.id);
        let page = store.list_page(1, 1).await.unwrap();
        assert_eq!(page[0].id, a.id);

        store.delete(&a).await.unwrap();
        store.delete(&a).await.unwrap();
        assert_eq!(store.clear().await.unwrap(), 1);
        assert_eq!(store.count().await.unwrap(), 0);
    }
}
