//! MemoryFailureStore - 開発・テスト用の失敗タスクストア
//!
//! BTreeMap のキーが ULID なので、イテレーション順がそのまま作成順になる。
//! プロセス内でしか共有できない点に注意（複数プロセスなら SqliteFailureStore）。

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;

use crate::domain::errors::StoreError;
use crate::domain::{FailedTaskId, FailedTaskRecord, NewFailedTask};
use crate::ports::{Clock, FailedTaskQuery, FailureStore, IdGenerator, SystemClock, UlidGenerator};

pub struct MemoryFailureStore {
    records: Mutex<BTreeMap<FailedTaskId, FailedTaskRecord>>,
    ids: Arc<dyn IdGenerator>,
    clock: Arc<dyn Clock>,
}

impl MemoryFailureStore {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            records: Mutex::new(BTreeMap::new()),
            ids: Arc::new(UlidGenerator::new(clock.clone())),
            clock,
        }
    }

    fn records(&self) -> MutexGuard<'_, BTreeMap<FailedTaskId, FailedTaskRecord>> {
        // panic した保持者がいても中身は BTreeMap の操作単位で整合している
        self.records.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Test helper: snapshot in id order.
    pub fn snapshot(&self) -> Vec<FailedTaskRecord> {
        self.records().values().cloned().collect()
    }
}

impl Default for MemoryFailureStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl FailureStore for MemoryFailureStore {
    async fn create(&self, new: NewFailedTask) -> Result<FailedTaskRecord, StoreError> {
        let record = new.into_record(self.ids.failed_task_id(), self.clock.now());
        self.records().insert(record.id, record.clone());
        Ok(record)
    }

    async fn query(&self, query: &FailedTaskQuery) -> Result<Vec<FailedTaskRecord>, StoreError> {
        Ok(self
            .records()
            .values()
            .filter(|r| query.matches(r))
            .take(query.limit)
            .cloned()
            .collect())
    }

    async fn delete(&self, record: &FailedTaskRecord) -> Result<(), StoreError> {
        self.records().remove(&record.id);
        Ok(())
    }

    async fn delete_many(&self, ids: &[FailedTaskId]) -> Result<usize, StoreError> {
        let mut records = self.records();
        Ok(ids.iter().filter(|id| records.remove(id).is_some()).count())
    }

    async fn latest_id(&self) -> Result<Option<FailedTaskId>, StoreError> {
        Ok(self.records().keys().next_back().copied())
    }

    async fn count(&self) -> Result<u64, StoreError> {
        Ok(self.records().len() as u64)
    }

    async fn list_page(&self, offset: usize, limit: usize) -> Result<Vec<FailedTaskRecord>, StoreError> {
        Ok(self
            .records()
            .values()
            .rev()
            .skip(offset)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn clear(&self) -> Result<u64, StoreError> {
        let mut records = self.records();
        let removed = records.len() as u64;
        records.clear();
        Ok(removed)
    }
}
