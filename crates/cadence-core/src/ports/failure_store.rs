//! FailureStore port - 失敗タスクの永続化
//!
//! executor が失敗を記録し、retry job が読み出して再投入・削除する。
//! 実装: `MemoryFailureStore`（開発・テスト）, `SqliteFailureStore`（複数プロセス共有）

use async_trait::async_trait;

use crate::domain::errors::StoreError;
use crate::domain::{FailedTaskId, FailedTaskRecord, NewFailedTask};

/// Filter for `FailureStore::query`.
///
/// Results are ordered by id ascending (oldest first). `after` is exclusive,
/// `up_to` inclusive; together they give keyset paging over a stable snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedTaskQuery {
    pub attempt_below: Option<u32>,
    pub after: Option<FailedTaskId>,
    pub up_to: Option<FailedTaskId>,
    pub limit: usize,
}

impl FailedTaskQuery {
    pub fn attempt_below(ceiling: u32, limit: usize) -> Self {
        Self {
            attempt_below: Some(ceiling),
            after: None,
            up_to: None,
            limit,
        }
    }

    pub fn matches(&self, record: &FailedTaskRecord) -> bool {
        self.attempt_below.is_none_or(|c| record.attempt < c)
            && self.after.is_none_or(|a| record.id > a)
            && self.up_to.is_none_or(|u| record.id <= u)
    }
}

#[async_trait]
pub trait FailureStore: Send + Sync {
    async fn create(&self, new: NewFailedTask) -> Result<FailedTaskRecord, StoreError>;

    async fn query(&self, query: &FailedTaskQuery) -> Result<Vec<FailedTaskRecord>, StoreError>;

    /// Deleting a record that no longer exists is not an error.
    async fn delete(&self, record: &FailedTaskRecord) -> Result<(), StoreError>;

    async fn delete_many(&self, ids: &[FailedTaskId]) -> Result<usize, StoreError>;

    async fn latest_id(&self) -> Result<Option<FailedTaskId>, StoreError>;

    async fn count(&self) -> Result<u64, StoreError>;

    /// Newest first, for operator views.
    async fn list_page(&self, offset: usize, limit: usize) -> Result<Vec<FailedTaskRecord>, StoreError>;

    async fn clear(&self) -> Result<u64, StoreError>;
}

/// Lazy, finite sequence of failed records below an attempt ceiling.
///
/// The upper bound is pinned to the newest id at construction, so records
/// created while the stream is consumed (e.g. a resubmitted task failing
/// again) are not picked up by the same pass. It is not a live cursor: to
/// restart, open a new stream, which re-issues the query from the beginning.
pub struct FailedTaskStream<'a> {
    store: &'a dyn FailureStore,
    query: FailedTaskQuery,
    exhausted: bool,
}

impl<'a> FailedTaskStream<'a> {
    pub async fn open(
        store: &'a dyn FailureStore,
        ceiling: u32,
        batch_size: usize,
    ) -> Result<Self, StoreError> {
        let up_to = store.latest_id().await?;
        let mut query = FailedTaskQuery::attempt_below(ceiling, batch_size.max(1));
        query.up_to = up_to;
        Ok(Self {
            store,
            exhausted: up_to.is_none(),
            query,
        })
    }

    /// Next page, or an empty vec once the sequence is exhausted.
    pub async fn next_batch(&mut self) -> Result<Vec<FailedTaskRecord>, StoreError> {
        if self.exhausted {
            return Ok(Vec::new());
        }
        let batch = self.store.query(&self.query).await?;
        match batch.last() {
            Some(last) if batch.len() >= self.query.limit => self.query.after = Some(last.id),
            _ => self.exhausted = true,
        }
        Ok(batch)
    }
}

/// `listByAttemptLessThan(ceiling)` as a one-shot helper.
pub async fn list_by_attempt_less_than<'a>(
    store: &'a dyn FailureStore,
    ceiling: u32,
    batch_size: usize,
) -> Result<FailedTaskStream<'a>, StoreError> {
    FailedTaskStream::open(store, ceiling, batch_size).await
}
