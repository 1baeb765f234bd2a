//! `task failed retry` - 失敗レコードを稼働中のサーバへ taskRetry で送り直す
//!
//! サーバが `1` を返したレコードだけ削除する。`0` なら残して次回に回す。

use anyhow::Result;

use cadence_core::app::ControlClient;
use cadence_core::ports::{FailedTaskStream, FailureStore};

#[derive(Debug, Default, PartialEq, Eq)]
pub(crate) struct RetryTally {
    pub accepted: usize,
    pub rejected: usize,
}

pub(crate) async fn resubmit_failed(
    store: &dyn FailureStore,
    client: &mut ControlClient,
    batch_size: usize,
) -> Result<RetryTally> {
    let mut stream = FailedTaskStream::open(store, u32::MAX, batch_size).await?;
    let mut tally = RetryTally::default();
    loop {
        let batch = stream.next_batch().await?;
        if batch.is_empty() {
            return Ok(tally);
        }
        for record in batch {
            if client.task_retry(&record.resubmission()).await? {
                store.delete(&record).await?;
                tally.accepted += 1;
            } else {
                tally.rejected += 1;
            }
        }
    }
}
