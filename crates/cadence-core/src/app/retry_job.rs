//! FailedTaskRetryJob - 失敗タスクを再投入する cron job
//!
//! `attempt < max_attempt` の記録を古い順に batch 単位で読み、
//! attempt + 1 で投入してから削除する。削除は batch ごとにまとめて確定する。
//! 途中でクラッシュした場合、確定前の batch 分は次回もう一度投入される（at-least-once）。

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info};

use super::status::{RuntimeCounters, bump};
use crate::domain::errors::JobError;
use crate::domain::FailedTaskId;
use crate::ports::{FailureStore, list_by_attempt_less_than};
use crate::typed::{CronJob, JobContext};

pub const FAILED_TASK_RETRY: &str = "failed_task_retry";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetrySettings {
    pub schedule: String,
    /// Records with `attempt` below this are retried.
    pub max_attempt: u32,
    pub batch_size: usize,
    /// Pause between two resubmissions.
    pub throttle: Duration,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            schedule: "@EveryMinute10".to_string(),
            max_attempt: 1,
            batch_size: 10,
            throttle: Duration::from_millis(10),
        }
    }
}

pub struct FailedTaskRetryJob {
    store: Arc<dyn FailureStore>,
    settings: RetrySettings,
    counters: Arc<RuntimeCounters>,
}

impl FailedTaskRetryJob {
    pub fn new(store: Arc<dyn FailureStore>, settings: RetrySettings, counters: Arc<RuntimeCounters>) -> Self {
        Self {
            store,
            settings,
            counters,
        }
    }

    pub fn settings(&self) -> &RetrySettings {
        &self.settings
    }

    async fn flush(&self, done: &mut Vec<FailedTaskId>) -> Result<(), JobError> {
        if done.is_empty() {
            return Ok(());
        }
        let removed = self.store.delete_many(done).await?;
        debug!(removed, "flushed resubmitted failed tasks");
        done.clear();
        Ok(())
    }
}

#[async_trait]
impl CronJob for FailedTaskRetryJob {
    fn identifier(&self) -> &str {
        FAILED_TASK_RETRY
    }

    fn schedule(&self) -> &str {
        &self.settings.schedule
    }

    async fn run(&self, ctx: &JobContext) -> Result<(), JobError> {
        let mut stream =
            list_by_attempt_less_than(self.store.as_ref(), self.settings.max_attempt, self.settings.batch_size)
                .await?;
        let mut resubmitted = 0usize;

        loop {
            let batch = stream.next_batch().await?;
            if batch.is_empty() {
                break;
            }

            let mut done = Vec::with_capacity(batch.len());
            for record in &batch {
                if let Err(e) = ctx.dispatcher.submit(record.resubmission()).await {
                    // 投入できた分は消してから抜ける
                    self.flush(&mut done).await?;
                    return Err(e.into());
                }
                done.push(record.id);
                resubmitted += 1;
                bump(&self.counters.tasks_resubmitted);

                if !self.settings.throttle.is_zero() {
                    tokio::time::sleep(self.settings.throttle).await;
                }
            }
            self.flush(&mut done).await?;
        }

        info!(
            resubmitted,
            max_attempt = self.settings.max_attempt,
            "failed task retry finished"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::executor::TaskExecutor;
    use crate::app::queue::TaskQueue;
    use crate::domain::errors::DispatchError;
    use crate::domain::{NewFailedTask, TaskRequest};
    use crate::impls::MemoryFailureStore;
    use crate::ports::{SystemClock, TaskDispatcher};
    use crate::typed::testing::{Echo, FlakyHandler};
    use crate::typed::{PayloadCodec, Task, TaskRegistry};
    use chrono::Utc;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingDispatcher {
        submitted: Mutex<Vec<TaskRequest>>,
        fail_after: Option<usize>,
    }

    #[async_trait]
    impl TaskDispatcher for RecordingDispatcher {
        async fn submit(&self, request: TaskRequest) -> Result<(), DispatchError> {
            let mut submitted = self.submitted.lock().unwrap();
            if self.fail_after.is_some_and(|n| submitted.len() >= n) {
                return Err(DispatchError::Closed);
            }
            submitted.push(request);
            Ok(())
        }
    }

    fn ctx(dispatcher: Arc<dyn TaskDispatcher>) -> JobContext {
        JobContext {
            dispatcher,
            clock: Arc::new(SystemClock),
            scheduled_for: Utc::now(),
        }
    }

    fn settings(max_attempt: u32, batch_size: usize) -> RetrySettings {
        RetrySettings {
            max_attempt,
            batch_size,
            throttle: Duration::ZERO,
            ..RetrySettings::default()
        }
    }

    async fn seed(store: &MemoryFailureStore, name: &str, attempt: u32) {
        let payload = PayloadCodec::encode(&Echo {
            message: name.to_string(),
        })
        .unwrap();
        let request = TaskRequest::new(Echo::IDENTIFIER, payload).with_attempt(attempt);
        store
            .create(NewFailedTask::from_request(&request, "boom"))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn resubmits_only_records_below_the_ceiling() {
        let store = Arc::new(MemoryFailureStore::new());
        seed(&store, "a", 0).await;
        seed(&store, "b", 0).await;
        seed(&store, "c", 1).await;

        let counters = Arc::new(RuntimeCounters::default());
        let job = FailedTaskRetryJob::new(store.clone(), settings(1, 10), counters.clone());
        let dispatcher = Arc::new(RecordingDispatcher::default());
        job.run(&ctx(dispatcher.clone())).await.unwrap();

        let submitted = dispatcher.submitted.lock().unwrap().clone();
        assert_eq!(submitted.len(), 2);
        assert!(submitted.iter().all(|r| r.attempt == 1));
        let decoded: Vec<String> = submitted
            .iter()
            .map(|r| PayloadCodec::decode::<Echo>(&r.payload).unwrap().message)
            .collect();
        assert_eq!(decoded, vec!["a", "b"]);

        // attempt が上限未満の記録は残らない
        let remaining = store.snapshot();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].attempt, 1);
        assert_eq!(counters.tasks_resubmitted.load(std::sync::atomic::Ordering::Relaxed), 2);
    }

    #[tokio::test]
    async fn walks_every_batch() {
        let store = Arc::new(MemoryFailureStore::new());
        for i in 0..7 {
            seed(&store, &format!("t{i}"), 0).await;
        }

        let job = FailedTaskRetryJob::new(store.clone(), settings(1, 3), Arc::default());
        let dispatcher = Arc::new(RecordingDispatcher::default());
        job.run(&ctx(dispatcher.clone())).await.unwrap();

        assert_eq!(dispatcher.submitted.lock().unwrap().len(), 7);
        assert!(store.snapshot().is_empty());
    }

    #[tokio::test]
    async fn dispatch_error_keeps_unsent_records() {
        let store = Arc::new(MemoryFailureStore::new());
        for i in 0..5 {
            seed(&store, &format!("t{i}"), 0).await;
        }

        let job = FailedTaskRetryJob::new(store.clone(), settings(1, 10), Arc::default());
        let dispatcher = Arc::new(RecordingDispatcher {
            fail_after: Some(2),
            ..RecordingDispatcher::default()
        });
        let err = job.run(&ctx(dispatcher.clone())).await.unwrap_err();

        assert!(matches!(err, JobError::Dispatch(DispatchError::Closed)));
        // 投入済みの 2 件だけ消えている
        assert_eq!(store.snapshot().len(), 3);
    }

    #[tokio::test]
    async fn refailing_task_is_not_picked_up_again_in_the_same_run() {
        let store = Arc::new(MemoryFailureStore::new());
        seed(&store, "a", 0).await;

        let counters = Arc::new(RuntimeCounters::default());
        let mut registry = TaskRegistry::new();
        registry.register::<Echo, _>(FlakyHandler::failing_forever()).unwrap();
        let executor = Arc::new(TaskExecutor::new(Arc::new(registry), store.clone(), counters.clone()));
        let queue: Arc<dyn TaskDispatcher> = Arc::new(TaskQueue::inline(executor, counters.clone()));

        let job = FailedTaskRetryJob::new(store.clone(), settings(5, 10), counters);
        job.run(&ctx(queue)).await.unwrap();

        let remaining = store.snapshot();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].attempt, 1);
        assert_eq!(remaining[0].identifier, Echo::IDENTIFIER);
    }

    #[tokio::test]
    async fn empty_store_is_a_no_op() {
        let store = Arc::new(MemoryFailureStore::new());
        let job = FailedTaskRetryJob::new(store, settings(1, 10), Arc::default());
        let dispatcher = Arc::new(RecordingDispatcher::default());
        job.run(&ctx(dispatcher.clone())).await.unwrap();
        assert!(dispatcher.submitted.lock().unwrap().is_empty());
        assert_eq!(job.identifier(), FAILED_TASK_RETRY);
        assert_eq!(job.schedule(), "@EveryMinute10");
    }
}
