//! TaskExecutor - TaskRequest を 1 件実行する
//!
//! # フロー
//! 1. identifier で handler を引く（なければ NotFound: 記録しない）
//! 2. payload を decode して handler 実行（panic も失敗として捕捉）
//! 3. 成功 → info ログ / 失敗 → FailureStore に記録してから error ログ
//!
//! 失敗は呼び出し元（worker）に返すだけで、再送はしない。
//! 再送は retry job の責務。

use std::any::Any;
use std::sync::Arc;

use tracing::{error, info};

use super::status::{InFlight, RuntimeCounters, bump};
use crate::domain::errors::ExecuteError;
use crate::domain::{NewFailedTask, TaskRequest};
use crate::ports::FailureStore;
use crate::typed::{HandlerError, TaskRegistry};

pub struct TaskExecutor {
    registry: Arc<TaskRegistry>,
    store: Arc<dyn FailureStore>,
    counters: Arc<RuntimeCounters>,
}

impl TaskExecutor {
    pub fn new(
        registry: Arc<TaskRegistry>,
        store: Arc<dyn FailureStore>,
        counters: Arc<RuntimeCounters>,
    ) -> Self {
        Self {
            registry,
            store,
            counters,
        }
    }

    pub fn registry(&self) -> &TaskRegistry {
        &self.registry
    }

    pub async fn execute(&self, request: TaskRequest) -> Result<(), ExecuteError> {
        let Some(handler) = self.registry.get(&request.identifier) else {
            bump(&self.counters.tasks_not_found);
            error!(
                identifier = %request.identifier,
                attempt = request.attempt,
                "task not found"
            );
            return Err(ExecuteError::NotFound {
                identifier: request.identifier,
            });
        };

        let _in_flight = InFlight::enter(&self.counters.tasks_in_flight);

        // handler の panic で worker が巻き込まれないよう別タスクで実行する
        let payload = request.payload.clone();
        let joined = tokio::spawn(async move { handler.handle_dyn(&payload).await }).await;

        let err = match joined {
            Ok(Ok(())) => {
                bump(&self.counters.tasks_succeeded);
                info!(
                    identifier = %request.identifier,
                    attempt = request.attempt,
                    "task succeeded"
                );
                return Ok(());
            }
            Ok(Err(HandlerError::Decode(e))) => ExecuteError::Decode {
                identifier: request.identifier.clone(),
                reason: e.to_string(),
            },
            Ok(Err(HandlerError::Failed(failure))) => ExecuteError::Failed {
                identifier: request.identifier.clone(),
                attempt: request.attempt,
                reason: failure.0,
            },
            Err(join) => ExecuteError::Failed {
                identifier: request.identifier.clone(),
                attempt: request.attempt,
                reason: if join.is_panic() {
                    format!("panicked: {}", panic_message(join.into_panic()))
                } else {
                    "cancelled".to_string()
                },
            },
        };

        bump(&self.counters.tasks_failed);
        self.record_failure(&request, &err).await;
        error!(
            identifier = %request.identifier,
            attempt = request.attempt,
            reason = %err.reason(),
            "task failed"
        );
        Err(err)
    }

    /// Store errors are logged and the record is dropped; the worker keeps going.
    async fn record_failure(&self, request: &TaskRequest, err: &ExecuteError) {
        if !err.is_recorded() {
            return;
        }
        let new = NewFailedTask::from_request(request, err.reason());
        if let Err(store_err) = self.store.create(new).await {
            bump(&self.counters.failure_records_dropped);
            error!(
                identifier = %request.identifier,
                attempt = request.attempt,
                error = %store_err,
                "failed to record task failure; record dropped"
            );
        }
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::errors::StoreError;
    use crate::domain::{FailedTaskId, FailedTaskRecord, Payload};
    use crate::impls::MemoryFailureStore;
    use crate::ports::FailedTaskQuery;
    use crate::typed::testing::{Echo, EchoHandler, Explode, FlakyHandler, PanicHandler};
    use crate::typed::{PayloadCodec, Task};
    use async_trait::async_trait;
    use std::sync::atomic::Ordering;

    fn echo(message: &str, attempt: u32) -> TaskRequest {
        let payload = PayloadCodec::encode(&Echo {
            message: message.into(),
        })
        .unwrap();
        TaskRequest::new(Echo::IDENTIFIER, payload).with_attempt(attempt)
    }

    fn executor_with(registry: TaskRegistry) -> (TaskExecutor, Arc<MemoryFailureStore>, Arc<RuntimeCounters>) {
        let store = Arc::new(MemoryFailureStore::new());
        let counters = Arc::new(RuntimeCounters::default());
        let executor = TaskExecutor::new(Arc::new(registry), store.clone(), counters.clone());
        (executor, store, counters)
    }

    #[tokio::test]
    async fn success_leaves_no_record() {
        let mut registry = TaskRegistry::new();
        let (handler, seen) = EchoHandler::new();
        registry.register::<Echo, _>(handler).unwrap();
        let (executor, store, counters) = executor_with(registry);

        executor.execute(echo("hello", 0)).await.unwrap();

        assert_eq!(*seen.lock().unwrap(), vec!["hello".to_string()]);
        assert!(store.snapshot().is_empty());
        assert_eq!(counters.tasks_succeeded.load(Ordering::Relaxed), 1);
        assert_eq!(counters.tasks_in_flight.load(Ordering::Relaxed), 0);
    }

    #[tokio::test]
    async fn unregistered_task_fails_fast_without_a_record() {
        let (executor, store, counters) = executor_with(TaskRegistry::new());

        let err = executor.execute(echo("x", 0)).await.unwrap_err();

        assert_eq!(
            err,
            ExecuteError::NotFound {
                identifier: Echo::IDENTIFIER.into()
            }
        );
        assert!(store.snapshot().is_empty());
        assert_eq!(counters.tasks_not_found.load(Ordering::Relaxed), 1);
        assert_eq!(counters.tasks_failed.load(Ordering::Relaxed), 0);
    }

    #[tokio::test]
    async fn failure_creates_exactly_one_record_with_the_same_attempt() {
        let mut registry = TaskRegistry::new();
        registry.register::<Echo, _>(FlakyHandler::failing_forever()).unwrap();
        let (executor, store, _) = executor_with(registry);

        let err = executor.execute(echo("x", 3)).await.unwrap_err();
        assert!(matches!(err, ExecuteError::Failed { attempt: 3, .. }));

        let records = store.snapshot();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].identifier, Echo::IDENTIFIER);
        assert_eq!(records[0].attempt, 3);
        assert!(records[0].failure_reason.contains("intentional failure"));
        assert_eq!(records[0].payload, Some(echo("x", 3).payload));
    }

    #[tokio::test]
    async fn undecodable_payload_is_recorded() {
        let mut registry = TaskRegistry::new();
        registry.register::<Echo, _>(EchoHandler::new().0).unwrap();
        let (executor, store, _) = executor_with(registry);

        let request = TaskRequest::new(Echo::IDENTIFIER, Payload::from_bytes("{oops"));
        let err = executor.execute(request).await.unwrap_err();

        assert!(matches!(err, ExecuteError::Decode { .. }));
        assert_eq!(store.snapshot().len(), 1);
    }

    #[tokio::test]
    async fn panic_is_captured_as_failure() {
        let mut registry = TaskRegistry::new();
        registry.register::<Explode, _>(PanicHandler).unwrap();
        let (executor, store, counters) = executor_with(registry);

        let payload = PayloadCodec::encode(&Explode {
            reason: "kaboom".into(),
        })
        .unwrap();
        let err = executor
            .execute(TaskRequest::new(Explode::IDENTIFIER, payload))
            .await
            .unwrap_err();

        assert!(err.reason().contains("kaboom"));
        assert_eq!(store.snapshot().len(), 1);
        assert_eq!(counters.tasks_in_flight.load(Ordering::Relaxed), 0);
    }

    struct DownStore;

    #[async_trait]
    impl FailureStore for DownStore {
        async fn create(&self, _new: NewFailedTask) -> Result<FailedTaskRecord, StoreError> {
            Err(StoreError::Unavailable("connection refused".into()))
        }
        async fn query(&self, _q: &FailedTaskQuery) -> Result<Vec<FailedTaskRecord>, StoreError> {
            Err(StoreError::Unavailable("connection refused".into()))
        }
        async fn delete(&self, _r: &FailedTaskRecord) -> Result<(), StoreError> {
            Err(StoreError::Unavailable("connection refused".into()))
        }
        async fn delete_many(&self, _ids: &[FailedTaskId]) -> Result<usize, StoreError> {
            Err(StoreError::Unavailable("connection refused".into()))
        }
        async fn latest_id(&self) -> Result<Option<FailedTaskId>, StoreError> {
            Err(StoreError::Unavailable("connection refused".into()))
        }
        async fn count(&self) -> Result<u64, StoreError> {
            Err(StoreError::Unavailable("connection refused".into()))
        }
        async fn list_page(&self, _o: usize, _l: usize) -> Result<Vec<FailedTaskRecord>, StoreError> {
            Err(StoreError::Unavailable("connection refused".into()))
        }
        async fn clear(&self) -> Result<u64, StoreError> {
            Err(StoreError::Unavailable("connection refused".into()))
        }
    }

    #[tokio::test]
    async fn unreachable_store_drops_the_record_without_crashing() {
        let mut registry = TaskRegistry::new();
        registry.register::<Echo, _>(FlakyHandler::failing_forever()).unwrap();
        let counters = Arc::new(RuntimeCounters::default());
        let executor = TaskExecutor::new(Arc::new(registry), Arc::new(DownStore), counters.clone());

        let err = executor.execute(echo("x", 0)).await.unwrap_err();

        assert!(matches!(err, ExecuteError::Failed { .. }));
        assert_eq!(counters.failure_records_dropped.load(Ordering::Relaxed), 1);
    }
}
