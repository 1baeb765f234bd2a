//! dispatch → 失敗記録 → retry job による再投入までを通しで確認する

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use cadence_core::app::{FAILED_TASK_RETRY, JobRunOutcome};
use cadence_core::domain::TaskFailure;
use cadence_core::ports::FailureStore;
use cadence_core::typed::{Handler, Task};
use cadence_core::{AppBuilder, RuntimeConfig};
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize)]
struct Charge {
    cents: u64,
}

impl Task for Charge {
    const IDENTIFIER: &'static str = "it.charge";
}

/// Fails the first `failures` calls.
#[derive(Clone)]
struct ChargeHandler {
    failures: Arc<AtomicU32>,
    calls: Arc<AtomicU32>,
}

impl ChargeHandler {
    fn failing(times: u32) -> Self {
        Self {
            failures: Arc::new(AtomicU32::new(times)),
            calls: Arc::new(AtomicU32::new(0)),
        }
    }
}

#[async_trait]
impl Handler<Charge> for ChargeHandler {
    async fn handle(&self, _task: Charge) -> Result<(), TaskFailure> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let left = self.failures.load(Ordering::SeqCst);
        if left > 0 {
            self.failures.fetch_sub(1, Ordering::SeqCst);
            return Err(TaskFailure::new("gateway timeout"));
        }
        Ok(())
    }
}

fn config(database: Option<std::path::PathBuf>) -> RuntimeConfig {
    let mut config = RuntimeConfig::default();
    config.worker.sync_mode = true;
    config.worker.cron = false;
    config.control.enabled = false;
    config.failed_task.throttle_ms = 0;
    config.storage.database_path = database;
    config
}

#[tokio::test]
async fn successful_task_leaves_no_record() {
    let handler = ChargeHandler::failing(0);
    let runtime = AppBuilder::new(config(None))
        .register::<Charge, _>(handler.clone())
        .unwrap()
        .build()
        .unwrap();

    runtime.dispatch(&Charge { cents: 500 }).await.unwrap();

    assert_eq!(handler.calls.load(Ordering::SeqCst), 1);
    assert_eq!(runtime.store().count().await.unwrap(), 0);
}

#[tokio::test]
async fn failed_task_is_retried_once_by_the_retry_job() {
    let dir = tempfile::tempdir().unwrap();
    let handler = ChargeHandler::failing(1);
    let runtime = AppBuilder::new(config(Some(dir.path().join("cadence.db"))))
        .register::<Charge, _>(handler.clone())
        .unwrap()
        .build()
        .unwrap();

    runtime.dispatch(&Charge { cents: 500 }).await.unwrap();
    let records = runtime.store().list_page(0, 10).await.unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].attempt, 0);
    assert_eq!(records[0].failure_reason, "gateway timeout");

    let outcome = runtime.scheduler().run_now(FAILED_TASK_RETRY).await.unwrap();
    assert_eq!(outcome, JobRunOutcome::Succeeded);

    assert_eq!(handler.calls.load(Ordering::SeqCst), 2);
    assert_eq!(runtime.store().count().await.unwrap(), 0);
    assert_eq!(runtime.metrics_snapshot().tasks_resubmitted, 1);
}

#[tokio::test]
async fn retry_ceiling_stops_a_permanently_failing_task() {
    let handler = ChargeHandler::failing(u32::MAX);
    let runtime = AppBuilder::new(config(None))
        .register::<Charge, _>(handler.clone())
        .unwrap()
        .build()
        .unwrap();

    runtime.dispatch(&Charge { cents: 1 }).await.unwrap();
    for _ in 0..3 {
        runtime.scheduler().run_now(FAILED_TASK_RETRY).await.unwrap();
    }

    // attempt 0 → 1 で上限 (max_attempt = 1) に達し、以降は拾われない
    assert_eq!(handler.calls.load(Ordering::SeqCst), 2);
    let records = runtime.store().list_page(0, 10).await.unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].attempt, 1);
}

#[tokio::test]
async fn unknown_identifier_is_not_recorded() {
    let runtime = AppBuilder::new(config(None)).build().unwrap();

    runtime
        .dispatch_value("it.nobody", &serde_json::json!({ "x": 1 }))
        .await
        .unwrap();

    assert_eq!(runtime.store().count().await.unwrap(), 0);
    let snapshot = runtime.metrics_snapshot();
    assert_eq!(snapshot.tasks_not_found, 1);
    assert_eq!(snapshot.tasks_failed, 0);
}

#[tokio::test]
async fn worker_pool_runtime_drains_on_shutdown() {
    let handler = ChargeHandler::failing(0);
    let mut cfg = config(None);
    cfg.worker.sync_mode = false;
    cfg.worker.task_workers = 2;
    let runtime = AppBuilder::new(cfg)
        .register::<Charge, _>(handler.clone())
        .unwrap()
        .build()
        .unwrap();
    let handle = runtime.start().await.unwrap();

    for cents in 0..20 {
        runtime.dispatch(&Charge { cents }).await.unwrap();
    }
    tokio::time::timeout(Duration::from_secs(5), handle.shutdown_and_join())
        .await
        .unwrap();

    assert_eq!(handler.calls.load(Ordering::SeqCst), 20);
}
