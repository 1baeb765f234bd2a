//! Runtime - サーバプロセス 1 つ分のコンテキスト
//!
//! registry, queue, scheduler, store, カウンタをまとめて持つ。
//! グローバルな状態は持たず、必要なところへ `Arc<Runtime>` を渡す。
//!
//! `start()` で有効な部品だけを起動する:
//! - `worker.task` → WorkerPool（sync mode では起動しない）
//! - `worker.cron` → CronScheduler の tick loop
//! - `control.enabled` → ControlServer

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::json;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use super::control::{ControlServer, ControlTarget};
use super::executor::TaskExecutor;
use super::queue::{TaskQueue, WorkerPool};
use super::scheduler::CronScheduler;
use super::shutdown::ShutdownSignal;
use super::status::{MetricsSnapshot, RuntimeCounters};
use crate::config::RuntimeConfig;
use crate::domain::errors::{ControlError, DispatchError};
use crate::domain::TaskRequest;
use crate::ports::{Clock, FailureStore, TaskDispatcher};
use crate::typed::{PayloadCodec, Task, TaskRegistry};

#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    #[error("runtime already started")]
    AlreadyStarted,

    #[error("control channel: {0}")]
    Control(#[from] ControlError),
}

pub struct Runtime {
    config: RuntimeConfig,
    registry: Arc<TaskRegistry>,
    queue: TaskQueue,
    receiver: Mutex<Option<mpsc::Receiver<TaskRequest>>>,
    executor: Arc<TaskExecutor>,
    scheduler: Arc<CronScheduler>,
    store: Arc<dyn FailureStore>,
    counters: Arc<RuntimeCounters>,
    clock: Arc<dyn Clock>,
    shutdown: ShutdownSignal,
    started: AtomicBool,
    started_at: DateTime<Utc>,
}

impl Runtime {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        config: RuntimeConfig,
        registry: Arc<TaskRegistry>,
        queue: TaskQueue,
        receiver: Option<mpsc::Receiver<TaskRequest>>,
        executor: Arc<TaskExecutor>,
        scheduler: Arc<CronScheduler>,
        store: Arc<dyn FailureStore>,
        counters: Arc<RuntimeCounters>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let started_at = clock.now();
        Self {
            config,
            registry,
            queue,
            receiver: Mutex::new(receiver),
            executor,
            scheduler,
            store,
            counters,
            clock,
            shutdown: ShutdownSignal::new(),
            started: AtomicBool::new(false),
            started_at,
        }
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn registry(&self) -> &TaskRegistry {
        &self.registry
    }

    pub fn store(&self) -> Arc<dyn FailureStore> {
        Arc::clone(&self.store)
    }

    pub fn scheduler(&self) -> &Arc<CronScheduler> {
        &self.scheduler
    }

    pub fn counters(&self) -> &RuntimeCounters {
        &self.counters
    }

    pub fn shutdown_signal(&self) -> ShutdownSignal {
        self.shutdown.clone()
    }

    /// Encodes `task` and enqueues it.
    pub async fn dispatch<T: Task>(&self, task: &T) -> Result<(), DispatchError> {
        let payload = PayloadCodec::encode(task).map_err(|e| DispatchError::Encode {
            identifier: T::IDENTIFIER.to_string(),
            reason: e.to_string(),
        })?;
        self.submit(TaskRequest::new(T::IDENTIFIER, payload)).await
    }

    /// Untyped dispatch, for callers that only know the identifier.
    pub async fn dispatch_value(&self, identifier: &str, value: &serde_json::Value) -> Result<(), DispatchError> {
        self.submit(TaskRequest::new(identifier, PayloadCodec::encode_value(value)))
            .await
    }

    pub async fn submit(&self, request: TaskRequest) -> Result<(), DispatchError> {
        self.queue.submit(request).await
    }

    pub fn metrics_snapshot(&self) -> MetricsSnapshot {
        self.counters.snapshot(self.started_at, self.clock.now())
    }

    /// `{"server": ..., "metrics": ...}` as served by `getMetrics`.
    pub fn metrics_document(&self) -> serde_json::Value {
        json!({
            "server": self.config.server,
            "metrics": self.metrics_snapshot(),
        })
    }

    pub fn shutdown(&self) {
        self.shutdown.trigger();
    }

    /// Starts the enabled components. Can be called once.
    pub async fn start(self: &Arc<Self>) -> Result<RuntimeHandle, RuntimeError> {
        if self.started.swap(true, Ordering::AcqRel) {
            return Err(RuntimeError::AlreadyStarted);
        }
        let receiver = self
            .receiver
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .take();

        let mut handle = RuntimeHandle {
            shutdown: self.shutdown.clone(),
            workers: None,
            scheduler: None,
            control: None,
            control_addr: None,
        };

        if self.config.control.enabled {
            let target: Arc<dyn ControlTarget> = self.clone();
            let server =
                ControlServer::bind(&self.config.control.address, target, Arc::clone(&self.counters)).await?;
            handle.control_addr = Some(server.local_addr()?);
            handle.control = Some(tokio::spawn(server.serve(self.shutdown.clone())));
        }

        if self.config.worker.task {
            if let Some(receiver) = receiver {
                handle.workers = Some(WorkerPool::spawn(
                    self.config.worker.task_workers,
                    receiver,
                    Arc::clone(&self.executor),
                ));
            }
        } else if !self.queue.is_inline() {
            warn!("task workers disabled; dispatched tasks stay queued");
        }

        if self.config.worker.cron {
            handle.scheduler = Some(tokio::spawn(
                Arc::clone(&self.scheduler).run(self.shutdown.clone()),
            ));
        }

        info!(
            name = %self.config.server.name,
            environment = %self.config.server.environment,
            workers = handle.workers.as_ref().map_or(0, WorkerPool::len),
            cron = handle.scheduler.is_some(),
            control = ?handle.control_addr,
            "runtime started"
        );
        Ok(handle)
    }
}

#[async_trait]
impl ControlTarget for Runtime {
    fn request_shutdown(&self) {
        self.shutdown();
    }

    async fn resubmit(&self, request: TaskRequest) -> bool {
        match self.submit(request).await {
            Ok(()) => true,
            Err(e) => {
                warn!(error = %e, "control retry rejected");
                false
            }
        }
    }

    fn metrics(&self) -> serde_json::Value {
        self.metrics_document()
    }
}

/// Running components of a started `Runtime`.
pub struct RuntimeHandle {
    shutdown: ShutdownSignal,
    workers: Option<WorkerPool>,
    scheduler: Option<JoinHandle<()>>,
    control: Option<JoinHandle<()>>,
    control_addr: Option<SocketAddr>,
}

impl RuntimeHandle {
    /// Bound address of the control listener (useful with port 0).
    pub fn control_addr(&self) -> Option<SocketAddr> {
        self.control_addr
    }

    /// Waits for a shutdown request, then stops everything.
    /// Queued tasks are drained before the workers exit.
    pub async fn wait(self) {
        self.shutdown.wait().await;

        for (name, join) in [("scheduler", self.scheduler), ("control", self.control)] {
            if let Some(join) = join
                && let Err(e) = join.await
            {
                warn!(component = name, error = %e, "component exited abnormally");
            }
        }
        if let Some(workers) = self.workers {
            workers.shutdown_and_join().await;
        }
        info!("runtime stopped");
    }

    pub async fn shutdown_and_join(self) {
        self.shutdown.trigger();
        self.wait().await;
    }
}
