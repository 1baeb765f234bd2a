//! TaskQueue と WorkerPool
//!
//! - **TaskQueue**: 投入口。通常は bounded mpsc に積むだけで返る。
//!   sync mode（テスト用）では呼び出し元のタスク上でそのまま実行する。
//! - **WorkerPool**: mpsc から取り出して TaskExecutor に渡す worker 群。
//!   shutdown 後は新規の待ち受けをやめ、キューに残った分を流し切って終了する。

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{Mutex, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::executor::TaskExecutor;
use super::status::{RuntimeCounters, bump};
use crate::domain::errors::DispatchError;
use crate::domain::TaskRequest;
use crate::ports::TaskDispatcher;

#[derive(Clone)]
pub enum TaskQueue {
    /// Runs the task before `submit` returns.
    Inline {
        executor: Arc<TaskExecutor>,
        counters: Arc<RuntimeCounters>,
    },
    /// Hands the task to the worker pool.
    Channel {
        sender: mpsc::Sender<TaskRequest>,
        counters: Arc<RuntimeCounters>,
    },
}

impl TaskQueue {
    pub fn inline(executor: Arc<TaskExecutor>, counters: Arc<RuntimeCounters>) -> Self {
        Self::Inline { executor, counters }
    }

    pub fn channel(capacity: usize, counters: Arc<RuntimeCounters>) -> (Self, mpsc::Receiver<TaskRequest>) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        (Self::Channel { sender, counters }, receiver)
    }

    pub fn is_inline(&self) -> bool {
        matches!(self, Self::Inline { .. })
    }
}

#[async_trait]
impl TaskDispatcher for TaskQueue {
    async fn submit(&self, request: TaskRequest) -> Result<(), DispatchError> {
        match self {
            Self::Inline { executor, counters } => {
                bump(&counters.tasks_dispatched);
                // 結果は executor 側で記録・ログ済み
                let _ = executor.execute(request).await;
                Ok(())
            }
            Self::Channel { sender, counters } => {
                sender.send(request).await.map_err(|_| DispatchError::Closed)?;
                bump(&counters.tasks_dispatched);
                Ok(())
            }
        }
    }
}

/// Worker pool handle.
///
/// Dropping the handle stops the workers. `request_shutdown()` stops
/// taking new requests once the queue is drained; `shutdown_and_join()`
/// also waits for every worker to exit.
pub struct WorkerPool {
    shutdown_tx: watch::Sender<bool>,
    joins: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawn `n` workers sharing one receiver.
    pub fn spawn(n: usize, receiver: mpsc::Receiver<TaskRequest>, executor: Arc<TaskExecutor>) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let receiver = Arc::new(Mutex::new(receiver));

        let mut joins = Vec::with_capacity(n.max(1));
        for worker_id in 0..n.max(1) {
            let rx = Arc::clone(&receiver);
            let ex = Arc::clone(&executor);
            let mut stop = shutdown_rx.clone();

            joins.push(tokio::spawn(async move {
                worker_loop(worker_id, rx, ex, &mut stop).await;
            }));
        }

        Self { shutdown_tx, joins }
    }

    pub fn len(&self) -> usize {
        self.joins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.joins.is_empty()
    }

    /// In-flight tasks are not cancelled; workers drain what is queued, then exit.
    pub fn request_shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    pub async fn shutdown_and_join(self) {
        self.request_shutdown();
        for join in self.joins {
            if let Err(e) = join.await {
                warn!(error = %e, "worker exited abnormally");
            }
        }
    }
}

async fn worker_loop(
    worker_id: usize,
    receiver: Arc<Mutex<mpsc::Receiver<TaskRequest>>>,
    executor: Arc<TaskExecutor>,
    stop: &mut watch::Receiver<bool>,
) {
    loop {
        if *stop.borrow() {
            break;
        }

        let request = tokio::select! {
            changed = stop.changed() => {
                // pool が drop された場合も停止扱い
                if changed.is_err() {
                    break;
                }
                continue;
            }
            request = async { receiver.lock().await.recv().await } => request,
        };

        let Some(request) = request else {
            debug!(worker_id, "task channel closed");
            return;
        };
        let _ = executor.execute(request).await;
    }

    // 停止要求後: 残っている分だけ処理して抜ける
    loop {
        let next = receiver.lock().await.try_recv();
        match next {
            Ok(request) => {
                let _ = executor.execute(request).await;
            }
            Err(_) => break,
        }
    }
    debug!(worker_id, "worker stopped");
}
