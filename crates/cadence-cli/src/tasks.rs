//! サーバに登録するタスクと cron job
//!
//! 実運用ではここをアプリケーション側のタスクに差し替える。

use std::sync::Arc;

use async_trait::async_trait;
use cadence_core::AppBuilder;
use cadence_core::domain::{JobError, TaskFailure};
use cadence_core::typed::{CronJob, Handler, JobContext, RegistryError, Task};
use serde::{Deserialize, Serialize};
use tracing::info;

#[derive(Debug, Serialize, Deserialize)]
pub struct EchoTask {
    pub message: String,
}

impl Task for EchoTask {
    const IDENTIFIER: &'static str = "demo.echo";
}

pub struct EchoHandler;

#[async_trait]
impl Handler<EchoTask> for EchoHandler {
    async fn handle(&self, task: EchoTask) -> Result<(), TaskFailure> {
        info!(message = %task.message, "echo");
        Ok(())
    }
}

/// Fails when `fail` is set. Used to try out the retry path.
#[derive(Debug, Serialize, Deserialize)]
pub struct FlakyTask {
    pub label: String,
    #[serde(default)]
    pub fail: bool,
}

impl Task for FlakyTask {
    const IDENTIFIER: &'static str = "demo.flaky";
}

pub struct FlakyHandler;

#[async_trait]
impl Handler<FlakyTask> for FlakyHandler {
    async fn handle(&self, task: FlakyTask) -> Result<(), TaskFailure> {
        if task.fail {
            return Err(TaskFailure::new(format!("{} refused to run", task.label)));
        }
        info!(label = %task.label, "flaky task passed");
        Ok(())
    }
}

/// Dispatches one `EchoTask` every minute.
pub struct HeartbeatJob;

#[async_trait]
impl CronJob for HeartbeatJob {
    fn identifier(&self) -> &str {
        "demo.heartbeat"
    }

    fn schedule(&self) -> &str {
        "@EveryMinute"
    }

    async fn run(&self, ctx: &JobContext) -> Result<(), JobError> {
        ctx.dispatch(&EchoTask {
            message: format!("heartbeat {}", ctx.scheduled_for.format("%H:%M")),
        })
        .await?;
        Ok(())
    }
}

pub fn register(builder: AppBuilder) -> Result<AppBuilder, RegistryError> {
    builder
        .register::<EchoTask, _>(EchoHandler)?
        .register::<FlakyTask, _>(FlakyHandler)?
        .register_job(Arc::new(HeartbeatJob))
}
