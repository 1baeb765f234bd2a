//! テスト用の Task / Handler / CronJob

use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::job::{CronJob, JobContext};
use super::{Handler, Task};
use crate::domain::errors::{JobError, TaskFailure};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Echo {
    pub message: String,
}

impl Task for Echo {
    const IDENTIFIER: &'static str = "test.echo";
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Explode {
    pub reason: String,
}

impl Task for Explode {
    const IDENTIFIER: &'static str = "test.explode";
}

pub type Seen = Arc<Mutex<Vec<String>>>;

pub struct EchoHandler {
    seen: Seen,
}

impl EchoHandler {
    pub fn new() -> (Self, Seen) {
        let seen = Seen::default();
        (Self { seen: seen.clone() }, seen)
    }
}

#[async_trait]
impl Handler<Echo> for EchoHandler {
    async fn handle(&self, task: Echo) -> Result<(), TaskFailure> {
        self.seen.lock().unwrap().push(task.message);
        Ok(())
    }
}

/// Fails the first `n` calls, then succeeds.
pub struct FlakyHandler {
    remaining_failures: AtomicU32,
}

impl FlakyHandler {
    pub fn new(n: u32) -> Self {
        Self {
            remaining_failures: AtomicU32::new(n),
        }
    }

    pub fn failing_forever() -> Self {
        Self::new(u32::MAX)
    }
}

#[async_trait]
impl Handler<Echo> for FlakyHandler {
    async fn handle(&self, _task: Echo) -> Result<(), TaskFailure> {
        let left = self.remaining_failures.load(Ordering::Relaxed);
        if left > 0 {
            self.remaining_failures.fetch_sub(1, Ordering::Relaxed);
            return Err(TaskFailure::new(format!("intentional failure (left={left})")));
        }
        Ok(())
    }
}

pub struct PanicHandler;

#[async_trait]
impl Handler<Explode> for PanicHandler {
    async fn handle(&self, task: Explode) -> Result<(), TaskFailure> {
        panic!("{}", task.reason);
    }
}

/// Cron job that counts runs and the peak number of concurrent runs.
pub struct CountingJob {
    pub identifier: String,
    pub schedule: String,
    pub enabled: bool,
    pub hold: Duration,
    pub fail: bool,
    pub runs: Arc<AtomicUsize>,
    pub active: Arc<AtomicUsize>,
    pub max_active: Arc<AtomicUsize>,
}

impl CountingJob {
    pub fn new(identifier: &str, schedule: &str) -> Self {
        Self {
            identifier: identifier.to_string(),
            schedule: schedule.to_string(),
            enabled: true,
            hold: Duration::ZERO,
            fail: false,
            runs: Arc::default(),
            active: Arc::default(),
            max_active: Arc::default(),
        }
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    pub fn holding(mut self, hold: Duration) -> Self {
        self.hold = hold;
        self
    }

    pub fn failing(mut self) -> Self {
        self.fail = true;
        self
    }
}

#[async_trait]
impl CronJob for CountingJob {
    fn identifier(&self) -> &str {
        &self.identifier
    }

    fn schedule(&self) -> &str {
        &self.schedule
    }

    fn enabled(&self) -> bool {
        self.enabled
    }

    async fn run(&self, _ctx: &JobContext) -> Result<(), JobError> {
        let now_active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(now_active, Ordering::SeqCst);
        self.runs.fetch_add(1, Ordering::SeqCst);
        if !self.hold.is_zero() {
            tokio::time::sleep(self.hold).await;
        }
        self.active.fetch_sub(1, Ordering::SeqCst);
        if self.fail {
            return Err(JobError::Failed("counting job failure".into()));
        }
        Ok(())
    }
}
