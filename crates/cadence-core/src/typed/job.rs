//! CronJob trait と JobRegistry
//!
//! cron job は Task と違って payload を持たない。
//! schedule（cron 式かエイリアス）と本体だけを持つ。

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::codec::PayloadCodec;
use super::registry::RegistryError;
use super::task::Task;
use crate::domain::errors::{DispatchError, JobError};
use crate::domain::TaskRequest;
use crate::ports::{Clock, TaskDispatcher};

/// Passed to every job body.
#[derive(Clone)]
pub struct JobContext {
    pub dispatcher: Arc<dyn TaskDispatcher>,
    pub clock: Arc<dyn Clock>,
    /// The minute this run was due for (or the trigger time for a manual run).
    pub scheduled_for: DateTime<Utc>,
}

impl JobContext {
    /// Enqueues a typed task from inside a job body.
    pub async fn dispatch<T: Task>(&self, task: &T) -> Result<(), DispatchError> {
        let payload = PayloadCodec::encode(task).map_err(|e| DispatchError::Encode {
            identifier: T::IDENTIFIER.to_string(),
            reason: e.to_string(),
        })?;
        self.dispatcher
            .submit(TaskRequest::new(T::IDENTIFIER, payload))
            .await
    }
}

#[async_trait]
pub trait CronJob: Send + Sync {
    fn identifier(&self) -> &str;

    /// Five-field cron expression or an alias such as `@EveryMinute10`.
    fn schedule(&self) -> &str;

    fn enabled(&self) -> bool {
        true
    }

    async fn run(&self, ctx: &JobContext) -> Result<(), JobError>;
}

/// Keeps registration order; a tick evaluates jobs in this order.
#[derive(Default, Clone)]
pub struct JobRegistry {
    jobs: Vec<Arc<dyn CronJob>>,
    seen: HashSet<String>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, job: Arc<dyn CronJob>) -> Result<(), RegistryError> {
        let identifier = job.identifier().to_string();
        if !self.seen.insert(identifier.clone()) {
            return Err(RegistryError::JobAlreadyRegistered(identifier));
        }
        self.jobs.push(job);
        Ok(())
    }

    pub fn get(&self, identifier: &str) -> Option<Arc<dyn CronJob>> {
        self.jobs
            .iter()
            .find(|job| job.identifier() == identifier)
            .cloned()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn CronJob>> {
        self.jobs.iter()
    }

    pub fn identifiers(&self) -> Vec<String> {
        self.jobs.iter().map(|j| j.identifier().to_string()).collect()
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }
}
