//! Cron job descriptors.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Result of evaluating a schedule against one reference time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComputedSchedule {
    pub is_due: bool,
    pub next_run_at: Option<DateTime<Utc>>,
}

/// A registered cron job as seen by the scheduler on one tick.
///
/// `computed` is `None` until the job has been evaluated; it is rebuilt on
/// every tick and never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CronJobDescriptor {
    pub identifier: String,
    pub schedule: String,
    pub enabled: bool,
    pub computed: Option<ComputedSchedule>,
}

impl CronJobDescriptor {
    pub fn new(identifier: impl Into<String>, schedule: impl Into<String>, enabled: bool) -> Self {
        Self {
            identifier: identifier.into(),
            schedule: schedule.into(),
            enabled,
            computed: None,
        }
    }

    pub fn evaluated(mut self, computed: ComputedSchedule) -> Self {
        self.computed = Some(computed);
        self
    }

    pub fn is_due(&self) -> bool {
        self.computed.is_some_and(|c| c.is_due)
    }
}
