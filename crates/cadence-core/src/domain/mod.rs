//! Domain model (IDs, task requests, failed task records, cron descriptors).

pub mod cron;
pub mod errors;
pub mod failed_task;
pub mod ids;
pub mod task;

pub use cron::{ComputedSchedule, CronJobDescriptor};
pub use errors::{
    ControlError, DispatchError, ExecuteError, JobError, LockError, ScheduleError, StoreError,
    TaskFailure,
};
pub use failed_task::{FailedTaskRecord, NewFailedTask};
pub use ids::{FailedTaskId, Id, IdMarker, LeaseToken};
pub use task::{Payload, TaskRequest};
