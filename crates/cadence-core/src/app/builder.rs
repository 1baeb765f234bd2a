//! AppBuilder - Runtime の構築とワイヤリング
//!
//! # 起動時検証（Fail-fast）
//! - 設定値の検証
//! - `expect_tasks()` で宣言した identifier が全て登録済みか
//! - task / cron job の identifier 重複
//!
//! store と lock を明示しなければ設定から選ぶ:
//! `storage.database_path` があれば同じ SQLite ファイルを共有、なければメモリ。

use std::sync::Arc;

use super::executor::TaskExecutor;
use super::queue::TaskQueue;
use super::retry_job::FailedTaskRetryJob;
use super::runtime::Runtime;
use super::scheduler::CronScheduler;
use super::status::RuntimeCounters;
use crate::config::{ConfigError, RuntimeConfig};
use crate::domain::errors::StoreError;
use crate::impls::{MemoryFailureStore, MemoryLock, SqliteFailureStore, SqliteLock, open_database};
use crate::ports::{Clock, FailureStore, LockBackend, SystemClock, TaskDispatcher};
use crate::schedule::{AliasTable, ScheduleEvaluator};
use crate::typed::{CronJob, Handler, JobRegistry, RegistryError, Task, TaskRegistry};

/// Collects tasks, jobs and overrides, then wires a `Runtime`.
///
/// ```ignore
/// let runtime = AppBuilder::new(config)
///     .register::<SendMail, _>(SendMailHandler)?
///     .register_job(Arc::new(NightlyReport::new()))?
///     .expect_tasks(&["mail.send"])
///     .build()?;
/// ```
pub struct AppBuilder {
    config: RuntimeConfig,
    tasks: TaskRegistry,
    jobs: JobRegistry,
    expected_tasks: Option<Vec<String>>,
    store: Option<Arc<dyn FailureStore>>,
    lock: Option<Arc<dyn LockBackend>>,
    clock: Arc<dyn Clock>,
    aliases: AliasTable,
}

#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("Missing task types: {0:?}. These tasks were expected but not registered.")]
    MissingTaskTypes(Vec<String>),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("failed to open storage: {0}")]
    Storage(#[from] StoreError),
}

impl AppBuilder {
    pub fn new(config: RuntimeConfig) -> Self {
        Self {
            config,
            tasks: TaskRegistry::new(),
            jobs: JobRegistry::new(),
            expected_tasks: None,
            store: None,
            lock: None,
            clock: Arc::new(SystemClock),
            aliases: AliasTable::with_defaults(),
        }
    }

    pub fn register<T: Task, H: Handler<T> + 'static>(mut self, handler: H) -> Result<Self, RegistryError> {
        self.tasks.register::<T, H>(handler)?;
        Ok(self)
    }

    pub fn register_job(mut self, job: Arc<dyn CronJob>) -> Result<Self, RegistryError> {
        self.jobs.register(job)?;
        Ok(self)
    }

    pub fn expect_tasks(mut self, identifiers: &[&str]) -> Self {
        self.expected_tasks = Some(identifiers.iter().map(|s| s.to_string()).collect());
        self
    }

    pub fn store(mut self, store: Arc<dyn FailureStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn lock(mut self, lock: Arc<dyn LockBackend>) -> Self {
        self.lock = Some(lock);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Adds a custom schedule alias on top of the built-in table.
    pub fn alias(mut self, name: &str, expression: &str) -> Self {
        self.aliases.register(name, expression);
        self
    }

    pub fn build(self) -> Result<Arc<Runtime>, BuildError> {
        let Self {
            config,
            tasks,
            mut jobs,
            expected_tasks,
            store,
            lock,
            clock,
            aliases,
        } = self;

        config.validate()?;

        if let Some(expected) = &expected_tasks {
            let missing: Vec<String> = expected
                .iter()
                .filter(|identifier| !tasks.contains(identifier))
                .cloned()
                .collect();
            if !missing.is_empty() {
                return Err(BuildError::MissingTaskTypes(missing));
            }
        }

        let (store, lock) = resolve_storage(&config, store, lock, &clock)?;
        let counters = Arc::new(RuntimeCounters::default());

        jobs.register(Arc::new(FailedTaskRetryJob::new(
            Arc::clone(&store),
            config.failed_task.retry_settings(),
            Arc::clone(&counters),
        )))?;

        let registry = Arc::new(tasks);
        let executor = Arc::new(TaskExecutor::new(
            Arc::clone(&registry),
            Arc::clone(&store),
            Arc::clone(&counters),
        ));

        let (queue, receiver) = if config.worker.sync_mode {
            (TaskQueue::inline(Arc::clone(&executor), Arc::clone(&counters)), None)
        } else {
            let (queue, receiver) = TaskQueue::channel(config.worker.queue_capacity, Arc::clone(&counters));
            (queue, Some(receiver))
        };

        let dispatcher: Arc<dyn TaskDispatcher> = Arc::new(queue.clone());
        let scheduler = Arc::new(CronScheduler::new(
            jobs,
            ScheduleEvaluator::new(aliases),
            lock,
            dispatcher,
            Arc::clone(&clock),
            Arc::clone(&counters),
            config.cron.tick_interval(),
            config.cron.lock_ttl(),
        ));

        Ok(Arc::new(Runtime::new(
            config, registry, queue, receiver, executor, scheduler, store, counters, clock,
        )))
    }
}

type Storage = (Arc<dyn FailureStore>, Arc<dyn LockBackend>);

fn resolve_storage(
    config: &RuntimeConfig,
    store: Option<Arc<dyn FailureStore>>,
    lock: Option<Arc<dyn LockBackend>>,
    clock: &Arc<dyn Clock>,
) -> Result<Storage, StoreError> {
    if let (Some(store), Some(lock)) = (&store, &lock) {
        return Ok((Arc::clone(store), Arc::clone(lock)));
    }

    match &config.storage.database_path {
        Some(path) => {
            let conn = open_database(path).map_err(|e| StoreError::Unavailable(e.to_string()))?;
            let store = store.unwrap_or_else(|| {
                Arc::new(SqliteFailureStore::from_connection(conn.clone(), Arc::clone(clock)))
            });
            let lock = lock.unwrap_or_else(|| Arc::new(SqliteLock::from_connection(conn, Arc::clone(clock))));
            Ok((store, lock))
        }
        None => {
            let store = store.unwrap_or_else(|| Arc::new(MemoryFailureStore::with_clock(Arc::clone(clock))));
            let lock = lock.unwrap_or_else(|| Arc::new(MemoryLock::with_clock(Arc::clone(clock))));
            Ok((store, lock))
        }
    }
}

impl Default for AppBuilder {
    fn default() -> Self {
        Self::new(RuntimeConfig::default())
    }
}
