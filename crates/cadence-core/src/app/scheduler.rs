//! CronScheduler - 一定間隔で登録済み cron job を評価して起動する
//!
//! # 1 tick のフロー（登録順）
//! 1. disabled → スキップ（ロックに触れない）
//! 2. schedule を評価 → due でなければスキップ
//! 3. `cron:{identifier}` のロックを非ブロッキングで取得 → 取れなければスキップ
//! 4. job 本体を spawn（tick は完了を待たない）→ 終了時に必ずロック解放
//!
//! # ロックの TTL について
//! TTL は固定値（`lock_ttl`）で、job の実際の実行時間とは無関係。
//! TTL より長く走る job はロックが先に失効し、次の due で別プロセスが
//! 同じ job を並行して起動しうる。実行中の job を止める仕組みはない。

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use super::shutdown::ShutdownSignal;
use super::status::{RuntimeCounters, bump};
use crate::domain::CronJobDescriptor;
use crate::ports::{Clock, Lease, LockBackend, TaskDispatcher, cron_lock_key};
use crate::schedule::{ScheduleEvaluator, minute_floor};
use crate::typed::{CronJob, JobContext, JobRegistry};

#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    #[error("cron job not found: {0}")]
    JobNotFound(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobRunOutcome {
    Succeeded,
    Failed(String),
    Panicked(String),
}

impl JobRunOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Succeeded)
    }
}

/// A job body started by a tick.
pub struct JobLaunch {
    pub identifier: String,
    pub handle: JoinHandle<JobRunOutcome>,
}

/// What one tick did with each registered job.
#[derive(Default)]
pub struct TickReport {
    pub disabled: Vec<String>,
    pub not_due: Vec<String>,
    pub invalid: Vec<String>,
    pub already_fired: Vec<String>,
    pub contended: Vec<String>,
    pub lock_errors: Vec<String>,
    pub launched: Vec<JobLaunch>,
}

impl TickReport {
    pub fn launched_identifiers(&self) -> Vec<&str> {
        self.launched.iter().map(|l| l.identifier.as_str()).collect()
    }

    /// Test/CLI helper: wait for every launched body.
    pub async fn join_all(self) -> Vec<(String, JobRunOutcome)> {
        let mut outcomes = Vec::with_capacity(self.launched.len());
        for launch in self.launched {
            let outcome = launch
                .handle
                .await
                .unwrap_or_else(|e| JobRunOutcome::Panicked(e.to_string()));
            outcomes.push((launch.identifier, outcome));
        }
        outcomes
    }
}

pub struct CronScheduler {
    jobs: JobRegistry,
    evaluator: ScheduleEvaluator,
    lock: Arc<dyn LockBackend>,
    dispatcher: Arc<dyn TaskDispatcher>,
    clock: Arc<dyn Clock>,
    counters: Arc<RuntimeCounters>,
    tick_interval: Duration,
    lock_ttl: Duration,
    /// identifier → last minute the job was launched here or yielded to another process
    last_fired: Mutex<HashMap<String, DateTime<Utc>>>,
}

impl CronScheduler {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        jobs: JobRegistry,
        evaluator: ScheduleEvaluator,
        lock: Arc<dyn LockBackend>,
        dispatcher: Arc<dyn TaskDispatcher>,
        clock: Arc<dyn Clock>,
        counters: Arc<RuntimeCounters>,
        tick_interval: Duration,
        lock_ttl: Duration,
    ) -> Self {
        Self {
            jobs,
            evaluator,
            lock,
            dispatcher,
            clock,
            counters,
            tick_interval,
            lock_ttl,
            last_fired: Mutex::new(HashMap::new()),
        }
    }

    pub fn jobs(&self) -> &JobRegistry {
        &self.jobs
    }

    pub fn tick_interval(&self) -> Duration {
        self.tick_interval
    }

    /// Evaluates every job once and launches the due ones.
    pub async fn tick(&self) -> TickReport {
        let now = self.clock.now();
        let minute = minute_floor(now);
        let mut report = TickReport::default();
        bump(&self.counters.cron_ticks);

        for job in self.jobs.iter() {
            let identifier = job.identifier().to_string();

            if !job.enabled() {
                report.disabled.push(identifier);
                continue;
            }

            match self.evaluator.is_due(job.schedule(), now) {
                Ok(true) => {}
                Ok(false) => {
                    report.not_due.push(identifier);
                    continue;
                }
                Err(e) => {
                    warn!(identifier = %identifier, error = %e, "invalid cron schedule");
                    report.invalid.push(identifier);
                    continue;
                }
            }

            if self.fired_in(&identifier, minute) {
                report.already_fired.push(identifier);
                continue;
            }

            match self.lock.try_acquire(&cron_lock_key(&identifier), self.lock_ttl).await {
                Ok(Some(lease)) => {
                    self.mark_fired(&identifier, minute);
                    report
                        .launched
                        .push(self.launch(Arc::clone(job), lease, minute));
                }
                Ok(None) => {
                    // 他のプロセスが実行中、またはこの分はもう実行済み
                    self.mark_fired(&identifier, minute);
                    bump(&self.counters.cron_lock_skipped);
                    debug!(identifier = %identifier, "cron lock held elsewhere; skipping");
                    report.contended.push(identifier);
                }
                Err(e) => {
                    error!(identifier = %identifier, error = %e, "cron lock backend error");
                    report.lock_errors.push(identifier);
                }
            }
        }

        report
    }

    /// Tick loop; returns once `shutdown` fires. Job bodies already running
    /// are left to finish on their own.
    pub async fn run(self: Arc<Self>, shutdown: ShutdownSignal) {
        info!(
            jobs = self.jobs.len(),
            tick_secs = self.tick_interval.as_secs_f64(),
            "cron scheduler started"
        );

        let mut interval = tokio::time::interval(self.tick_interval.max(Duration::from_millis(1)));
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let report = self.tick().await;
                    if !report.launched.is_empty() {
                        debug!(launched = ?report.launched_identifiers(), "cron tick");
                    }
                }
                _ = shutdown.wait() => {
                    info!("cron scheduler shutting down");
                    break;
                }
            }
        }
    }

    /// Runs one job body now, ignoring its schedule and the lock.
    pub async fn run_now(&self, identifier: &str) -> Result<JobRunOutcome, SchedulerError> {
        let job = self
            .jobs
            .get(identifier)
            .ok_or_else(|| SchedulerError::JobNotFound(identifier.to_string()))?;
        let ctx = self.context(self.clock.now());
        bump(&self.counters.cron_launched);
        Ok(run_body(job, ctx, &self.counters).await)
    }

    /// Evaluated descriptors for every job, in registration order.
    pub fn describe_all(&self, now: DateTime<Utc>) -> Vec<CronJobDescriptor> {
        self.jobs
            .iter()
            .map(|job| {
                let descriptor = CronJobDescriptor::new(job.identifier(), job.schedule(), job.enabled());
                match self.evaluator.evaluate(job.schedule(), now) {
                    Ok(computed) => descriptor.evaluated(computed),
                    Err(_) => descriptor,
                }
            })
            .collect()
    }

    fn context(&self, scheduled_for: DateTime<Utc>) -> JobContext {
        JobContext {
            dispatcher: Arc::clone(&self.dispatcher),
            clock: Arc::clone(&self.clock),
            scheduled_for,
        }
    }

    fn fired_in(&self, identifier: &str, minute: DateTime<Utc>) -> bool {
        let fired = self.last_fired.lock().unwrap_or_else(|p| p.into_inner());
        fired.get(identifier) == Some(&minute)
    }

    fn mark_fired(&self, identifier: &str, minute: DateTime<Utc>) {
        let mut fired = self.last_fired.lock().unwrap_or_else(|p| p.into_inner());
        fired.insert(identifier.to_string(), minute);
    }

    fn launch(&self, job: Arc<dyn CronJob>, lease: Lease, scheduled_for: DateTime<Utc>) -> JobLaunch {
        bump(&self.counters.cron_launched);
        let identifier = job.identifier().to_string();
        let ctx = self.context(scheduled_for);
        let lock = Arc::clone(&self.lock);
        let counters = Arc::clone(&self.counters);

        let handle = tokio::spawn(async move {
            let outcome = run_body(job, ctx, &counters).await;
            if let Err(e) = lock.release(&lease).await {
                // 解放できなくても TTL で失効する
                warn!(key = %lease.key, error = %e, "cron lock release failed");
            }
            outcome
        });

        JobLaunch { identifier, handle }
    }
}

/// Runs the body on its own task so a panic stays inside this job.
async fn run_body(job: Arc<dyn CronJob>, ctx: JobContext, counters: &RuntimeCounters) -> JobRunOutcome {
    let identifier = job.identifier().to_string();
    info!(identifier = %identifier, "cron job started");

    let body = tokio::spawn(async move { job.run(&ctx).await });
    let outcome = match body.await {
        Ok(Ok(())) => JobRunOutcome::Succeeded,
        Ok(Err(e)) => JobRunOutcome::Failed(e.to_string()),
        Err(e) => JobRunOutcome::Panicked(e.to_string()),
    };

    match &outcome {
        JobRunOutcome::Succeeded => {
            bump(&counters.cron_succeeded);
            info!(identifier = %identifier, "cron job finished");
        }
        JobRunOutcome::Failed(reason) | JobRunOutcome::Panicked(reason) => {
            bump(&counters.cron_failed);
            error!(identifier = %identifier, reason = %reason, "cron job failed");
        }
    }
    outcome
}
