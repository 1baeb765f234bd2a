//! Status - ランタイムのカウンタとスナップショット
//!
//! `getMetrics` で返す値。カウンタはプロセス内のもので、
//! 複数プロセスを合算したりはしない。

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Default)]
pub struct RuntimeCounters {
    pub tasks_dispatched: AtomicU64,
    pub tasks_succeeded: AtomicU64,
    pub tasks_failed: AtomicU64,
    pub tasks_not_found: AtomicU64,
    pub tasks_in_flight: AtomicI64,
    pub failure_records_dropped: AtomicU64,
    pub tasks_resubmitted: AtomicU64,
    pub cron_ticks: AtomicU64,
    pub cron_launched: AtomicU64,
    pub cron_succeeded: AtomicU64,
    pub cron_failed: AtomicU64,
    pub cron_lock_skipped: AtomicU64,
    pub control_requests: AtomicU64,
}

pub(crate) fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

/// Decrements the in-flight gauge on drop, so a panicking task still leaves it.
pub(crate) struct InFlight<'a>(&'a AtomicI64);

impl<'a> InFlight<'a> {
    pub(crate) fn enter(gauge: &'a AtomicI64) -> Self {
        gauge.fetch_add(1, Ordering::Relaxed);
        Self(gauge)
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::Relaxed);
    }
}

impl RuntimeCounters {
    pub fn snapshot(&self, started_at: DateTime<Utc>, now: DateTime<Utc>) -> MetricsSnapshot {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        MetricsSnapshot {
            started_at,
            uptime_secs: (now - started_at).num_seconds().max(0) as u64,
            tasks_dispatched: load(&self.tasks_dispatched),
            tasks_succeeded: load(&self.tasks_succeeded),
            tasks_failed: load(&self.tasks_failed),
            tasks_not_found: load(&self.tasks_not_found),
            tasks_in_flight: self.tasks_in_flight.load(Ordering::Relaxed).max(0) as u64,
            failure_records_dropped: load(&self.failure_records_dropped),
            tasks_resubmitted: load(&self.tasks_resubmitted),
            cron_ticks: load(&self.cron_ticks),
            cron_launched: load(&self.cron_launched),
            cron_succeeded: load(&self.cron_succeeded),
            cron_failed: load(&self.cron_failed),
            cron_lock_skipped: load(&self.cron_lock_skipped),
            control_requests: load(&self.control_requests),
        }
    }
}

/// Point-in-time copy of the counters, as sent over the control channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub started_at: DateTime<Utc>,
    pub uptime_secs: u64,
    pub tasks_dispatched: u64,
    pub tasks_succeeded: u64,
    pub tasks_failed: u64,
    pub tasks_not_found: u64,
    pub tasks_in_flight: u64,
    pub failure_records_dropped: u64,
    pub tasks_resubmitted: u64,
    pub cron_ticks: u64,
    pub cron_launched: u64,
    pub cron_succeeded: u64,
    pub cron_failed: u64,
    pub cron_lock_skipped: u64,
    pub control_requests: u64,
}
