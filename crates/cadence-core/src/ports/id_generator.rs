//! IdGenerator port - ID 生成の抽象化
//!
//! # 実装
//! - **UlidGenerator**: ULID ベース（本番用）。同一ミリ秒内でも単調増加する

use crate::domain::ids::{FailedTaskId, LeaseToken};
use crate::ports::Clock;
use std::sync::Mutex;
use std::time::SystemTime;
use ulid::{Generator, Ulid};

/// Source of sortable ids for failed tasks and lock leases.
pub trait IdGenerator: Send + Sync {
    fn failed_task_id(&self) -> FailedTaskId;

    fn lease_token(&self) -> LeaseToken;
}

/// ULIDs timestamped from the injected `Clock`.
///
/// Failed-task ids must sort in creation order, so within one millisecond
/// `ulid::Generator` increments the random part.
pub struct UlidGenerator<C> {
    clock: C,
    monotonic: Mutex<Generator>,
}

impl<C: Clock> UlidGenerator<C> {
    pub fn new(clock: C) -> Self {
        Self {
            clock,
            monotonic: Mutex::new(Generator::new()),
        }
    }

    fn next_ulid(&self) -> Ulid {
        let now = self.clock.now();
        let mut generator = self.monotonic.lock().unwrap_or_else(|p| p.into_inner());
        match generator.generate_from_datetime(SystemTime::from(now)) {
            Ok(ulid) => ulid,
            // 乱数部が溢れた場合（同一ミリ秒に 2^80 個）は単調性を諦める
            Err(_) => Ulid::from_parts(now.timestamp_millis().max(0) as u64, rand::random()),
        }
    }
}

impl<C: Clock> IdGenerator for UlidGenerator<C> {
    fn failed_task_id(&self) -> FailedTaskId {
        FailedTaskId::from(self.next_ulid())
    }

    fn lease_token(&self) -> LeaseToken {
        LeaseToken::from(self.next_ulid())
    }
}
