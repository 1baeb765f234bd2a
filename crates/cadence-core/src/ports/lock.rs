//! Lock port - TTL 付きの排他リース
//!
//! cron job の多重起動を防ぐための非ブロッキングなロック。
//! 取得できなければ即 `None` を返す（待たない）。
//! 解放されなかったリースは `ttl` 経過で自動的に失効する。

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::time::Duration;

use crate::domain::errors::LockError;
use crate::domain::LeaseToken;

/// One successful acquisition. Only the holder of the token can release it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lease {
    pub key: String,
    pub token: LeaseToken,
    pub expires_at: DateTime<Utc>,
}

#[async_trait]
pub trait LockBackend: Send + Sync {
    /// `Ok(None)` means someone else holds an unexpired lease on `key`.
    async fn try_acquire(&self, key: &str, ttl: Duration) -> Result<Option<Lease>, LockError>;

    /// Idempotent: releasing an expired or foreign lease is a no-op.
    async fn release(&self, lease: &Lease) -> Result<(), LockError>;
}

/// Lock key of a cron job.
pub fn cron_lock_key(identifier: &str) -> String {
    format!("cron:{identifier}")
}

pub(crate) fn ttl_to_chrono(ttl: Duration) -> chrono::Duration {
    chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::weeks(52 * 100))
}
