//! MemoryLock - プロセス内のロックバックエンド
//!
//! 1 プロセス内で複数の scheduler を動かす場合（テスト・単一プロセス運用）に使う。
//! 期限は Clock で判定するので FixedClock で失効をテストできる。

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use crate::domain::errors::LockError;
use crate::ports::lock::ttl_to_chrono;
use crate::ports::{Clock, IdGenerator, Lease, LockBackend, SystemClock, UlidGenerator};

pub struct MemoryLock {
    leases: Mutex<HashMap<String, Lease>>,
    ids: UlidGenerator<Arc<dyn Clock>>,
    clock: Arc<dyn Clock>,
}

impl MemoryLock {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            leases: Mutex::new(HashMap::new()),
            ids: UlidGenerator::new(clock.clone()),
            clock,
        }
    }
}

impl Default for MemoryLock {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LockBackend for MemoryLock {
    async fn try_acquire(&self, key: &str, ttl: Duration) -> Result<Option<Lease>, LockError> {
        let now = self.clock.now();
        let mut leases = self.leases.lock().unwrap_or_else(|p| p.into_inner());

        if let Some(held) = leases.get(key)
            && held.expires_at > now
        {
            return Ok(None);
        }

        let lease = Lease {
            key: key.to_string(),
            token: self.ids.lease_token(),
            expires_at: now.checked_add_signed(ttl_to_chrono(ttl)).unwrap_or(now),
        };
        leases.insert(key.to_string(), lease.clone());
        Ok(Some(lease))
    }

    async fn release(&self, lease: &Lease) -> Result<(), LockError> {
        let mut leases = self.leases.lock().unwrap_or_else(|p| p.into_inner());
        if leases.get(&lease.key).is_some_and(|held| held.token == lease.token) {
            leases.remove(&lease.key);
        }
        Ok(())
    }
}
