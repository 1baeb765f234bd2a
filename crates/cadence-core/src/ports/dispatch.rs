//! TaskDispatcher port - タスク投入の境界
//!
//! cron job（retry job など）や外部の呼び出し元は、このトレイト越しに
//! TaskRequest を投入する。実体は `app::queue::TaskQueue`。

use async_trait::async_trait;

use crate::domain::errors::DispatchError;
use crate::domain::TaskRequest;

#[async_trait]
pub trait TaskDispatcher: Send + Sync {
    /// Hands the request to the execution channel.
    ///
    /// In sync mode this returns after the task has run; otherwise it returns
    /// as soon as the request is queued. Task failures are never reported
    /// here, only a closed or unusable queue is.
    async fn submit(&self, request: TaskRequest) -> Result<(), DispatchError>;
}
