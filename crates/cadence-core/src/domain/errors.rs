//! Errors - エラー型と分類
//!
//! 実行系のエラーは「設定ミス」と「一時的な失敗」を型で区別する。
//! - `ExecuteError::NotFound`: 未登録の identifier（記録しない・リトライしない）
//! - `ExecuteError::Decode` / `ExecuteError::Failed`: 失敗として記録される

use thiserror::Error;

/// Outcome of `TaskExecutor::execute` when the task did not succeed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExecuteError {
    #[error("task not found: {identifier}")]
    NotFound { identifier: String },

    #[error("payload decode failed for {identifier}: {reason}")]
    Decode { identifier: String, reason: String },

    #[error("task {identifier} failed on attempt {attempt}: {reason}")]
    Failed {
        identifier: String,
        attempt: u32,
        reason: String,
    },
}

impl ExecuteError {
    /// Only transient failures end up in the failure store.
    pub fn is_recorded(&self) -> bool {
        !matches!(self, Self::NotFound { .. })
    }

    pub fn reason(&self) -> String {
        match self {
            Self::NotFound { identifier } => format!("task not found: {identifier}"),
            Self::Decode { reason, .. } | Self::Failed { reason, .. } => reason.clone(),
        }
    }
}

/// Error raised by a task handler body.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct TaskFailure(pub String);

impl TaskFailure {
    pub fn new(reason: impl Into<String>) -> Self {
        Self(reason.into())
    }
}

impl From<String> for TaskFailure {
    fn from(reason: String) -> Self {
        Self(reason)
    }
}

impl From<&str> for TaskFailure {
    fn from(reason: &str) -> Self {
        Self(reason.to_string())
    }
}

/// Error raised by a cron job body.
#[derive(Debug, Error)]
pub enum JobError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Dispatch(#[from] DispatchError),

    #[error("{0}")]
    Failed(String),
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store backend unavailable: {0}")]
    Unavailable(String),

    #[error("store query failed: {0}")]
    Query(String),

    #[error("corrupt record {id}: {reason}")]
    Corrupt { id: String, reason: String },
}

#[derive(Debug, Error)]
pub enum LockError {
    #[error("lock backend unavailable: {0}")]
    Unavailable(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ScheduleError {
    #[error("invalid cron expression '{expression}': {reason}")]
    Invalid { expression: String, reason: String },
}

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("task queue is closed")]
    Closed,

    #[error("payload encode failed for {identifier}: {reason}")]
    Encode { identifier: String, reason: String },
}

#[derive(Debug, Error)]
pub enum ControlError {
    #[error("control channel connect to {address} failed: {reason}")]
    Connect { address: String, reason: String },

    #[error("control channel io: {0}")]
    Io(#[from] std::io::Error),

    #[error("control channel closed before a response was received")]
    NoResponse,

    #[error("malformed control response: {0}")]
    Malformed(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_is_never_recorded() {
        let err = ExecuteError::NotFound {
            identifier: "ghost".into(),
        };
        assert!(!err.is_recorded());
        assert_eq!(err.to_string(), "task not found: ghost");
    }

    #[test]
    fn failures_are_recorded_with_their_reason() {
        let err = ExecuteError::Failed {
            identifier: "mail".into(),
            attempt: 1,
            reason: "smtp down".into(),
        };
        assert!(err.is_recorded());
        assert_eq!(err.reason(), "smtp down");
    }
}
