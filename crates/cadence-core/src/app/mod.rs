//! App - アプリケーション層
//!
//! ports を組み合わせてランタイムを組み立てます。
//!
//! # 主要コンポーネント
//! - **AppBuilder / Runtime**: 構築と起動、明示的なサーバコンテキスト
//! - **TaskExecutor**: TaskRequest 1 件の実行と失敗記録
//! - **TaskQueue / WorkerPool**: 投入口と worker 群
//! - **CronScheduler**: tick ごとの評価・ロック・起動
//! - **FailedTaskRetryJob**: 失敗タスクの再投入
//! - **ControlServer / ControlClient**: TCP の制御チャネル

pub mod builder;
pub mod control;
pub mod executor;
pub mod queue;
pub mod retry_job;
pub mod runtime;
pub mod scheduler;
pub mod shutdown;
pub mod status;

// 主要な型を再エクスポート
pub use self::builder::{AppBuilder, BuildError};
pub use self::control::{ControlClient, ControlCommand, ControlResponse, ControlServer, ControlTarget};
pub use self::executor::TaskExecutor;
pub use self::queue::{TaskQueue, WorkerPool};
pub use self::retry_job::{FAILED_TASK_RETRY, FailedTaskRetryJob, RetrySettings};
pub use self::runtime::{Runtime, RuntimeError, RuntimeHandle};
pub use self::scheduler::{CronScheduler, JobRunOutcome, SchedulerError, TickReport};
pub use self::shutdown::ShutdownSignal;
pub use self::status::{MetricsSnapshot, RuntimeCounters};
