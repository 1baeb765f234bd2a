//! Ports - 抽象化レイヤー
//!
//! 外部の共有状態（ロックのバックエンド・失敗タスクのストア）と
//! 時刻・ID 生成をトレイトで隠蔽する。
//! プロセス間の協調はここを通してのみ行い、プロセス内の共有メモリには頼らない。

pub mod clock;
pub mod dispatch;
pub mod failure_store;
pub mod id_generator;
pub mod lock;

pub use self::clock::{Clock, FixedClock, SystemClock};
pub use self::dispatch::TaskDispatcher;
pub use self::failure_store::{
    FailedTaskQuery, FailedTaskStream, FailureStore, list_by_attempt_less_than,
};
pub use self::id_generator::{IdGenerator, UlidGenerator};
pub use self::lock::{Lease, LockBackend, cron_lock_key};
