//! cadence-core
//!
//! Background job runtime: cron scheduling with a shared TTL lock,
//! a task queue with a failure store, automatic retry of failed tasks,
//! and a small TCP control channel.
//!
//! # モジュール構成
//! - **domain**: ドメインモデル（ids, task, failed_task, cron, errors）
//! - **ports**: 抽象化レイヤー（FailureStore, LockBackend, TaskDispatcher, Clock, IdGenerator）
//! - **impls**: 実装（メモリ / SQLite）
//! - **typed**: 型付き Task / CronJob API（Task, Handler, TaskRegistry, JobRegistry, PayloadCodec）
//! - **schedule**: cron 式とエイリアスの評価
//! - **app**: ランタイム（builder, runtime, executor, queue, scheduler, retry_job, control）
//! - **config / telemetry**: 設定とログ初期化

pub mod app;
pub mod config;
pub mod domain;
pub mod impls;
pub mod ports;
pub mod schedule;
pub mod telemetry;
pub mod typed;

pub use app::{AppBuilder, Runtime, RuntimeHandle};
pub use config::RuntimeConfig;
