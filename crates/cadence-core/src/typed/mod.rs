//! Typed - 型付き Task / CronJob API
//!
//! identifier の typo を型で排除し、Handler との対応付けを静的に保証します。
//!
//! # 二層構造
//! - **表層（Typed）**: `Task` trait, `Handler<T>` trait - 型安全
//! - **内部（Dyn）**: `DynHandler` trait - object-safe, type erasure

pub mod codec;
pub mod handler;
pub mod job;
pub mod registry;
pub mod task;

#[cfg(test)]
pub(crate) mod testing;

pub use self::codec::{CodecError, PayloadCodec};
pub use self::handler::{DynHandler, Handler, HandlerError, TypedHandler};
pub use self::job::{CronJob, JobContext, JobRegistry};
pub use self::registry::{RegistryError, TaskRegistry};
pub use self::task::Task;
