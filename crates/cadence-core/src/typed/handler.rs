//! Handler trait と型消去
//!
//! `Handler<T>` は型付きで書き、登録時に `TypedHandler<T, H>` で包んで
//! `DynHandler` として registry に入れる。decode は `handle_dyn` の中で行う。

use super::codec::{CodecError, PayloadCodec};
use super::task::Task;
use crate::domain::errors::TaskFailure;
use crate::domain::Payload;
use async_trait::async_trait;
use std::marker::PhantomData;

/// Runs a decoded task.
///
/// ```ignore
/// struct SendMailHandler;
///
/// #[async_trait]
/// impl Handler<SendMail> for SendMailHandler {
///     async fn handle(&self, task: SendMail) -> Result<(), TaskFailure> {
///         smtp::send(&task.to).await.map_err(|e| TaskFailure::new(e.to_string()))
///     }
/// }
/// ```
#[async_trait]
pub trait Handler<T: Task>: Send + Sync {
    async fn handle(&self, task: T) -> Result<(), TaskFailure>;
}

/// Failure from `DynHandler`: the payload did not decode, or the handler failed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HandlerError {
    #[error(transparent)]
    Decode(#[from] CodecError),

    #[error(transparent)]
    Failed(#[from] TaskFailure),
}

/// Object-safe handler over raw payloads, as stored in `TaskRegistry`.
#[async_trait]
pub trait DynHandler: Send + Sync {
    async fn handle_dyn(&self, payload: &Payload) -> Result<(), HandlerError>;
    fn identifier(&self) -> &'static str;
}

pub struct TypedHandler<T: Task, H: Handler<T>> {
    handler: H,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Task, H: Handler<T>> TypedHandler<T, H> {
    pub fn new(handler: H) -> Self {
        Self {
            handler,
            _marker: PhantomData,
        }
    }
}

#[async_trait]
impl<T: Task, H: Handler<T>> DynHandler for TypedHandler<T, H> {
    async fn handle_dyn(&self, payload: &Payload) -> Result<(), HandlerError> {
        let task: T = PayloadCodec::decode(payload)?;
        self.handler.handle(task).await?;
        Ok(())
    }

    fn identifier(&self) -> &'static str {
        T::IDENTIFIER
    }
}
