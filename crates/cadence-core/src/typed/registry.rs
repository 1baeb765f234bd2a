//! TaskRegistry - Handler の登録と管理
//!
//! 起動時に組み立てて、以降は読み取り専用（Arc で共有）。
//! ロック不要で何本の worker からでも同時に引ける。

use super::handler::{DynHandler, Handler, TypedHandler};
use super::task::Task;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Typed handlers keyed by task identifier.
///
/// ```ignore
/// let mut registry = TaskRegistry::new();
/// registry.register::<SendMail, _>(SendMailHandler)?;
///
/// let handler = registry.get("mail.send");
/// ```
#[derive(Default)]
pub struct TaskRegistry {
    handlers: BTreeMap<String, Arc<dyn DynHandler>>,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("handler for task '{0}' is already registered")]
    AlreadyRegistered(String),

    #[error("cron job '{0}' is already registered")]
    JobAlreadyRegistered(String),
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<T: Task, H: Handler<T> + 'static>(
        &mut self,
        handler: H,
    ) -> Result<(), RegistryError> {
        let identifier = T::IDENTIFIER.to_string();
        if self.handlers.contains_key(&identifier) {
            return Err(RegistryError::AlreadyRegistered(identifier));
        }
        self.handlers
            .insert(identifier, Arc::new(TypedHandler::new(handler)));
        Ok(())
    }

    pub fn get(&self, identifier: &str) -> Option<Arc<dyn DynHandler>> {
        self.handlers.get(identifier).cloned()
    }

    pub fn contains(&self, identifier: &str) -> bool {
        self.handlers.contains_key(identifier)
    }

    /// Sorted, for `task list`.
    pub fn identifiers(&self) -> Vec<String> {
        self.handlers.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}
