//! Task trait - identifier と payload 型の対応

use serde::Serialize;
use serde::de::DeserializeOwned;

/// Binds an identifier to a serializable payload type.
///
/// ```ignore
/// #[derive(Serialize, Deserialize)]
/// struct SendMail {
///     to: String,
/// }
///
/// impl Task for SendMail {
///     const IDENTIFIER: &'static str = "mail.send";
/// }
/// ```
pub trait Task: Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Used for registration and dispatch, and stored on failed-task records.
    /// Changing it orphans existing records.
    const IDENTIFIER: &'static str;
}
