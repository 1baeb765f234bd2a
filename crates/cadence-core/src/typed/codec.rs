//! PayloadCodec - Task と Payload の相互変換
//!
//! Payload の中身は JSON。runtime は中身を見ず、handler の直前でだけ decode する。

use super::task::Task;
use crate::domain::Payload;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CodecError {
    #[error("encode {identifier}: {reason}")]
    Encode { identifier: String, reason: String },

    #[error("decode {identifier}: {reason}")]
    Decode { identifier: String, reason: String },
}

pub struct PayloadCodec;

impl PayloadCodec {
    pub fn encode<T: Task>(task: &T) -> Result<Payload, CodecError> {
        serde_json::to_vec(task)
            .map(Payload::from_bytes)
            .map_err(|e| CodecError::Encode {
                identifier: T::IDENTIFIER.to_string(),
                reason: e.to_string(),
            })
    }

    pub fn decode<T: Task>(payload: &Payload) -> Result<T, CodecError> {
        serde_json::from_slice(payload.as_bytes()).map_err(|e| CodecError::Decode {
            identifier: T::IDENTIFIER.to_string(),
            reason: e.to_string(),
        })
    }

    /// Untyped values, as they arrive from the operator CLI.
    pub fn encode_value(value: &serde_json::Value) -> Payload {
        Payload::from_bytes(value.to_string())
    }
}
