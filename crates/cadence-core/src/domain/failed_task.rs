//! Failed task records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::FailedTaskId;
use super::task::{Payload, TaskRequest};

/// A terminal failure of one task execution, as persisted by the failure store.
///
/// Records are immutable once created. The retry job either leaves a record
/// alone or deletes it after resubmitting it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedTaskRecord {
    pub id: FailedTaskId,
    pub identifier: String,
    pub payload: Option<Payload>,
    pub failure_reason: String,
    pub attempt: u32,
    pub created_at: DateTime<Utc>,
}

impl FailedTaskRecord {
    /// The request that retries this failure.
    pub fn resubmission(&self) -> TaskRequest {
        TaskRequest::new(self.identifier.clone(), self.payload.clone().unwrap_or_default())
            .with_attempt(self.attempt.saturating_add(1))
    }
}

/// Input to `FailureStore::create`; the store assigns `id` and `created_at`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewFailedTask {
    pub identifier: String,
    pub payload: Option<Payload>,
    pub failure_reason: String,
    pub attempt: u32,
}

impl NewFailedTask {
    pub fn from_request(request: &TaskRequest, failure_reason: impl Into<String>) -> Self {
        Self {
            identifier: request.identifier.clone(),
            payload: Some(request.payload.clone()),
            failure_reason: failure_reason.into(),
            attempt: request.attempt,
        }
    }

    pub fn into_record(self, id: FailedTaskId, created_at: DateTime<Utc>) -> FailedTaskRecord {
        FailedTaskRecord {
            id,
            identifier: self.identifier,
            payload: self.payload,
            failure_reason: self.failure_reason,
            attempt: self.attempt,
            created_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ulid::Ulid;

    #[test]
    fn resubmission_increments_attempt_and_keeps_payload() {
        let request = TaskRequest::new("report.build", Payload::from_bytes("42")).with_attempt(2);
        let record = NewFailedTask::from_request(&request, "boom")
            .into_record(FailedTaskId::from_ulid(Ulid::new()), Utc::now());

        assert_eq!(record.attempt, 2);
        let retry = record.resubmission();
        assert_eq!(retry.identifier, "report.build");
        assert_eq!(retry.payload.as_bytes(), b"42");
        assert_eq!(retry.attempt, 3);
    }

    #[test]
    fn missing_payload_resubmits_empty() {
        let record = NewFailedTask {
            identifier: "x".into(),
            payload: None,
            failure_reason: "lost".into(),
            attempt: 0,
        }
        .into_record(FailedTaskId::from_ulid(Ulid::new()), Utc::now());

        assert!(record.resubmission().payload.is_empty());
    }
}
