use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Delivery lifecycle of a scheduled stage message. Terminal states are
/// immutable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Active,
    Done,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Done | JobStatus::Failed | JobStatus::Cancelled)
    }
}

/// One scheduled stage message for one recipient.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    pub recipient_id: String,
    pub instance_id: Uuid,
    pub stage: u32,
    pub template_id: String,
    pub not_before: DateTime<Utc>,
    pub attempts: u32,
    pub max_attempts: u32,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Enqueue request. `(recipient_id, instance_id, stage)` is the
/// idempotency key: re-enqueueing an already-scheduled or already-Done
/// stage is a no-op.
#[derive(Debug, Clone)]
pub struct EnqueueJob {
    pub recipient_id: String,
    pub instance_id: Uuid,
    pub stage: u32,
    pub template_id: String,
    pub not_before: DateTime<Utc>,
    pub max_attempts: u32,
}
