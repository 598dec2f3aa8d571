use crate::types::{HttpMethod, StepStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One row per participant invocation considered for rollback (spec.md §3).
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct SuccessStep {
    pub id: Uuid,
    pub request_id: Uuid,
    /// Participant position within the transaction, 0-based and contiguous.
    pub index: i32,
    /// The rewritten per-participant URL actually called.
    pub url: String,
    pub method: HttpMethod,
    pub param: Vec<u8>,
    /// Raw response bytes, regardless of outcome classification.
    pub result: Vec<u8>,
    pub status: StepStatus,
    /// Parsed envelope, when the reply was valid JSON.
    pub resp: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

/// Fields needed to insert a new `SuccessStep` row during the Try phase.
#[derive(Debug, Clone)]
pub struct SuccessStepCreate {
    pub request_id: Uuid,
    pub index: i32,
    pub url: String,
    pub method: HttpMethod,
    pub param: Vec<u8>,
    pub result: Vec<u8>,
    pub status: StepStatus,
    pub resp: Option<serde_json::Value>,
}
