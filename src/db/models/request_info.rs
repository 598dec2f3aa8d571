use crate::types::{HttpMethod, RequestStatus, SendStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One row per inbound transaction (spec.md §3).
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct RequestInfo {
    pub id: Uuid,
    /// Inbound path minus the coordinator prefix.
    pub url: String,
    pub method: HttpMethod,
    /// Raw request body.
    pub param: Vec<u8>,
    pub status: RequestStatus,
    /// Retry counter, bumped once per reconciler tick that observes this row.
    pub times: i32,
    pub is_send: SendStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Fields needed to insert a new `RequestInfo` row. `status` is always
/// `Trying` and `times`/`is_send` always start at zero — the gateway sets
/// those, callers only supply what the inbound request determined.
#[derive(Debug, Clone)]
pub struct RequestInfoCreate {
    pub url: String,
    pub method: HttpMethod,
    pub param: Vec<u8>,
}
