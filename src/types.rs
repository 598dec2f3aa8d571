//! Shared value types used across the coordinator.

use serde::{Deserialize, Serialize};

/// Implements `sqlx::Type`/`Encode`/`Decode` for Postgres `SMALLINT` in terms of
/// each enum's `i16` discriminant and a hand-written `from_i16`. The spec's wire
/// codes (0, 1, 2, ...) and the DB column share the same representation, so this
/// avoids the indirection of a Postgres-side enum type.
macro_rules! smallint_sqlx_type {
    ($ty:ty) => {
        impl sqlx::Type<sqlx::Postgres> for $ty {
            fn type_info() -> sqlx::postgres::PgTypeInfo {
                <i16 as sqlx::Type<sqlx::Postgres>>::type_info()
            }
        }

        impl<'r> sqlx::Decode<'r, sqlx::Postgres> for $ty {
            fn decode(value: sqlx::postgres::PgValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
                let raw = <i16 as sqlx::Decode<sqlx::Postgres>>::decode(value)?;
                Self::from_i16(raw).ok_or_else(|| format!("invalid {} discriminant: {raw}", stringify!($ty)).into())
            }
        }

        impl<'q> sqlx::Encode<'q, sqlx::Postgres> for $ty {
            fn encode_by_ref(
                &self,
                buf: &mut <sqlx::Postgres as sqlx::Database>::ArgumentBuffer<'q>,
            ) -> Result<sqlx::encode::IsNull, sqlx::error::BoxDynError> {
                <i16 as sqlx::Encode<sqlx::Postgres>>::encode_by_ref(&(*self as i16), buf)
            }
        }
    };
}

/// HTTP method recorded alongside a request or step, and used to drive the
/// outbound participant call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "UPPERCASE")]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl HttpMethod {
    pub fn as_reqwest(&self) -> reqwest::Method {
        match self {
            HttpMethod::Get => reqwest::Method::GET,
            HttpMethod::Post => reqwest::Method::POST,
            HttpMethod::Put => reqwest::Method::PUT,
            HttpMethod::Patch => reqwest::Method::PATCH,
            HttpMethod::Delete => reqwest::Method::DELETE,
        }
    }
}

impl std::str::FromStr for HttpMethod {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "GET" => Ok(HttpMethod::Get),
            "POST" => Ok(HttpMethod::Post),
            "PUT" => Ok(HttpMethod::Put),
            "PATCH" => Ok(HttpMethod::Patch),
            "DELETE" => Ok(HttpMethod::Delete),
            other => anyhow::bail!("unsupported HTTP method: {other}"),
        }
    }
}

impl std::fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Patch => "PATCH",
            HttpMethod::Delete => "DELETE",
        };
        f.write_str(s)
    }
}

/// Status of a [`crate::db::models::RequestInfo`] row. Mirrors spec.md §3's closed set.
///
/// Stored as `SMALLINT` via the manual `sqlx::Type` impl below — see
/// migrations/0001_init.sql.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(i16)]
pub enum RequestStatus {
    Trying = 0,
    Committed = 1,
    ConfirmFailed = 2,
    Cancelled = 3,
    CancelFailed = 4,
}

impl RequestStatus {
    /// Terminal states never mutated again by the reconciler (spec.md §8 invariant).
    pub fn is_terminal(&self) -> bool {
        matches!(self, RequestStatus::Committed | RequestStatus::Cancelled)
    }

    /// Rows the reconciler should pick up (spec.md §4.4 `ListExceptionalRequestInfo`).
    pub fn is_exceptional(&self) -> bool {
        matches!(self, RequestStatus::ConfirmFailed | RequestStatus::CancelFailed)
    }

    fn from_i16(v: i16) -> Option<Self> {
        match v {
            0 => Some(Self::Trying),
            1 => Some(Self::Committed),
            2 => Some(Self::ConfirmFailed),
            3 => Some(Self::Cancelled),
            4 => Some(Self::CancelFailed),
            _ => None,
        }
    }
}

smallint_sqlx_type!(RequestStatus);

/// Status of a [`crate::db::models::SuccessStep`] row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(i16)]
pub enum StepStatus {
    Try = 1,
    Confirm = 2,
    Cancel = 3,
}

impl StepStatus {
    fn from_i16(v: i16) -> Option<Self> {
        match v {
            1 => Some(Self::Try),
            2 => Some(Self::Confirm),
            3 => Some(Self::Cancel),
            _ => None,
        }
    }
}

smallint_sqlx_type!(StepStatus);

/// Whether an alert has been emitted for a [`crate::db::models::RequestInfo`] row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(i16)]
pub enum SendStatus {
    NotSent = 0,
    SendSuccess = 1,
}

impl SendStatus {
    fn from_i16(v: i16) -> Option<Self> {
        match v {
            0 => Some(Self::NotSent),
            1 => Some(Self::SendSuccess),
            _ => None,
        }
    }
}

smallint_sqlx_type!(SendStatus);

/// The `{code, msg, data}` envelope every participant and the coordinator itself replies with.
///
/// `code == 0` is success; anything else is a domain-level failure (spec.md §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseEnvelope {
    pub code: i32,
    pub msg: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl ResponseEnvelope {
    pub const SUCCESS: i32 = 0;

    pub fn is_success(&self) -> bool {
        self.code == Self::SUCCESS
    }

    pub fn success(data: Option<serde_json::Value>) -> Self {
        Self {
            code: Self::SUCCESS,
            msg: "ok".to_string(),
            data,
        }
    }

    pub fn failure(code: i32, msg: impl Into<String>) -> Self {
        Self {
            code,
            msg: msg.into(),
            data: None,
        }
    }
}

/// Outcome classification for a single Try/Confirm/Cancel call (spec.md §4.3 step 3).
#[derive(Debug)]
pub enum CallOutcome {
    /// Envelope decoded and `code == 0`.
    Success { raw: Vec<u8>, envelope: ResponseEnvelope },
    /// Network error or timeout — participant may or may not have acted.
    TransportFailed { raw: Vec<u8>, error: String },
    /// HTTP reply received but not valid envelope JSON.
    Unparseable { raw: Vec<u8>, error: String },
    /// Valid envelope with a non-zero code.
    DomainFailed { raw: Vec<u8>, envelope: ResponseEnvelope },
}

impl CallOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, CallOutcome::Success { .. })
    }

    /// The raw response bytes recorded on the `SuccessStep` row regardless of outcome.
    pub fn raw(&self) -> &[u8] {
        match self {
            CallOutcome::Success { raw, .. }
            | CallOutcome::TransportFailed { raw, .. }
            | CallOutcome::Unparseable { raw, .. }
            | CallOutcome::DomainFailed { raw, .. } => raw,
        }
    }

    /// The parsed envelope, when one was available (Success and DomainFailed only).
    pub fn envelope(&self) -> Option<&ResponseEnvelope> {
        match self {
            CallOutcome::Success { envelope, .. } | CallOutcome::DomainFailed { envelope, .. } => Some(envelope),
            _ => None,
        }
    }

    /// Human-readable reason, used for logging and for the client-facing `msg`.
    pub fn reason(&self) -> String {
        match self {
            CallOutcome::Success { .. } => "ok".to_string(),
            CallOutcome::TransportFailed { error, .. } => error.clone(),
            CallOutcome::Unparseable { error, .. } => error.clone(),
            CallOutcome::DomainFailed { envelope, .. } => envelope.msg.clone(),
        }
    }
}

/// Which TCC phase a participant call belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Try,
    Confirm,
    Cancel,
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Phase::Try => "try",
            Phase::Confirm => "confirm",
            Phase::Cancel => "cancel",
        };
        f.write_str(s)
    }
}
