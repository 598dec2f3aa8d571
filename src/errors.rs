//! Root error type and HTTP response conversion.
//!
//! Mirrors the error kinds in spec.md §7, mapped onto the closed response-code
//! set in §6: every branch either yields one of these variants or is handled
//! internally (the reconciler's `LockUnavailable` case never reaches here).

use crate::db::errors::DbError;
use crate::types::ResponseEnvelope;
use axum::response::{IntoResponse, Response};
use thiserror::Error as ThisError;

/// The coordinator's closed response-code set (spec.md §6).
pub const CODE_SUCCESS: i32 = 0;
pub const CODE_INSERT_TCC_DATA_ERR: i32 = 1;
pub const CODE_NOT_FOUND: i32 = 2;

#[derive(ThisError, Debug)]
pub enum Error {
    /// `RuntimeApi` value could not be parsed, or its pattern is ambiguous
    /// against an already-loaded one (spec.md §4.1).
    #[error("invalid runtime api config: {message}")]
    Config { message: String },

    /// No `RuntimeApi` pattern matches the inbound path (spec.md §4.3 step 2).
    #[error("no route matches {path}")]
    RouteNotFound { path: String },

    /// The Persistence Gateway failed, or a row existed but violated the
    /// status machine's transition rule (spec.md §4.4).
    #[error(transparent)]
    Database(#[from] DbError),

    /// Outbound HTTP call failed at the transport layer (network, timeout).
    #[error("transport error calling {url}: {message}")]
    Transport { url: String, message: String },

    /// Participant replied but the body was not a valid `ResponseEnvelope`.
    #[error("unparseable reply from {url}: {message}")]
    Protocol { url: String, message: String },

    /// Participant replied with a well-formed envelope but `code != 0`.
    #[error("domain failure from {url}: {envelope:?}")]
    Domain { url: String, envelope: ResponseEnvelope },

    /// Reconciler could not acquire the distributed lock this tick. Never
    /// surfaced to a client; logged and the tick is skipped.
    #[error("distributed lock unavailable")]
    LockUnavailable,

    /// The matched `RuntimeApi` has no participant nodes (spec.md §8 boundary).
    #[error("no method need to execute")]
    NoNodes,

    /// Pure rewriter failures (spec.md §4.2).
    #[error(transparent)]
    Rewrite(#[from] crate::rewrite::RewriteError),

    /// Unexpected error with full context chain.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl Error {
    /// Maps to the closed response-code set (spec.md §6). Transport/Protocol/
    /// Domain failures on Try are surfaced to the client as
    /// `InsertTccDataErr`, preserving the compatibility choice spec.md §9
    /// calls out explicitly rather than inventing a `TryFailed` code.
    pub fn code(&self) -> i32 {
        match self {
            Error::RouteNotFound { .. } => CODE_NOT_FOUND,
            Error::Config { .. }
            | Error::Database(_)
            | Error::Transport { .. }
            | Error::Protocol { .. }
            | Error::Domain { .. }
            | Error::NoNodes
            | Error::Rewrite(_)
            | Error::Other(_) => CODE_INSERT_TCC_DATA_ERR,
            Error::LockUnavailable => CODE_INSERT_TCC_DATA_ERR,
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        match &self {
            Error::Database(DbError::Other(_)) | Error::Other(_) => {
                tracing::error!("internal error: {:#}", self);
            }
            Error::Database(_) | Error::Config { .. } => {
                tracing::warn!("{}", self);
            }
            Error::Transport { .. } | Error::Protocol { .. } | Error::Domain { .. } => {
                tracing::warn!("participant call failed: {}", self);
            }
            Error::RouteNotFound { .. } | Error::NoNodes | Error::Rewrite(_) => {
                tracing::debug!("client error: {}", self);
            }
            Error::LockUnavailable => {
                tracing::debug!("reconciler tick skipped: lock unavailable");
            }
        }

        let envelope = ResponseEnvelope::failure(self.code(), self.user_message());
        // Per spec.md §6, HTTP status is always 200 for non-transport failures;
        // the coordinator's own errors are all conveyed via `code`, never via status.
        axum::Json(envelope).into_response()
    }
}

impl Error {
    pub fn user_message(&self) -> String {
        match self {
            Error::Domain { envelope, .. } => envelope.msg.clone(),
            Error::NoNodes => "no method need to execute".to_string(),
            other => other.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
