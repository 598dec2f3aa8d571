//! Axum route handlers.

use crate::api::AppState;
use crate::orchestrator::InboundRequest;
use crate::types::{HttpMethod, ResponseEnvelope};
use axum::extract::{Path, State};
use axum::http::{HeaderMap, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::{Json, body::Bytes};
use std::str::FromStr;

/// The single inbound TCC handler (spec.md §6): forwards method, headers,
/// and raw body verbatim into the Orchestrator, under the logical path that
/// remains after stripping the coordinator prefix.
pub async fn handle_tcc_request(State(state): State<AppState>, Path(path): Path<String>, method: Method, headers: HeaderMap, body: Bytes) -> Response {
    let method = match HttpMethod::from_str(method.as_str()) {
        Ok(m) => m,
        Err(_) => {
            return Json(ResponseEnvelope::failure(crate::errors::CODE_NOT_FOUND, format!("unsupported method {method}"))).into_response();
        }
    };

    let headers: Vec<(String, String)> = headers
        .iter()
        .filter_map(|(name, value)| value.to_str().ok().map(|v| (name.as_str().to_string(), v.to_string())))
        .collect();

    let request = InboundRequest {
        path: format!("/{path}"),
        method,
        headers,
        body: body.to_vec(),
    };

    match state.orchestrator.handle_request(request).await {
        Ok(envelope) => Json(envelope).into_response(),
        Err(err) => err.into_response(),
    }
}

/// Liveness: the process is up and serving. Always 200.
pub async fn healthz() -> StatusCode {
    StatusCode::OK
}

/// Readiness: 200 only once the Router has completed its initial load from
/// the config store (spec.md §4.1's load-all-then-watch contract), 503
/// otherwise.
pub async fn readyz(State(state): State<AppState>) -> Response {
    if state.router.is_ready() {
        StatusCode::OK.into_response()
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "router not yet ready").into_response()
    }
}
