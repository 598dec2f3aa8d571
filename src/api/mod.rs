//! HTTP surface: the inbound TCC handler plus the ambient liveness/readiness
//! routes the teacher's `build_router` always adds alongside core routes.

pub mod handlers;

use crate::router::config_store::ConfigStore;
use axum::Router;
use axum::routing::{any, get};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

/// Everything a request handler needs, constructed once at startup and
/// shared via `axum::extract::State` (spec.md §9's "explicit context value"
/// redesign note).
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: crate::orchestrator::Orchestrator,
    pub router: Arc<ConfigStore>,
    pub tcc_prefix: String,
}

/// Builds the full router: the inbound TCC handler under the configured
/// prefix, plus `/healthz` and `/readyz`, wrapped in request tracing the way
/// `dwctl::build_router` wraps every route in a `TraceLayer`.
pub fn build_router(state: AppState) -> Router {
    let prefix = format!("{}/{{*path}}", state.tcc_prefix.trim_end_matches('/'));

    Router::new()
        .route(&prefix, any(handlers::handle_tcc_request))
        .route("/healthz", get(handlers::healthz))
        .route("/readyz", get(handlers::readyz))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
