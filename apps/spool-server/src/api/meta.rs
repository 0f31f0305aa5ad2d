use axum::extract::State;
use axum::response::Response;
use serde_json::json;

use crate::responses::json_ok;
use crate::AppState;

/// Health probe.
#[utoipa::path(
    get,
    path = "/healthz",
    tag = "Meta",
    responses((status = 200, description = "Service healthy", body = serde_json::Value))
)]
pub async fn healthz() -> Response {
    json_ok(json!({"ok": true}))
}

/// Service metadata and endpoints index.
#[utoipa::path(
    get,
    path = "/about",
    tag = "Meta",
    responses((status = 200, description = "Service metadata", body = serde_json::Value))
)]
pub async fn about(State(state): State<AppState>) -> Response {
    json_ok(json!({
        "name": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
        "endpoints": state.endpoints().as_ref(),
        "jobs": state.jobs().job_count().await,
    }))
}

/// Event bus counters for ops.
#[utoipa::path(
    get,
    path = "/state/events",
    tag = "Meta",
    responses((status = 200, description = "Bus stats", body = serde_json::Value))
)]
pub async fn state_events(State(state): State<AppState>) -> Response {
    json_ok(json!({"bus": state.bus().stats()}))
}
