use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::{json, Value};

pub fn json_ok(payload: Value) -> Response {
    (StatusCode::OK, Json(payload)).into_response()
}

/// problem+json shape for the printer-facing and query errors.
pub fn problem(status: StatusCode, title: &str, detail: impl Into<String>) -> Response {
    (
        status,
        Json(json!({
            "type": "about:blank",
            "title": title,
            "status": status.as_u16(),
            "detail": detail.into(),
        })),
    )
        .into_response()
}

/// Intake-style error body: `{ok:false, error}` with the given status.
pub fn intake_error(status: StatusCode, message: impl Into<String>) -> Response {
    (
        status,
        Json(json!({"ok": false, "error": message.into()})),
    )
        .into_response()
}
