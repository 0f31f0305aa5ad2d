use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::Response;
use chrono::Utc;
use serde_json::json;
use tracing::warn;

use crate::responses::{intake_error, json_ok};
use crate::{util, AppState};

/// Every configured printer with its tenants and presence, configuration
/// order. Serials that never polled show `online:false` and no last_seen.
#[utoipa::path(
    get,
    path = "/api/printers",
    tag = "Printers",
    responses((status = 200, description = "Configured printers", body = serde_json::Value))
)]
pub async fn list(State(state): State<AppState>) -> Response {
    let now = Utc::now();
    let window = util::online_window();
    let mut printers = Vec::new();
    for (serial, tenants) in state.registry().snapshot().await {
        let presence = state.presence().view(&serial, now, window).await;
        printers.push(match presence {
            Some(p) => json!({
                "serial": serial,
                "tenants": tenants,
                "online": p.online,
                "lastSeen": p.last_seen,
                "ageMs": p.age_ms,
                "address": p.address,
            }),
            None => json!({
                "serial": serial,
                "tenants": tenants,
                "online": false,
                "lastSeen": null,
            }),
        });
    }
    json_ok(json!({"printers": printers}))
}

/// Online subset, most recently seen first.
#[utoipa::path(
    get,
    path = "/api/printers/online",
    tag = "Printers",
    responses((status = 200, description = "Online printers", body = serde_json::Value))
)]
pub async fn online(State(state): State<AppState>) -> Response {
    let now = Utc::now();
    let mut printers = Vec::new();
    for view in state.presence().snapshot(now, util::online_window()).await {
        if !view.online {
            continue;
        }
        let tenants = state.registry().tenants_for(&view.serial).await;
        printers.push(json!({
            "serial": view.serial,
            "tenants": tenants,
            "lastSeen": view.last_seen,
            "ageMs": view.age_ms,
            "address": view.address,
        }));
    }
    json_ok(json!({"printers": printers}))
}

/// Lifecycle history window for one serial, newest first.
#[utoipa::path(
    get,
    path = "/api/printers/{serial}/history",
    tag = "Printers",
    params(("serial" = String, Path, description = "Printer serial")),
    responses((status = 200, description = "History entries", body = serde_json::Value))
)]
pub async fn history(State(state): State<AppState>, Path(serial): Path<String>) -> Response {
    let entries = state.history().snapshot(&serial).await;
    json_ok(json!({"serial": serial, "entries": entries}))
}

/// FIFO introspection of one tenant's queue.
#[utoipa::path(
    get,
    path = "/api/queue/{tenant}",
    tag = "Printers",
    params(("tenant" = String, Path, description = "Tenant identifier")),
    responses((status = 200, description = "Queued jobs", body = serde_json::Value))
)]
pub async fn queue(State(state): State<AppState>, Path(tenant): Path<String>) -> Response {
    let jobs: Vec<_> = state
        .jobs()
        .queue_snapshot(&tenant)
        .await
        .into_iter()
        .map(|job| {
            json!({
                "token": job.token,
                "stage": job.status.stage(),
                "receivedAt": job.received_at.to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
                "offeredAt": job.status.offered_at().map(|t| t.to_rfc3339_opts(chrono::SecondsFormat::Millis, true)),
                "sentAt": job.status.sent_at().map(|t| t.to_rfc3339_opts(chrono::SecondsFormat::Millis, true)),
                "hasContent": job.content.is_some(),
                "offeredBy": job.offered_by,
                "customer": job.meta.customer_name,
                "orderNumber": job.meta.order_number,
                "orderId": job.meta.order_id,
            })
        })
        .collect();
    json_ok(json!({"tenant": tenant, "jobs": jobs}))
}

/// Raw presence dump: everything the tracker has, online or not.
#[utoipa::path(
    get,
    path = "/api/presence",
    tag = "Printers",
    responses((status = 200, description = "Presence records", body = serde_json::Value))
)]
pub async fn presence(State(state): State<AppState>) -> Response {
    let views = state
        .presence()
        .snapshot(Utc::now(), util::online_window())
        .await;
    json_ok(json!({"printers": views}))
}

/// Force a bindings fetch outside the periodic schedule.
#[utoipa::path(
    post,
    path = "/api/bindings/reload",
    tag = "Printers",
    responses(
        (status = 200, description = "Reloaded", body = serde_json::Value),
        (status = 502, description = "Source unreachable", body = serde_json::Value)
    )
)]
pub async fn reload_bindings(State(state): State<AppState>) -> Response {
    match state.bindings().refresh(&state).await {
        Ok(applied) => json_ok(json!({"ok": true, "bindings": applied})),
        Err(err) => {
            warn!(%err, "forced bindings reload failed");
            intake_error(StatusCode::BAD_GATEWAY, err.to_string())
        }
    }
}
