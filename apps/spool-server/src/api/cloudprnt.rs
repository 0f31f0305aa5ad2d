use std::net::SocketAddr;

use axum::extract::{ConnectInfo, Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;
use spool_topics as topics;
use tracing::{debug, info, warn};

use crate::jobs::{FetchOutcome, Job};
use crate::responses::{json_ok, problem};
use crate::{sweeper, util, AppState};

/// Header the printers identify themselves with.
pub const SERIAL_HEADER: &str = "x-star-serial-number";

/// The only media type this service serves.
pub const MEDIA_TYPE: &str = "image/png";

fn idle() -> Response {
    json_ok(json!({"jobReady": false}))
}

/// `"OK"`, `"200 OK"`, `"200"` or anything starting with `2`,
/// case-insensitive, counts as a successful print.
fn is_success_code(code: &str) -> bool {
    let code = code.trim();
    code.eq_ignore_ascii_case("ok") || code.starts_with('2')
}

async fn record_stage(state: &AppState, serial: &str, job: &Job, stage: &str) {
    state
        .history()
        .record(
            serial,
            Utc::now(),
            &job.tenant,
            stage,
            &job.token,
            job.meta.customer_name.clone(),
            job.meta.order_number.clone(),
        )
        .await;
}

/// Record a stage against the serial the job was offered through; used by
/// the fetch and confirm paths, which only carry a token. A job fetched
/// without ever being offered has no owning serial and leaves no entry.
async fn record_stage_for_job(state: &AppState, job: &Job, stage: &str) {
    if let Some(serial) = job.offered_by.as_deref() {
        record_stage(state, serial, job, stage).await;
    }
}

/// Printer poll: is work available?
#[utoipa::path(
    post,
    path = "/cloudprnt",
    tag = "CloudPRNT",
    responses(
        (status = 200, description = "Idle or offer", body = serde_json::Value)
    )
)]
pub async fn poll(
    State(state): State<AppState>,
    addr: Option<ConnectInfo<SocketAddr>>,
    headers: axum::http::HeaderMap,
) -> Response {
    let serial = headers
        .get(SERIAL_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .unwrap_or("");
    if serial.is_empty() {
        return idle();
    }
    let tenants = state.registry().tenants_for(serial).await;
    if tenants.is_empty() {
        // Unknown serials get no presence record: typos and third-party
        // probes must not pollute the printer list.
        debug!(serial, "poll from unregistered serial");
        return idle();
    }

    let now = Utc::now();
    let address = addr
        .map(|ConnectInfo(a)| a.to_string())
        .unwrap_or_else(|| "unknown".to_string());
    state.presence().mark_seen(serial, &address, now).await;
    state.bus().publish(
        topics::TOPIC_PRINTER_SEEN,
        &json!({"serial": serial, "address": address}),
    );

    // Recover this serial's own queues before selecting, so a job whose
    // offer aged out while the printer was away is immediately offerable
    // again.
    let rewound = state
        .jobs()
        .sweep_tenants(&tenants, now, util::offer_timeout(), util::sent_timeout())
        .await;
    for (job, stuck_stage) in &rewound {
        sweeper::note_requeued(&state, job, stuck_stage).await;
    }

    // Cursor read, queue scan, and cursor commit all happen inside the
    // job store's lock; concurrent polls for one serial cannot lose an
    // advance or receive the same token.
    match state.jobs().select_for_serial(serial, &tenants, now).await {
        Some(job) => {
            info!(serial, token = %job.token, tenant = %job.tenant, "job offered");
            state.bus().publish(
                topics::TOPIC_JOB_OFFERED,
                &json!({"token": job.token.clone(), "tenant": job.tenant.clone(), "serial": serial}),
            );
            record_stage(&state, serial, &job, "offered").await;
            json_ok(json!({
                "jobReady": true,
                "jobToken": job.token,
                "mediaTypes": [MEDIA_TYPE],
                "deleteMethod": "DELETE",
            }))
        }
        None => idle(),
    }
}

#[derive(Deserialize)]
pub struct FetchParams {
    token: String,
    #[serde(rename = "type")]
    media_type: String,
}

/// Printer fetch: retrieve the raster payload for an offered token.
#[utoipa::path(
    get,
    path = "/cloudprnt",
    tag = "CloudPRNT",
    params(
        ("token" = String, Query, description = "Job token"),
        ("type" = String, Query, description = "Requested media type")
    ),
    responses(
        (status = 200, description = "Raster payload, or jobReady:false while rendering", body = serde_json::Value),
        (status = 404, description = "Unknown token"),
        (status = 415, description = "Unsupported media type")
    )
)]
pub async fn fetch(State(state): State<AppState>, Query(params): Query<FetchParams>) -> Response {
    if params.media_type != MEDIA_TYPE {
        return problem(
            StatusCode::UNSUPPORTED_MEDIA_TYPE,
            "Unsupported Media Type",
            format!("only {MEDIA_TYPE} is served"),
        );
    }
    match state.jobs().begin_send(&params.token, Utc::now()).await {
        FetchOutcome::NotFound => problem(
            StatusCode::NOT_FOUND,
            "Not Found",
            format!("unknown token {}", params.token),
        ),
        // Not an error: rendering is still in flight and the printer
        // should retry. The firmware expects this exact 200 body.
        FetchOutcome::NotReady => idle(),
        FetchOutcome::Ready {
            job,
            content,
            was_queued,
        } => {
            if was_queued {
                warn!(
                    token = %job.token,
                    "printer fetched a job it was never offered; serving anyway"
                );
            }
            info!(token = %job.token, tenant = %job.tenant, bytes = content.len(), "job sent");
            state.bus().publish(
                topics::TOPIC_JOB_SENT,
                &json!({
                    "token": job.token.clone(),
                    "tenant": job.tenant.clone(),
                    "serial": job.offered_by.clone(),
                    "bytes": content.len(),
                }),
            );
            record_stage_for_job(&state, &job, "sent").await;
            ([(header::CONTENT_TYPE, MEDIA_TYPE)], content).into_response()
        }
    }
}

#[derive(Deserialize)]
pub struct ConfirmParams {
    #[serde(default)]
    token: String,
    #[serde(default)]
    code: String,
}

/// Printer confirm/reject. Always 200: an unknown token most likely aged
/// out and was removed, and a non-200 here only provokes retry storms.
#[utoipa::path(
    delete,
    path = "/cloudprnt",
    tag = "CloudPRNT",
    params(
        ("token" = String, Query, description = "Job token"),
        ("code" = String, Query, description = "Printer result code")
    ),
    responses(
        (status = 200, description = "Acknowledged", body = serde_json::Value)
    )
)]
pub async fn confirm(
    State(state): State<AppState>,
    Query(params): Query<ConfirmParams>,
) -> Response {
    if params.token.is_empty() {
        return json_ok(json!({"ok": true}));
    }
    if is_success_code(&params.code) {
        match state.jobs().confirm(&params.token).await {
            Some(job) => {
                info!(token = %job.token, tenant = %job.tenant, "job completed");
                state.bus().publish(
                    topics::TOPIC_JOB_COMPLETED,
                    &json!({
                        "token": job.token.clone(),
                        "tenant": job.tenant.clone(),
                        "serial": job.offered_by.clone(),
                    }),
                );
                record_stage_for_job(&state, &job, "completed").await;
            }
            None => debug!(token = %params.token, "confirmation for unknown token"),
        }
    } else {
        match state.jobs().reject(&params.token).await {
            Some(job) => {
                warn!(
                    token = %job.token,
                    tenant = %job.tenant,
                    code = %params.code,
                    "print rejected; job requeued"
                );
                state.bus().publish(
                    topics::TOPIC_JOB_REJECTED,
                    &json!({
                        "token": job.token.clone(),
                        "tenant": job.tenant.clone(),
                        "serial": job.offered_by.clone(),
                        "code": params.code,
                    }),
                );
                record_stage_for_job(&state, &job, "failed").await;
            }
            None => debug!(token = %params.token, "rejection for unknown token"),
        }
    }
    json_ok(json!({"ok": true}))
}
