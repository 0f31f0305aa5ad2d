use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use chrono::Utc;
use image::GrayImage;
use serde_json::{json, Value};
use tower::ServiceExt;

use spool_server::registry::Binding;
use spool_server::render::ReceiptRenderer;
use spool_server::{raster, routes, AppState};

/// Deterministic stand-in for the external rasterizer: a small fixed
/// canvas, rendered instantly.
struct InstantRenderer;

#[async_trait]
impl ReceiptRenderer for InstantRenderer {
    async fn render(&self, _order: &Value) -> anyhow::Result<GrayImage> {
        Ok(GrayImage::from_pixel(
            raster::RECEIPT_WIDTH,
            32,
            image::Luma([255u8]),
        ))
    }
}

async fn test_app(bindings: &[(&str, &str)]) -> (Router, AppState) {
    let (router, endpoints) = routes();
    let state = AppState::builder()
        .with_renderer(Arc::new(InstantRenderer))
        .with_endpoints(endpoints)
        .build();
    let bindings: Vec<Binding> = bindings
        .iter()
        .map(|(tenant, serial)| Binding {
            tenant: tenant.to_string(),
            serial: serial.to_string(),
        })
        .collect();
    state.registry().replace_all(&bindings).await;
    (router.with_state(state.clone()), state)
}

async fn send(app: &Router, req: Request<Body>) -> (StatusCode, Vec<u8>) {
    let response = app.clone().oneshot(req).await.expect("response");
    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body");
    (status, body.to_vec())
}

async fn send_json(app: &Router, req: Request<Body>) -> (StatusCode, Value) {
    let (status, body) = send(app, req).await;
    let value = serde_json::from_slice(&body).unwrap_or(Value::Null);
    (status, value)
}

fn intake_req(body: Value) -> Request<Body> {
    Request::post("/api/print")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn poll_req(serial: &str) -> Request<Body> {
    Request::post("/cloudprnt")
        .header("X-Star-Serial-Number", serial)
        .body(Body::empty())
        .unwrap()
}

fn fetch_req(token: &str) -> Request<Body> {
    Request::get(format!("/cloudprnt?token={token}&type=image/png"))
        .body(Body::empty())
        .unwrap()
}

fn confirm_req(token: &str, code: &str) -> Request<Body> {
    let code = code.replace(' ', "%20");
    Request::delete(format!("/cloudprnt?token={token}&code={code}"))
        .body(Body::empty())
        .unwrap()
}

/// Submit one order for `tenant` and wait until the background render has
/// attached content to the returned token.
async fn intake_and_render(app: &Router, state: &AppState, tenant: &str) -> String {
    let (status, body) = send_json(
        app,
        intake_req(json!({"restaurantId": tenant, "order": {"orderNumber": 7}})),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body["ok"], true);
    let token = body["tokens"][0].as_str().expect("token").to_string();
    wait_for_content(state, &token).await;
    token
}

async fn wait_for_content(state: &AppState, token: &str) {
    for _ in 0..200 {
        if let Some(job) = state.jobs().peek(token).await {
            if job.content.is_some() {
                return;
            }
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("render did not attach content to {token} within 1s");
}

#[tokio::test]
async fn single_tenant_happy_path() {
    let (app, state) = test_app(&[("t1", "S1")]).await;
    let token = intake_and_render(&app, &state, "t1").await;

    // Poll: the offer names the token, media type, and delete method.
    let (status, offer) = send_json(&app, poll_req("S1")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(offer["jobReady"], true);
    assert_eq!(offer["jobToken"], token.as_str());
    assert_eq!(offer["mediaTypes"], json!(["image/png"]));
    assert_eq!(offer["deleteMethod"], "DELETE");

    // Fetch: PNG plus cut bytes, served as image/png.
    let response = app.clone().oneshot(fetch_req(&token)).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get(header::CONTENT_TYPE).unwrap(),
        "image/png"
    );
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    assert_eq!(&body[..4], &[0x89, b'P', b'N', b'G']);
    assert_eq!(&body[body.len() - 3..], &raster::CUT_SEQUENCE);
    assert_eq!(state.jobs().peek(&token).await.unwrap().status.stage(), "sent");

    // Confirm: job is gone, the printer goes idle again.
    let (status, body) = send_json(&app, confirm_req(&token, "OK")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["ok"], true);
    let (_, idle) = send_json(&app, poll_req("S1")).await;
    assert_eq!(idle["jobReady"], false);

    // History carries the whole lifecycle, newest first.
    let (_, history) = send_json(
        &app,
        Request::get("/api/printers/S1/history")
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    let stages: Vec<&str> = history["entries"]
        .as_array()
        .unwrap()
        .iter()
        .map(|e| e["stage"].as_str().unwrap())
        .collect();
    assert_eq!(stages, vec!["completed", "sent", "offered", "received"]);
}

#[tokio::test]
async fn confirming_twice_is_idempotent() {
    let (app, state) = test_app(&[("t1", "S1")]).await;
    let token = intake_and_render(&app, &state, "t1").await;
    send_json(&app, poll_req("S1")).await;
    send(&app, fetch_req(&token)).await;

    let (status, _) = send_json(&app, confirm_req(&token, "200 OK")).await;
    assert_eq!(status, StatusCode::OK);
    let (status, body) = send_json(&app, confirm_req(&token, "200 OK")).await;
    assert_eq!(status, StatusCode::OK, "repeat confirm stays 200");
    assert_eq!(body["ok"], true);
    assert!(state.jobs().peek(&token).await.is_none());
}

#[tokio::test]
async fn silent_printer_gets_the_same_token_after_the_sweep() {
    let (app, state) = test_app(&[("t1", "S1")]).await;
    let token = intake_and_render(&app, &state, "t1").await;

    let (_, offer) = send_json(&app, poll_req("S1")).await;
    assert_eq!(offer["jobToken"], token.as_str());

    // The printer never fetches. While the offer is fresh, polls stay
    // idle; after offer_timeout the sweep rewinds and the same token is
    // offered again with its content intact.
    let (_, idle) = send_json(&app, poll_req("S1")).await;
    assert_eq!(idle["jobReady"], false);

    let rewound = state
        .jobs()
        .sweep(
            Utc::now() + chrono::Duration::seconds(11),
            Duration::from_secs(10),
            Duration::from_secs(20),
        )
        .await;
    assert_eq!(rewound.len(), 1);

    let (_, offer) = send_json(&app, poll_req("S1")).await;
    assert_eq!(offer["jobReady"], true);
    assert_eq!(offer["jobToken"], token.as_str(), "same token, same content");
}

#[tokio::test]
async fn shared_serial_alternates_between_tenants() {
    let (app, state) = test_app(&[("tA", "S2"), ("tB", "S2")]).await;
    let mut by_token = std::collections::HashMap::new();
    for _ in 0..4 {
        let a = intake_and_render(&app, &state, "tA").await;
        by_token.insert(a, "tA");
        let b = intake_and_render(&app, &state, "tB").await;
        by_token.insert(b, "tB");
    }

    let mut offered = Vec::new();
    for _ in 0..8 {
        let (_, offer) = send_json(&app, poll_req("S2")).await;
        assert_eq!(offer["jobReady"], true);
        let token = offer["jobToken"].as_str().unwrap();
        offered.push(*by_token.get(token).expect("known token"));
    }
    assert_eq!(
        offered,
        vec!["tA", "tB", "tA", "tB", "tA", "tB", "tA", "tB"]
    );
}

#[tokio::test]
async fn fan_out_shares_one_rendering_across_tenants() {
    let (app, state) = test_app(&[("tA", "SA"), ("tB", "SB"), ("tC", "SC")]).await;
    let (status, body) = send_json(
        &app,
        intake_req(json!({"restaurantId": ["tA", "tB", "tC"], "order": {"orderId": "o-1"}})),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    let tokens: Vec<String> = body["tokens"]
        .as_array()
        .unwrap()
        .iter()
        .map(|t| t.as_str().unwrap().to_string())
        .collect();
    assert_eq!(tokens.len(), 3);
    for token in &tokens {
        wait_for_content(&state, token).await;
    }

    // Each tenant's printer fetches independently; all three payloads are
    // the same shared buffer.
    let mut bodies = Vec::new();
    for (serial, token) in [("SA", &tokens[0]), ("SB", &tokens[1]), ("SC", &tokens[2])] {
        let (_, offer) = send_json(&app, poll_req(serial)).await;
        assert_eq!(offer["jobToken"], token.as_str());
        let (status, body) = send(&app, fetch_req(token)).await;
        assert_eq!(status, StatusCode::OK);
        bodies.push(body);
    }
    assert_eq!(bodies[0], bodies[1]);
    assert_eq!(bodies[1], bodies[2]);
}

#[tokio::test]
async fn failure_code_requeues_and_reoffers() {
    let (app, state) = test_app(&[("t1", "S1")]).await;
    let token = intake_and_render(&app, &state, "t1").await;

    send_json(&app, poll_req("S1")).await;
    send(&app, fetch_req(&token)).await;
    let (status, _) = send_json(&app, confirm_req(&token, "500")).await;
    assert_eq!(status, StatusCode::OK);

    let (_, offer) = send_json(&app, poll_req("S1")).await;
    assert_eq!(offer["jobToken"], token.as_str(), "rejected job is re-offered");

    let (_, history) = send_json(
        &app,
        Request::get("/api/printers/S1/history")
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    let stages: Vec<&str> = history["entries"]
        .as_array()
        .unwrap()
        .iter()
        .map(|e| e["stage"].as_str().unwrap())
        .collect();
    // Newest first: the fresh offer follows the failure.
    assert_eq!(stages[0], "offered");
    assert_eq!(stages[1], "failed");
}

#[tokio::test]
async fn unknown_tenant_rejects_the_whole_request() {
    let (app, state) = test_app(&[("t1", "S1")]).await;
    let (status, body) = send_json(
        &app,
        intake_req(json!({"restaurantId": ["t1", "ghost"], "order": {}})),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["ok"], false);
    assert_eq!(body["error"], "Unknown restaurantId(s): ghost");

    // All-or-nothing: the known tenant got no job either.
    let (_, queue) = send_json(
        &app,
        Request::get("/api/queue/t1").body(Body::empty()).unwrap(),
    )
    .await;
    assert_eq!(queue["jobs"].as_array().unwrap().len(), 0);
    assert_eq!(state.jobs().job_count().await, 0);
}

#[tokio::test]
async fn missing_fields_are_rejected_with_400() {
    let (app, _state) = test_app(&[("t1", "S1")]).await;
    let (status, body) = send_json(&app, intake_req(json!({"order": {}}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "restaurantId is required");

    let (status, body) = send_json(&app, intake_req(json!({"restaurantId": "t1"}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "order is required");
}

#[tokio::test]
async fn unknown_serial_polls_leave_no_trace() {
    let (app, state) = test_app(&[("t1", "S1")]).await;
    let (status, body) = send_json(&app, poll_req("TYPO-9000")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["jobReady"], false);

    let (_, presence) = send_json(
        &app,
        Request::get("/api/presence").body(Body::empty()).unwrap(),
    )
    .await;
    assert_eq!(presence["printers"].as_array().unwrap().len(), 0);
    assert_eq!(state.jobs().job_count().await, 0);
}

#[tokio::test]
async fn media_type_mismatch_is_415_and_does_not_transition() {
    let (app, state) = test_app(&[("t1", "S1")]).await;
    let token = intake_and_render(&app, &state, "t1").await;
    send_json(&app, poll_req("S1")).await;

    let (status, _) = send(
        &app,
        Request::get(format!("/cloudprnt?token={token}&type=text/plain"))
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::UNSUPPORTED_MEDIA_TYPE);
    assert_eq!(
        state.jobs().peek(&token).await.unwrap().status.stage(),
        "offered"
    );
}

#[tokio::test]
async fn fetch_before_render_completion_reports_not_ready() {
    // No renderer ever completes here: the broker is wired with a stub
    // that parks forever, so content never arrives.
    struct NeverRenderer;
    #[async_trait]
    impl ReceiptRenderer for NeverRenderer {
        async fn render(&self, _order: &Value) -> anyhow::Result<GrayImage> {
            std::future::pending().await
        }
    }

    let (router, endpoints) = routes();
    let state = AppState::builder()
        .with_renderer(Arc::new(NeverRenderer))
        .with_endpoints(endpoints)
        .build();
    state
        .registry()
        .replace_all(&[Binding {
            tenant: "t1".to_string(),
            serial: "S1".to_string(),
        }])
        .await;
    let app = router.with_state(state.clone());

    let (_, body) = send_json(
        &app,
        intake_req(json!({"restaurantId": "t1", "order": {}})),
    )
    .await;
    let token = body["tokens"][0].as_str().unwrap().to_string();

    // Not offered (no content), but a premature fetch must come back as a
    // 200 jobReady:false body so the printer retries.
    let (_, idle) = send_json(&app, poll_req("S1")).await;
    assert_eq!(idle["jobReady"], false);
    let (status, body) = send_json(&app, fetch_req(&token)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["jobReady"], false);

    // Unknown tokens are a plain 404.
    let (status, _) = send(&app, fetch_req("no-such-token")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn history_lands_only_on_the_serial_that_printed() {
    // One tenant, two printers. The whole lifecycle runs through S1;
    // S2 must not inherit sent/completed entries it never produced.
    let (app, state) = test_app(&[("tA", "S1"), ("tA", "S2")]).await;
    let token = intake_and_render(&app, &state, "tA").await;

    let (_, offer) = send_json(&app, poll_req("S1")).await;
    assert_eq!(offer["jobToken"], token.as_str());
    let (status, _) = send(&app, fetch_req(&token)).await;
    assert_eq!(status, StatusCode::OK);
    send_json(&app, confirm_req(&token, "OK")).await;

    let stages = |history: &Value| -> Vec<String> {
        history["entries"]
            .as_array()
            .unwrap()
            .iter()
            .map(|e| e["stage"].as_str().unwrap().to_string())
            .collect()
    };
    let (_, s1) = send_json(
        &app,
        Request::get("/api/printers/S1/history")
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(stages(&s1), vec!["completed", "sent", "offered", "received"]);

    // S2 only ever saw the intake announcement.
    let (_, s2) = send_json(
        &app,
        Request::get("/api/printers/S2/history")
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(stages(&s2), vec!["received"]);
}

#[tokio::test]
async fn registry_swap_mid_flight_drains_gracefully() {
    let (app, state) = test_app(&[("t1", "S1")]).await;
    let token = intake_and_render(&app, &state, "t1").await;
    let (_, offer) = send_json(&app, poll_req("S1")).await;
    assert_eq!(offer["jobToken"], token.as_str());

    // The tenant vanishes from the mapping while the job is in flight.
    state.registry().replace_all(&[]).await;
    let (_, idle) = send_json(&app, poll_req("S1")).await;
    assert_eq!(idle["jobReady"], false);

    // The orphaned job still completes through the token protocol.
    let (status, _) = send(&app, fetch_req(&token)).await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = send_json(&app, confirm_req(&token, "OK")).await;
    assert_eq!(status, StatusCode::OK);
    assert!(state.jobs().peek(&token).await.is_none());
}
