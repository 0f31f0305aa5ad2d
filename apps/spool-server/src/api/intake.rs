use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value};
use spool_topics as topics;
use tracing::info;

use crate::jobs::OrderMeta;
use crate::responses::intake_error;
use crate::AppState;

#[derive(Deserialize)]
#[serde(untagged)]
pub enum TenantSelector {
    One(String),
    Many(Vec<String>),
}

impl TenantSelector {
    fn into_vec(self) -> Vec<String> {
        match self {
            TenantSelector::One(t) => vec![t],
            TenantSelector::Many(ts) => ts,
        }
    }
}

#[derive(Deserialize)]
pub struct PrintRequest {
    #[serde(rename = "restaurantId")]
    restaurant_id: Option<TenantSelector>,
    order: Option<Value>,
}

fn meta_field(order: &Value, key: &str) -> Option<String> {
    match order.get(key) {
        Some(Value::String(s)) if !s.is_empty() => Some(s.clone()),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    }
}

/// Accept an order for one or more tenants. Validation is all-or-nothing:
/// any unknown tenant rejects the whole request and creates no jobs. On
/// success the caller gets its tokens immediately; rendering continues in
/// the background and attaches one shared buffer to every created job.
#[utoipa::path(
    post,
    path = "/api/print",
    tag = "Intake",
    request_body = serde_json::Value,
    responses(
        (status = 202, description = "Accepted", body = serde_json::Value),
        (status = 400, description = "Missing field", body = serde_json::Value),
        (status = 404, description = "Unknown tenant(s)", body = serde_json::Value)
    )
)]
pub async fn submit(State(state): State<AppState>, Json(req): Json<PrintRequest>) -> Response {
    let tenants = match req.restaurant_id {
        Some(selector) => selector.into_vec(),
        None => return intake_error(StatusCode::BAD_REQUEST, "restaurantId is required"),
    };
    if tenants.is_empty() || tenants.iter().any(String::is_empty) {
        return intake_error(StatusCode::BAD_REQUEST, "restaurantId is required");
    }
    let Some(order) = req.order else {
        return intake_error(StatusCode::BAD_REQUEST, "order is required");
    };

    let mut unknown = unknown_tenants(&state, &tenants).await;
    if !unknown.is_empty() {
        // The mapping may simply be stale; give the source one throttled
        // chance before rejecting.
        state.bindings().ensure_fresh(&state).await;
        unknown = unknown_tenants(&state, &tenants).await;
    }
    if !unknown.is_empty() {
        return intake_error(
            StatusCode::NOT_FOUND,
            format!("Unknown restaurantId(s): {}", unknown.join(", ")),
        );
    }

    let meta = OrderMeta {
        customer_name: meta_field(&order, "customerName"),
        order_number: meta_field(&order, "orderNumber"),
        order_id: meta_field(&order, "orderId"),
    };

    let now = Utc::now();
    let mut tokens = Vec::with_capacity(tenants.len());
    for tenant in &tenants {
        let token = state.jobs().create(tenant, meta.clone(), now).await;
        state.bus().publish(
            topics::TOPIC_JOB_RECEIVED,
            &json!({"token": token.clone(), "tenant": tenant, "orderId": meta.order_id.clone()}),
        );
        for serial in state.registry().serials_for(tenant).await {
            state
                .history()
                .record(
                    &serial,
                    now,
                    tenant,
                    "received",
                    &token,
                    meta.customer_name.clone(),
                    meta.order_number.clone(),
                )
                .await;
        }
        tokens.push(token);
    }
    info!(
        tenants = tenants.len(),
        order_id = meta.order_id.as_deref().unwrap_or("-"),
        "print request accepted"
    );

    state.renders().submit(order, tokens.clone());

    (
        StatusCode::ACCEPTED,
        Json(json!({"ok": true, "tokens": tokens})),
    )
        .into_response()
}

async fn unknown_tenants(state: &AppState, tenants: &[String]) -> Vec<String> {
    let mut unknown = Vec::new();
    for tenant in tenants {
        if !state.registry().contains_tenant(tenant).await && !unknown.contains(tenant) {
            unknown.push(tenant.clone());
        }
    }
    unknown
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn selector_accepts_one_or_many() {
        let one: PrintRequest =
            serde_json::from_value(json!({"restaurantId": "t1", "order": {}})).unwrap();
        assert_eq!(one.restaurant_id.unwrap().into_vec(), vec!["t1"]);

        let many: PrintRequest =
            serde_json::from_value(json!({"restaurantId": ["tA", "tB"], "order": {}})).unwrap();
        assert_eq!(many.restaurant_id.unwrap().into_vec(), vec!["tA", "tB"]);
    }

    #[test]
    fn meta_fields_pass_through_strings_and_numbers() {
        let order = json!({"customerName": "Ada", "orderNumber": 41, "orderId": ""});
        assert_eq!(meta_field(&order, "customerName").as_deref(), Some("Ada"));
        assert_eq!(meta_field(&order, "orderNumber").as_deref(), Some("41"));
        assert_eq!(meta_field(&order, "orderId"), None);
        assert_eq!(meta_field(&order, "missing"), None);
    }
}
