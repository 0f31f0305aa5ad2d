use axum::response::Response;
use utoipa::OpenApi;

use crate::responses::json_ok;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "spool-server",
        description = "Multi-tenant pull-print dispatch service"
    ),
    paths(
        crate::api::meta::healthz,
        crate::api::meta::about,
        crate::api::meta::state_events,
        crate::api::cloudprnt::poll,
        crate::api::cloudprnt::fetch,
        crate::api::cloudprnt::confirm,
        crate::api::intake::submit,
        crate::api::printers::list,
        crate::api::printers::online,
        crate::api::printers::history,
        crate::api::printers::queue,
        crate::api::printers::presence,
        crate::api::printers::reload_bindings,
    )
)]
pub struct ApiDoc;

pub async fn spec() -> Response {
    json_ok(serde_json::to_value(ApiDoc::openapi()).unwrap_or_default())
}
