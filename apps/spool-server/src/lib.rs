pub mod api;
pub mod app_state;
pub mod audit;
pub mod config_loader;
pub mod history;
pub mod jobs;
pub mod openapi;
pub mod presence;
pub mod raster;
pub mod registry;
pub mod render;
pub mod responses;
pub mod sweeper;
pub mod tasks;
pub mod util;

use axum::routing::{get, post};
use axum::Router;

pub use app_state::AppState;

// Add a route and record it in the endpoints index (single source, no
// drift with /about).
macro_rules! route_get_rec {
    ($router:expr, $endpoints:expr, $path:expr, $handler:path) => {{
        $endpoints.push(format!("GET {}", $path));
        $router.route($path, get($handler))
    }};
}
macro_rules! route_post_rec {
    ($router:expr, $endpoints:expr, $path:expr, $handler:path) => {{
        $endpoints.push(format!("POST {}", $path));
        $router.route($path, post($handler))
    }};
}

/// Build the route table. The endpoints list feeds `/about`; pass it to
/// the state builder before attaching the state.
pub fn routes() -> (Router<AppState>, Vec<String>) {
    let mut endpoints: Vec<String> = Vec::new();
    let mut app = Router::new();

    // Printer-facing protocol: three verbs on one path.
    endpoints.push("POST /cloudprnt".to_string());
    endpoints.push("GET /cloudprnt".to_string());
    endpoints.push("DELETE /cloudprnt".to_string());
    app = app.route(
        "/cloudprnt",
        post(api::cloudprnt::poll)
            .get(api::cloudprnt::fetch)
            .delete(api::cloudprnt::confirm),
    );

    app = route_post_rec!(app, endpoints, "/api/print", api::intake::submit);
    app = route_get_rec!(app, endpoints, "/api/printers", api::printers::list);
    app = route_get_rec!(app, endpoints, "/api/printers/online", api::printers::online);
    app = route_get_rec!(
        app,
        endpoints,
        "/api/printers/:serial/history",
        api::printers::history
    );
    app = route_get_rec!(app, endpoints, "/api/queue/:tenant", api::printers::queue);
    app = route_get_rec!(app, endpoints, "/api/presence", api::printers::presence);
    app = route_post_rec!(
        app,
        endpoints,
        "/api/bindings/reload",
        api::printers::reload_bindings
    );
    app = route_get_rec!(app, endpoints, "/healthz", api::meta::healthz);
    app = route_get_rec!(app, endpoints, "/about", api::meta::about);
    app = route_get_rec!(app, endpoints, "/state/events", api::meta::state_events);
    app = route_get_rec!(app, endpoints, "/spec/openapi.json", openapi::spec);

    (app, endpoints)
}
