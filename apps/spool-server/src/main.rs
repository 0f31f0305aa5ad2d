use std::net::SocketAddr;
use std::time::Duration;

use axum::extract::Request;
use axum::http::{header, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use tower::limit::ConcurrencyLimitLayer;
use tower_http::compression::CompressionLayer;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use spool_server::config_loader::BindingsSource;
use spool_server::tasks::TaskManager;
use spool_server::{audit, config_loader, sweeper, util, AppState};

#[tokio::main]
async fn main() {
    let filter = EnvFilter::try_from_env("SPOOL_LOG")
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let (router, endpoints) = spool_server::routes();
    let state = AppState::builder()
        .with_bindings(BindingsSource::from_env())
        .with_endpoints(endpoints)
        .build();

    // Seed the registry before the first remote fetch so printers bound
    // by the fallback mapping get work from the very first poll.
    config_loader::load_initial(&state).await;

    let mut tasks = TaskManager::new();
    tasks.push(sweeper::start(state.clone()));
    tasks.push(config_loader::start(state.clone()));
    if let Some(task) = audit::start(&state) {
        tasks.push(task);
    }

    let max_conc = util::env_u64("SPOOL_HTTP_MAX_CONC", 1024) as usize;
    let mut app = router
        .with_state(state)
        .layer(CompressionLayer::new())
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(util::http_timeout()))
        .layer(RequestBodyLimitLayer::new(1024 * 1024))
        .layer(ConcurrencyLimitLayer::new(max_conc));
    if util::env_flag("FORCE_HTTP_TO_HTTPS") {
        app = app.layer(middleware::from_fn(redirect_to_https));
    }

    let bind = std::env::var("SPOOL_BIND").unwrap_or_else(|_| "0.0.0.0".into());
    let port = util::env_u64("PORT", 8080) as u16;
    let addr: SocketAddr = match format!("{bind}:{port}").parse() {
        Ok(addr) => addr,
        Err(err) => {
            error!(%err, bind, port, "invalid bind address");
            return;
        }
    };
    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(err) => {
            error!(%err, %addr, "failed to bind");
            return;
        }
    };
    info!("spool-server listening on http://{addr}");

    let server = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal());
    if let Err(err) = server.await {
        error!(%err, "server error");
    }

    // In-flight responses have drained; give the background tasks a
    // moment, then abort whatever is left.
    tasks.shutdown_with_grace(Duration::from_secs(3)).await;
    info!("shutdown complete");
}

/// TLS terminates in front of this process; when the toggle is set we
/// answer plain-HTTP callers with a redirect to the HTTPS origin.
async fn redirect_to_https(req: Request, next: Next) -> Response {
    let Some(host) = req
        .headers()
        .get(header::HOST)
        .and_then(|h| h.to_str().ok())
        .map(|h| h.split(':').next().unwrap_or("").to_string())
        .filter(|h| !h.is_empty())
    else {
        return next.run(req).await;
    };
    let https_port = util::env_u64("HTTPS_PORT", 8443);
    let path = req
        .uri()
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/");
    let location = if https_port == 443 {
        format!("https://{host}{path}")
    } else {
        format!("https://{host}:{https_port}{path}")
    };
    (
        StatusCode::TEMPORARY_REDIRECT,
        [(header::LOCATION, location)],
    )
        .into_response()
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!(%err, "ctrl-c handler failed");
        }
    };
    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(err) => {
                error!(%err, "sigterm handler failed");
                std::future::pending::<()>().await
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("SIGINT received; draining"),
        _ = terminate => info!("SIGTERM received; draining"),
    }
}
