// Web server: Axum HTTP surface of the broker.
//
// Routes:
//   GET /{resource}/notifications-push   SSE stream, one subscriber per connection
//   GET /{resource}/notifications        polling page (when polling is enabled)
//   GET /__stats                         registered subscribers
//   GET /__history                       recently dispatched notifications
//   GET /__health, /__gtg                queue proxy health
//
// Every handler reads from `AppState`; nothing is process-global.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use tokio::sync::watch;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::cache::NotificationCache;
use crate::config::Config;
use crate::dispatch::{Dispatcher, History};
use crate::health::HealthCheck;

pub mod handlers;

/// Shared application state threaded through all Axum handlers.
#[derive(Clone)]
pub struct AppState {
    pub dispatcher: Arc<dyn Dispatcher>,
    pub history: Arc<History>,
    /// Present when the polling endpoint is enabled.
    pub cache: Option<Arc<NotificationCache>>,
    pub config: Arc<Config>,
    pub health: Arc<dyn HealthCheck>,
    /// Flips to `true` on shutdown; open streams end so the server can drain.
    pub shutdown: watch::Receiver<bool>,
}

/// Start the Axum web server and block until `shutdown` completes and
/// open connections have drained.
pub async fn run_server<F>(state: AppState, port: u16, bind: &str, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let app = build_router(state);

    let addr = format!("{bind}:{port}");
    info!("Notifications push listening on http://{addr}");

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown)
    .await
    .context("HTTP server failed")?;
    Ok(())
}

pub fn build_router(state: AppState) -> Router {
    let resource = state.config.resource.clone();

    let mut router = Router::new().route(
        &format!("/{resource}/notifications-push"),
        get(handlers::push::subscribe),
    );
    if state.cache.is_some() {
        router = router.route(
            &format!("/{resource}/notifications"),
            get(handlers::notifications::list_notifications),
        );
    }

    router
        .route("/__stats", get(handlers::stats::get_stats))
        .route("/__history", get(handlers::history::get_history))
        .route("/__health", get(handlers::health::health))
        .route("/__gtg", get(handlers::health::gtg))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Typed JSON error response helper.
pub fn api_error(status: StatusCode, message: &str) -> Response {
    (status, axum::Json(serde_json::json!({ "message": message }))).into_response()
}

/// JSON body from an already-serialized string, as
/// `application/json; charset=UTF-8`.
pub fn json_response(body: String) -> Response {
    (
        [(
            axum::http::header::CONTENT_TYPE,
            "application/json; charset=UTF-8",
        )],
        body,
    )
        .into_response()
}
