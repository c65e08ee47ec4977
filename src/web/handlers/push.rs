// GET /{resource}/notifications-push: Server-Sent Events stream.
//
// Optional ?type= (accepted content type, default from config) and
// ?monitor=true (full notification metadata). The subscriber is registered
// before the first byte is written and unregistered when the response
// body is dropped, which covers client disconnects and server shutdown.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::{ConnectInfo, Query, State};
use axum::http::{header, Extensions, HeaderMap, HeaderName, StatusCode};
use axum::response::{IntoResponse, Response};
use serde::Deserialize;
use tokio::sync::{mpsc, watch};

use crate::dispatch::{Dispatcher, Subscriber, SubscriberKind};
use crate::web::{api_error, AppState};

const X_ACCEL_BUFFERING: HeaderName = HeaderName::from_static("x-accel-buffering");

#[derive(Deserialize, Default)]
pub struct PushQuery {
    #[serde(rename = "type")]
    pub content_type: Option<String>,
    pub monitor: Option<String>,
}

pub async fn subscribe(
    State(state): State<AppState>,
    Query(params): Query<PushQuery>,
    headers: HeaderMap,
    extensions: Extensions,
) -> Response {
    let requested = params
        .content_type
        .as_deref()
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .unwrap_or(&state.config.default_content_type);
    let Some(accepted) = state.config.content_type(requested) else {
        return api_error(StatusCode::BAD_REQUEST, "Invalid content type");
    };

    let kind = if is_true(params.monitor.as_deref()) {
        SubscriberKind::Monitor
    } else {
        SubscriberKind::Standard
    };
    let address = client_address(&headers, &extensions);

    let (subscriber, rx) = Subscriber::new(kind, &address, accepted);
    state.dispatcher.register(Arc::clone(&subscriber));
    let registration = Registration {
        dispatcher: Arc::clone(&state.dispatcher),
        subscriber,
    };

    (
        [
            (header::CONTENT_TYPE, "text/event-stream; charset=UTF-8"),
            (header::CACHE_CONTROL, "no-cache, no-store, must-revalidate"),
            (header::CONNECTION, "keep-alive"),
            (header::PRAGMA, "no-cache"),
            (header::EXPIRES, "0"),
            (X_ACCEL_BUFFERING, "no"),
        ],
        Body::from_stream(event_stream(rx, state.shutdown.clone(), registration)),
    )
        .into_response()
}

/// Unregisters its subscriber when dropped.
struct Registration {
    dispatcher: Arc<dyn Dispatcher>,
    subscriber: Arc<Subscriber>,
}

impl Drop for Registration {
    fn drop(&mut self) {
        self.dispatcher.close(&self.subscriber);
    }
}

/// Each queued message becomes one `data: <msg>\n\n` frame. The stream
/// ends on shutdown.
fn event_stream(
    rx: mpsc::Receiver<String>,
    shutdown: watch::Receiver<bool>,
    registration: Registration,
) -> impl futures::Stream<Item = Result<String, Infallible>> + Send + 'static {
    futures::stream::unfold(
        (rx, shutdown, registration),
        |(mut rx, mut shutdown, registration)| async move {
            let msg = tokio::select! {
                msg = rx.recv() => msg?,
                _ = shutting_down(&mut shutdown) => return None,
            };
            Some((Ok(sse_frame(&msg)), (rx, shutdown, registration)))
        },
    )
}

/// Completes once `shutdown` reads `true`. A dropped sender never completes.
async fn shutting_down(shutdown: &mut watch::Receiver<bool>) {
    loop {
        if *shutdown.borrow_and_update() {
            return;
        }
        if shutdown.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

pub fn sse_frame(msg: &str) -> String {
    format!("data: {msg}\n\n")
}

/// First `X-Forwarded-For` entry, else the socket peer address.
fn client_address(headers: &HeaderMap, extensions: &Extensions) -> String {
    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty());
    if let Some(addr) = forwarded {
        return addr.to_string();
    }
    extensions
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.to_string())
        .unwrap_or_default()
}

fn is_true(value: Option<&str>) -> bool {
    matches!(
        value.map(|v| v.trim().to_ascii_lowercase()).as_deref(),
        Some("true" | "t" | "1")
    )
}
