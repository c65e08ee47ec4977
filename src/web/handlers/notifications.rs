// GET /{resource}/notifications: polling page over the dedup cache.
//
// ?empty=true returns a page with no notifications; the `next` link always
// points there, so clients resume from "now" after draining the cache.

use axum::extract::{OriginalUri, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::dispatch::Notification;
use crate::web::{api_error, AppState};

#[derive(Deserialize, Default)]
pub struct NotificationsQuery {
    pub empty: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PageNotification {
    pub api_url: String,
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub last_modified: String,
    pub publish_reference: String,
}

impl From<Notification> for PageNotification {
    fn from(n: Notification) -> Self {
        Self {
            api_url: n.api_url,
            id: n.id,
            kind: n.kind,
            last_modified: n.last_modified,
            publish_reference: n.publish_reference,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct Link {
    pub href: String,
    pub rel: String,
}

#[derive(Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NotificationsPage {
    pub request_url: String,
    pub notifications: Vec<PageNotification>,
    pub links: Vec<Link>,
}

pub async fn list_notifications(
    State(state): State<AppState>,
    OriginalUri(uri): OriginalUri,
    Query(params): Query<NotificationsQuery>,
) -> Response {
    let Some(cache) = &state.cache else {
        return api_error(StatusCode::NOT_FOUND, "Polling notifications are disabled");
    };

    let notifications = if params.empty.as_deref() == Some("true") {
        Vec::new()
    } else {
        cache.items().into_iter().map(PageNotification::from).collect()
    };

    let base = state.config.api_base_url.trim_end_matches('/');
    let request_uri = uri
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or_else(|| uri.path());

    Json(NotificationsPage {
        request_url: format!("{base}{request_uri}"),
        notifications,
        links: vec![Link {
            href: format!("{base}/{}/notifications?empty=true", state.config.resource),
            rel: "next".to_string(),
        }],
    })
    .into_response()
}
